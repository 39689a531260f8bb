//! Command-line options and their conversion into library configs.
//!
//! Every option has a default, so a bare `snail-train` invocation runs a
//! 5-way 1-shot Omniglot experiment under `default/`.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use snail::{DatasetSource, SamplingConfig, SnailConfig, SyntheticConfig, TrainingConfig};

/// Which dataset the episode streams are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatasetKind {
    /// Omniglot character images under `--dataset-root`.
    Omniglot,
    /// Generated prototype-plus-noise classes; needs no files.
    Synthetic,
}

/// Options of a training run.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Experiment directory for checkpoints, histories and results.
    #[arg(long, default_value = "default")]
    pub exp: PathBuf,
    /// Number of epochs to train for.
    #[arg(long, default_value_t = 100)]
    pub epochs: usize,
    /// Episodes per pass, also the window for averaged reports.
    #[arg(long, default_value_t = 100)]
    pub iterations: usize,
    /// Dataset to sample episodes from.
    #[arg(long, value_enum, default_value_t = DatasetKind::Omniglot)]
    pub dataset: DatasetKind,
    /// Classes per episode (N-way).
    #[arg(long, default_value_t = 5)]
    pub num_cls: usize,
    /// Support samples per class (K-shot).
    #[arg(long, default_value_t = 1)]
    pub num_samples: usize,
    /// Adam learning rate.
    #[arg(long, default_value_t = 0.01)]
    pub lr: f64,
    /// Run on the accelerator backend (requires the `wgpu` feature).
    #[arg(long)]
    pub cuda: bool,
    /// Omniglot root directory.
    #[arg(long, default_value = "dataset")]
    pub dataset_root: PathBuf,
    /// Support items per class when scoring validation episodes. Default: --num-samples.
    #[arg(long)]
    pub num_support_val: Option<usize>,
    /// Support items per class when scoring test episodes. Default: --num-samples.
    #[arg(long)]
    pub num_support_test: Option<usize>,
    /// Seed for episode sampling and synthetic data.
    #[arg(long, default_value_t = 7)]
    pub seed: u64,
    /// Train on train+val classes with no validation (and no best model).
    #[arg(long)]
    pub trainval: bool,
}

impl RunArgs {
    /// Reject option combinations that cannot produce a valid episode.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.num_cls > 0, "--num-cls must be > 0");
        anyhow::ensure!(self.num_samples > 0, "--num-samples must be > 0");
        anyhow::ensure!(self.iterations > 0, "--iterations must be > 0");
        anyhow::ensure!(self.lr > 0.0, "--lr must be positive, got {}", self.lr);
        for (flag, n) in [
            ("--num-support-val", self.num_support_val()),
            ("--num-support-test", self.num_support_test()),
        ] {
            anyhow::ensure!(n > 0, "{flag} must be > 0");
        }
        Ok(())
    }

    pub fn num_support_val(&self) -> usize {
        self.num_support_val.unwrap_or(self.num_samples)
    }

    pub fn num_support_test(&self) -> usize {
        self.num_support_test.unwrap_or(self.num_samples)
    }

    pub fn sampling_config(&self) -> SamplingConfig {
        SamplingConfig::new(self.num_cls, self.num_samples).with_iterations(self.iterations)
    }

    pub fn snail_config(&self) -> SnailConfig {
        SnailConfig::new(self.num_cls, self.num_samples)
    }

    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig::new()
            .with_epochs(self.epochs)
            .with_iterations(self.iterations)
            .with_lr(self.lr)
            .with_num_support_val(self.num_support_val())
            .with_exp_dir(self.exp.to_string_lossy().into_owned())
    }

    pub fn dataset_source(&self) -> DatasetSource {
        match self.dataset {
            DatasetKind::Omniglot => DatasetSource::Omniglot(self.dataset_root.clone()),
            DatasetKind::Synthetic => DatasetSource::Synthetic(SyntheticConfig::new()),
        }
    }
}
