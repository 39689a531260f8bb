//! Episodic training loop with best-validation checkpointing.
//!
//! Each epoch trains on one pass of the training stream (labelled forward,
//! last-step cross-entropy, Adam step) and, when a validation stream is
//! given, scores one pass of it with the prototypical loss. The weights with
//! the best trailing-window validation accuracy are kept in memory and on
//! disk; the final weights are saved once at the end of the run.

use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;
use indicatif::{ProgressBar, ProgressStyle};

use crate::data::EpisodeSource;
use crate::model::bridge::{images_to_tensor, tensor_to_f64};
use crate::model::snail::{EpisodicModel, Snail, SnailConfig};
use crate::training::loss::{episode_score, last_step_loss};
use crate::training::metrics::{window_mean, BestTracker, MetricsHistory};
use crate::training::one_hot::encode_labels;

/// File stem of the best-validation checkpoint (the recorder adds `.mpk`).
pub const BEST_MODEL: &str = "best_model";
/// File stem of the end-of-training checkpoint.
pub const LAST_MODEL: &str = "last_model";

/// Configuration for episodic training.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Number of epochs.
    #[config(default = 100)]
    pub epochs: usize,
    /// Trailing window (in batches) for averaged loss/accuracy reports.
    #[config(default = 100)]
    pub iterations: usize,
    /// Learning rate passed to every optimizer step.
    #[config(default = 0.01)]
    pub lr: f64,
    /// Support items per class when scoring validation episodes.
    #[config(default = 1)]
    pub num_support_val: usize,
    /// Directory for checkpoints and metric histories.
    #[config(default = "String::from(\"default\")")]
    pub exp_dir: String,
    /// Show a progress bar over training batches.
    #[config(default = true)]
    pub progress: bool,
}

impl TrainingConfig {
    pub fn exp_path(&self) -> PathBuf {
        PathBuf::from(&self.exp_dir)
    }
}

/// What a training run produces.
pub struct TrainOutcome<M> {
    /// Weights at the end of the final epoch.
    pub last_model: M,
    /// Weights at the best validation epoch; `None` without validation.
    pub best_model: Option<M>,
    /// Best trailing-window validation accuracy (0 without validation).
    pub best_acc: f64,
    pub history: MetricsHistory,
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

fn save_model<B: Backend, M: Module<B>>(model: &M, path: &Path) -> anyhow::Result<()> {
    model
        .clone()
        .save_file(path, &recorder())
        .map_err(|e| anyhow::anyhow!("Failed to save model to {}: {e}", path.display()))
}

fn progress_bar(config: &TrainingConfig, len: Option<usize>) -> ProgressBar {
    if !config.progress {
        return ProgressBar::hidden();
    }
    // Sources that cannot tell their pass length get a spinner.
    let Some(len) = len else {
        return ProgressBar::new_spinner();
    };
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb
}

/// Run the training loop.
///
/// # Arguments
/// - `config`: epochs, reporting window, learning rate, output directory
/// - `model`: initialized model (consumed; returned inside the outcome)
/// - `optimizer`: optimizer stepping the model, e.g. Adam
/// - `train_source`: training episodes, one pass per epoch
/// - `val_source`: optional validation episodes, one pass per epoch
/// - `device`: burn device for tensor operations
///
/// Any error inside a step aborts the run.
pub fn train<B, M, O>(
    config: &TrainingConfig,
    mut model: M,
    optimizer: &mut O,
    train_source: &mut dyn EpisodeSource,
    mut val_source: Option<&mut dyn EpisodeSource>,
    device: &B::Device,
) -> anyhow::Result<TrainOutcome<M>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + EpisodicModel<B>,
    M::InnerModule: EpisodicModel<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    let exp_dir = config.exp_path();
    std::fs::create_dir_all(&exp_dir)?;
    let best_path = exp_dir.join(BEST_MODEL);
    let last_path = exp_dir.join(LAST_MODEL);

    let mut history = MetricsHistory::new();
    let mut best = BestTracker::new();
    let mut best_model: Option<M> = None;
    let num_classes = model.num_classes();

    for epoch in 0..config.epochs {
        println!("=== Epoch: {epoch} ===");

        let episodes = train_source.episodes();
        let pb = progress_bar(config, episodes.size_hint().1);
        for batch in episodes {
            let batch = batch?;
            model.check_episode(&batch)?;
            let one_hot = encode_labels(&batch.labels)?;
            let target = one_hot.last_index();
            let labels = one_hot.to_tensor::<B>(num_classes, device)?;
            let images = images_to_tensor::<B>(&batch, device);

            let logits = model.forward_labeled(images, labels);
            let loss = last_step_loss(logits, target);
            let loss_val = tensor_to_f64(loss.clone());

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(config.lr, model, grads);

            history.train_loss.push(loss_val);
            pb.set_message(format!("loss={loss_val:.4}"));
            pb.inc(1);
        }
        pb.finish_and_clear();

        match window_mean(&history.train_loss, config.iterations) {
            Some(avg_loss) => println!("Avg Train Loss: {avg_loss}"),
            None => tracing::warn!(epoch, "Training stream produced no batches"),
        }

        let Some(val) = val_source.as_deref_mut() else {
            continue;
        };

        let val_model = model.valid();
        let mut val_batches = 0usize;
        for batch in val.episodes() {
            let batch = batch?;
            val_model.check_episode(&batch)?;
            let images = images_to_tensor::<B::InnerBackend>(&batch, device);
            let output = val_model.forward_unlabeled(images);
            let (loss, acc) = episode_score(output, &batch.labels, config.num_support_val)?;
            history.val_loss.push(loss);
            history.val_acc.push(acc);
            val_batches += 1;
        }

        // An epoch without validation batches has no accuracy of its own.
        if val_batches == 0 {
            tracing::warn!(epoch, "Validation stream produced no batches, skipping best-model selection");
            continue;
        }
        tracing::debug!(epoch, val_batches, "Validation pass finished");

        let (Some(avg_loss), Some(avg_acc)) = (
            window_mean(&history.val_loss, config.iterations),
            window_mean(&history.val_acc, config.iterations),
        ) else {
            continue;
        };

        println!(
            "Avg Val Loss: {avg_loss}, Avg Val Acc: {avg_acc}{}",
            best.annotation(avg_acc)
        );
        if best.observe(avg_acc) {
            save_model(&model, &best_path)?;
            best_model = Some(model.clone());
            tracing::info!(epoch, best_acc = avg_acc, path = %best_path.display(), "Saved best checkpoint");
        }
    }

    save_model(&model, &last_path)?;
    history.save(&exp_dir)?;

    tracing::info!(
        epochs = config.epochs,
        train_batches = history.train_loss.len(),
        val_batches = history.val_loss.len(),
        best_acc = best.best(),
        has_best = best_model.is_some(),
        "Training complete. Last checkpoint and metric histories saved."
    );

    Ok(TrainOutcome {
        last_model: model,
        best_model,
        best_acc: best.best(),
        history,
    })
}

/// Load a SNAIL model from a checkpoint file.
///
/// Creates a fresh model from config, then loads saved weights on top.
pub fn load_checkpoint<B: Backend>(
    path: &Path,
    config: &SnailConfig,
    device: &B::Device,
) -> anyhow::Result<Snail<B>> {
    config
        .init::<B>(device)
        .load_file(path, &recorder(), device)
        .map_err(|e| anyhow::anyhow!("Failed to load checkpoint from {}: {e}", path.display()))
}
