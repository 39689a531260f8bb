//! Episodic data pipeline.
//!
//! Images are grouped by class in a [`ClassPool`]; an [`EpisodeSampler`]
//! draws N-way K-shot episodes (support set followed by one query) from a
//! pool. Loaders for Omniglot and a synthetic dataset build the
//! train/val/trainval/test pools.

pub mod omniglot;
pub mod synthetic;

use std::collections::BTreeMap;
use std::path::PathBuf;

use burn::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::types::EpisodeBatch;

pub use synthetic::SyntheticConfig;

/// A re-iterable stream of episodes.
///
/// Each call to [`episodes`](EpisodeSource::episodes) is one pass; the
/// trainer calls it once per epoch, the evaluator once per test pass.
pub trait EpisodeSource {
    fn episodes(&mut self) -> Box<dyn Iterator<Item = anyhow::Result<EpisodeBatch>> + '_>;
}

/// A fixed list of episodes, replayed unchanged on every pass.
impl EpisodeSource for Vec<EpisodeBatch> {
    fn episodes(&mut self) -> Box<dyn Iterator<Item = anyhow::Result<EpisodeBatch>> + '_> {
        Box::new(self.iter().cloned().map(Ok))
    }
}

/// Episode geometry and pass length.
#[derive(Config, Debug)]
pub struct SamplingConfig {
    /// Classes per episode (N-way).
    pub num_cls: usize,
    /// Support samples per class (K-shot).
    pub num_samples: usize,
    /// Episodes per pass.
    #[config(default = 100)]
    pub iterations: usize,
}

/// Images grouped by class id.
#[derive(Debug, Clone)]
pub struct ClassPool {
    classes: BTreeMap<u32, Vec<Vec<f32>>>,
    image_shape: [usize; 3],
}

impl ClassPool {
    pub fn new(image_shape: [usize; 3]) -> Self {
        Self {
            classes: BTreeMap::new(),
            image_shape,
        }
    }

    pub fn add(&mut self, class: u32, image: Vec<f32>) {
        self.classes.entry(class).or_default().push(image);
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn num_images(&self) -> usize {
        self.classes.values().map(Vec::len).sum()
    }

    pub fn image_shape(&self) -> [usize; 3] {
        self.image_shape
    }

    /// Union of two pools. Class ids are expected to be disjoint; images of a
    /// shared id are concatenated.
    pub fn merged(&self, other: &ClassPool) -> ClassPool {
        let mut merged = self.clone();
        for (&class, images) in &other.classes {
            merged
                .classes
                .entry(class)
                .or_default()
                .extend(images.iter().cloned());
        }
        merged
    }
}

/// Draws N-way K-shot episodes from a [`ClassPool`].
///
/// Each episode: `num_cls` distinct classes, `num_samples` support images
/// per class in shuffled order, then one query image of a randomly chosen
/// episode class (never one of its own support images). Length
/// `num_cls * num_samples + 1`.
pub struct EpisodeSampler {
    pool: ClassPool,
    class_ids: Vec<u32>,
    config: SamplingConfig,
    rng: StdRng,
}

impl EpisodeSampler {
    pub fn new(pool: ClassPool, config: SamplingConfig, seed: u64) -> anyhow::Result<Self> {
        anyhow::ensure!(config.num_cls > 0, "num_cls must be > 0");
        anyhow::ensure!(config.num_samples > 0, "num_samples must be > 0");
        anyhow::ensure!(
            pool.num_classes() >= config.num_cls,
            "pool has {} classes, episodes need {}",
            pool.num_classes(),
            config.num_cls
        );
        if let Some((class, images)) = pool
            .classes
            .iter()
            .find(|(_, images)| images.len() <= config.num_samples)
        {
            anyhow::bail!(
                "class {class} has {} images, need at least {} (support + query)",
                images.len(),
                config.num_samples + 1
            );
        }
        let class_ids = pool.classes.keys().copied().collect();
        Ok(Self {
            pool,
            class_ids,
            config,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    pub fn pool(&self) -> &ClassPool {
        &self.pool
    }

    /// Sample one episode.
    pub fn sample_episode(&mut self) -> anyhow::Result<EpisodeBatch> {
        let chosen: Vec<u32> = self
            .class_ids
            .choose_multiple(&mut self.rng, self.config.num_cls)
            .copied()
            .collect();
        let query_class = chosen[self.rng.gen_range(0..chosen.len())];

        let mut support = Vec::with_capacity(self.config.num_cls * self.config.num_samples);
        let mut query = None;
        for &class in &chosen {
            let images = &self.pool.classes[&class];
            let take = if class == query_class {
                self.config.num_samples + 1
            } else {
                self.config.num_samples
            };
            let mut picked: Vec<&Vec<f32>> =
                images.choose_multiple(&mut self.rng, take).collect();
            if class == query_class {
                query = picked.pop().map(|image| (image.clone(), class));
            }
            support.extend(picked.into_iter().map(|image| (image.clone(), class)));
        }
        support.shuffle(&mut self.rng);
        support.extend(query);

        let (inputs, labels) = support.into_iter().unzip();
        Ok(EpisodeBatch::new(inputs, labels, self.pool.image_shape)?)
    }
}

impl EpisodeSource for EpisodeSampler {
    fn episodes(&mut self) -> Box<dyn Iterator<Item = anyhow::Result<EpisodeBatch>> + '_> {
        let iterations = self.config.iterations;
        Box::new((0..iterations).map(move |_| self.sample_episode()))
    }
}

/// Where the images come from.
#[derive(Debug, Clone)]
pub enum DatasetSource {
    /// Omniglot background/evaluation images under this root.
    Omniglot(PathBuf),
    /// Randomly generated prototype-plus-noise classes.
    Synthetic(SyntheticConfig),
}

/// The four episode streams of a run.
pub struct DatasetSplits {
    pub train: EpisodeSampler,
    pub val: EpisodeSampler,
    /// Train and validation classes together.
    pub trainval: EpisodeSampler,
    pub test: EpisodeSampler,
}

impl DatasetSplits {
    /// Build samplers over pre-split pools. Each stream gets its own seed
    /// derived from `seed`.
    pub fn from_pools(
        train: ClassPool,
        val: ClassPool,
        test: ClassPool,
        sampling: &SamplingConfig,
        seed: u64,
    ) -> anyhow::Result<Self> {
        let trainval = train.merged(&val);
        tracing::info!(
            train_classes = train.num_classes(),
            val_classes = val.num_classes(),
            test_classes = test.num_classes(),
            "Built dataset splits"
        );
        Ok(Self {
            train: EpisodeSampler::new(train, sampling.clone(), seed)?,
            val: EpisodeSampler::new(val, sampling.clone(), seed.wrapping_add(1))?,
            trainval: EpisodeSampler::new(trainval, sampling.clone(), seed.wrapping_add(2))?,
            test: EpisodeSampler::new(test, sampling.clone(), seed.wrapping_add(3))?,
        })
    }

    /// Load pools from `source` and build the four samplers.
    pub fn load(
        source: &DatasetSource,
        sampling: &SamplingConfig,
        seed: u64,
    ) -> anyhow::Result<Self> {
        let [train, val, test] = match source {
            DatasetSource::Omniglot(root) => omniglot::load_pools(root)?,
            DatasetSource::Synthetic(config) => synthetic::generate_pools(config, seed),
        };
        Self::from_pools(train, val, test, sampling, seed)
    }
}
