//! SNAIL few-shot classifier.
//!
//! A Simple Neural Attentive Meta-Learner reads an N-way K-shot episode as a
//! sequence of (image, label) pairs followed by an unlabelled query and
//! predicts the query's class. This crate provides the model, episodic data
//! pipeline, training loop with best-validation checkpointing, and test-time
//! evaluation.

pub mod data;
pub mod model;
pub mod training;
pub mod types;

pub use data::{
    ClassPool, DatasetSource, DatasetSplits, EpisodeSampler, EpisodeSource, SamplingConfig,
    SyntheticConfig,
};
pub use model::snail::{EpisodicModel, Snail, SnailConfig};
pub use training::evaluator::{evaluate, evaluate_passes, TEST_PASSES};
pub use training::metrics::{BestTracker, MetricsHistory};
pub use training::one_hot::{encode_labels, OneHot};
pub use training::trainer::{load_checkpoint, train, TrainOutcome, TrainingConfig};
pub use types::{EpisodeBatch, EpisodeError};
