//! SNAIL training pipeline: label encoding, losses, metric histories,
//! the episodic training loop and test-time evaluation.

pub mod evaluator;
pub mod loss;
pub mod metrics;
pub mod one_hot;
pub mod trainer;
