//! Test-time evaluation: repeated passes over a test stream, scoring each
//! episode from unlabelled features.

use burn::prelude::*;

use crate::data::EpisodeSource;
use crate::model::bridge::images_to_tensor;
use crate::model::snail::EpisodicModel;
use crate::training::loss::episode_score;

/// Passes over the test stream per evaluation.
pub const TEST_PASSES: usize = 10;

/// Evaluate `model` over [`TEST_PASSES`] passes of `source`.
///
/// Prints `Test Acc: {avg}` and returns the mean per-episode accuracy.
pub fn evaluate<B: Backend, M: EpisodicModel<B>>(
    model: &M,
    source: &mut dyn EpisodeSource,
    n_support: usize,
    device: &B::Device,
) -> anyhow::Result<f64> {
    evaluate_passes(model, source, n_support, TEST_PASSES, device)
}

/// Evaluate `model` over `passes` passes of `source`.
///
/// Every episode contributes one accuracy; the result is their plain mean.
/// A stream that yields no episodes at all is an error.
pub fn evaluate_passes<B: Backend, M: EpisodicModel<B>>(
    model: &M,
    source: &mut dyn EpisodeSource,
    n_support: usize,
    passes: usize,
    device: &B::Device,
) -> anyhow::Result<f64> {
    let mut accuracies = Vec::new();
    for pass in 0..passes {
        for batch in source.episodes() {
            let batch = batch?;
            model.check_episode(&batch)?;
            let images = images_to_tensor::<B>(&batch, device);
            let features = model.forward_unlabeled(images);
            let (_, acc) = episode_score(features, &batch.labels, n_support)?;
            accuracies.push(acc);
        }
        tracing::debug!(pass, episodes = accuracies.len(), "Test pass finished");
    }

    anyhow::ensure!(!accuracies.is_empty(), "test stream produced no episodes");
    let avg = accuracies.iter().sum::<f64>() / accuracies.len() as f64;
    println!("Test Acc: {avg}");
    tracing::info!(episodes = accuracies.len(), passes, accuracy = avg, "Evaluation complete");
    Ok(avg)
}
