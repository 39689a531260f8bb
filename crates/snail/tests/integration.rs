//! Integration tests for the SNAIL crate.
//!
//! These tests exercise cross-module interactions: sampler -> one-hot ->
//! model -> loss -> optimizer, the full training loop with checkpointing,
//! checkpoint reload, and evaluation of the trained weights. All use the
//! NdArray backend, small model widths and synthetic data.

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use tempfile::TempDir;

use snail::data::synthetic::generate_pools;
use snail::model::bridge::{images_to_tensor, tensor_to_f64};
use snail::training::evaluator::evaluate_passes;
use snail::training::loss::last_step_loss;
use snail::training::trainer::{BEST_MODEL, LAST_MODEL};
use snail::{
    encode_labels, load_checkpoint, train, DatasetSplits, EpisodeBatch, EpisodeSource,
    EpisodicModel, SamplingConfig, SnailConfig, SyntheticConfig, TrainingConfig,
};

type TestBackend = NdArray<f32>;
type TestAutodiffBackend = Autodiff<NdArray<f32>>;

const NUM_CLS: usize = 2;
const NUM_SAMPLES: usize = 1;

fn tiny_snail() -> SnailConfig {
    SnailConfig::new(NUM_CLS, NUM_SAMPLES)
        .with_embed_filters(8)
        .with_tc_filters(4)
        .with_attention_sizes([(4, 2), (4, 2), (4, 2)])
}

fn tiny_splits(iterations: usize, seed: u64) -> DatasetSplits {
    let synthetic = SyntheticConfig::new()
        .with_classes([4, 3, 3])
        .with_images_per_class(3)
        .with_image_size(16);
    let [train, val, test] = generate_pools(&synthetic, seed);
    let sampling = SamplingConfig::new(NUM_CLS, NUM_SAMPLES).with_iterations(iterations);
    DatasetSplits::from_pools(train, val, test, &sampling, seed).unwrap()
}

fn training_config(dir: &TempDir, epochs: usize, iterations: usize) -> TrainingConfig {
    TrainingConfig::new()
        .with_epochs(epochs)
        .with_iterations(iterations)
        .with_lr(1e-3)
        .with_num_support_val(NUM_SAMPLES)
        .with_exp_dir(dir.path().to_string_lossy().into_owned())
        .with_progress(false)
}

fn episode_loss<B: Backend, M: EpisodicModel<B>>(
    model: &M,
    batch: &EpisodeBatch,
    device: &B::Device,
) -> Tensor<B, 1> {
    let one_hot = encode_labels(&batch.labels).unwrap();
    let labels = one_hot.to_tensor::<B>(model.num_classes(), device).unwrap();
    let logits = model.forward_labeled(images_to_tensor::<B>(batch, device), labels);
    last_step_loss(logits, one_hot.last_index())
}

// ---------------------------------------------------------------------------
// Test 1: sampler -> model -> loss -> Adam on one fixed episode
// ---------------------------------------------------------------------------

#[test]
fn test_repeated_steps_reduce_loss_on_fixed_episode() {
    let device = Default::default();
    let mut splits = tiny_splits(1, 5);
    let batch = splits.train.sample_episode().unwrap();

    let mut model = tiny_snail().init::<TestAutodiffBackend>(&device);
    let mut optimizer = AdamConfig::new().init();

    let initial = tensor_to_f64(episode_loss(&model, &batch, &device));
    for _ in 0..30 {
        let loss = episode_loss(&model, &batch, &device);
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optimizer.step(1e-3, model, grads);
    }
    let last = tensor_to_f64(episode_loss(&model, &batch, &device));

    assert!(initial.is_finite() && last.is_finite());
    assert!(
        last < initial,
        "loss should drop when fitting one episode: {initial} -> {last}"
    );
}

// ---------------------------------------------------------------------------
// Test 2: full training loop with validation
// ---------------------------------------------------------------------------

#[test]
fn test_train_with_validation_writes_artifacts() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    let mut splits = tiny_splits(3, 11);
    let config = training_config(&tmp, 2, 3);

    let model = tiny_snail().init::<TestAutodiffBackend>(&device);
    let mut optimizer = AdamConfig::new().init();
    let outcome = train(
        &config,
        model,
        &mut optimizer,
        &mut splits.train,
        Some(&mut splits.val),
        &device,
    )
    .unwrap();

    assert_eq!(outcome.history.train_loss.len(), 6);
    assert_eq!(outcome.history.val_loss.len(), 6);
    assert_eq!(outcome.history.val_acc.len(), 6);
    assert!(outcome.history.train_acc.is_empty());
    assert!(outcome.history.val_acc.iter().all(|a| (0.0..=1.0).contains(a)));

    // Epoch 0 is always best (accuracy >= 0), so a best snapshot exists.
    assert!(outcome.best_model.is_some());
    assert!((0.0..=1.0).contains(&outcome.best_acc));

    for file in [
        format!("{BEST_MODEL}.mpk"),
        format!("{LAST_MODEL}.mpk"),
        "train_loss.txt".to_string(),
        "train_acc.txt".to_string(),
        "val_loss.txt".to_string(),
        "val_acc.txt".to_string(),
    ] {
        assert!(tmp.path().join(&file).exists(), "missing {file}");
    }

    let lines = std::fs::read_to_string(tmp.path().join("train_loss.txt")).unwrap();
    let parsed: Vec<f64> = lines.lines().map(|l| l.parse().unwrap()).collect();
    assert_eq!(parsed, outcome.history.train_loss);
}

// ---------------------------------------------------------------------------
// Test 3: training without validation
// ---------------------------------------------------------------------------

#[test]
fn test_train_without_validation_has_no_best() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    let mut splits = tiny_splits(2, 3);
    let config = training_config(&tmp, 2, 2);

    let model = tiny_snail().init::<TestAutodiffBackend>(&device);
    let mut optimizer = AdamConfig::new().init();
    let outcome = train(
        &config,
        model,
        &mut optimizer,
        &mut splits.trainval,
        None,
        &device,
    )
    .unwrap();

    assert!(outcome.best_model.is_none());
    assert_eq!(outcome.best_acc, 0.0);
    assert_eq!(outcome.history.train_loss.len(), 4);
    assert!(outcome.history.val_loss.is_empty());
    assert!(!tmp.path().join(format!("{BEST_MODEL}.mpk")).exists());
    assert!(tmp.path().join(format!("{LAST_MODEL}.mpk")).exists());
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("val_acc.txt")).unwrap(),
        ""
    );
}

// ---------------------------------------------------------------------------
// Test 4: an empty validation stream skips selection instead of failing
// ---------------------------------------------------------------------------

#[test]
fn test_empty_validation_stream_skips_selection() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    let mut splits = tiny_splits(2, 8);
    let mut empty_val: Vec<EpisodeBatch> = Vec::new();
    let config = training_config(&tmp, 1, 2);

    let model = tiny_snail().init::<TestAutodiffBackend>(&device);
    let mut optimizer = AdamConfig::new().init();
    let outcome = train(
        &config,
        model,
        &mut optimizer,
        &mut splits.train,
        Some(&mut empty_val),
        &device,
    )
    .unwrap();

    assert!(outcome.best_model.is_none());
    assert!(outcome.history.val_acc.is_empty());
}

/// Replays its episodes on the first pass only; later passes are empty.
struct FirstPassOnly {
    batches: Vec<EpisodeBatch>,
    passes: usize,
}

impl EpisodeSource for FirstPassOnly {
    fn episodes(&mut self) -> Box<dyn Iterator<Item = anyhow::Result<EpisodeBatch>> + '_> {
        self.passes += 1;
        let take = if self.passes == 1 { self.batches.len() } else { 0 };
        Box::new(self.batches.iter().take(take).cloned().map(Ok))
    }
}

#[test]
fn test_best_model_is_a_snapshot_of_its_epoch() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    let mut splits = tiny_splits(3, 13);
    let batches: Vec<_> = splits.val.episodes().collect::<Result<_, _>>().unwrap();
    let mut val = FirstPassOnly { batches, passes: 0 };
    let config = training_config(&tmp, 2, 3);
    let snail_config = tiny_snail();

    let model = snail_config.init::<TestAutodiffBackend>(&device);
    let mut optimizer = AdamConfig::new().init();
    let outcome = train(
        &config,
        model,
        &mut optimizer,
        &mut splits.train,
        Some(&mut val),
        &device,
    )
    .unwrap();

    // Epoch 1 saw no validation batches, so only epoch 0 was scored.
    assert_eq!(val.passes, 2);
    assert_eq!(outcome.history.val_acc.len(), 3);
    assert_eq!(outcome.history.train_loss.len(), 6);

    let best = outcome.best_model.expect("epoch 0 should be selected").valid();
    let last = outcome.last_model.valid();
    let batch = splits.test.sample_episode().unwrap();
    let best_out = best.forward_unlabeled(images_to_tensor::<TestBackend>(&batch, &device));
    let last_out = last.forward_unlabeled(images_to_tensor::<TestBackend>(&batch, &device));
    let drift: f32 = (best_out.clone() - last_out).abs().max().into_scalar().elem();
    assert!(drift > 1e-6, "best model tracked the final weights, diff={drift}");

    let reloaded = load_checkpoint::<TestBackend>(
        &tmp.path().join(format!("{BEST_MODEL}.mpk")),
        &snail_config,
        &device,
    )
    .unwrap();
    let reloaded_out =
        reloaded.forward_unlabeled(images_to_tensor::<TestBackend>(&batch, &device));
    let diff: f32 = (best_out - reloaded_out).abs().max().into_scalar().elem();
    assert!(diff < 1e-5, "best checkpoint differs from best model, max diff={diff}");
}

// ---------------------------------------------------------------------------
// Test 5: malformed training episode aborts the run
// ---------------------------------------------------------------------------

#[test]
fn test_too_many_classes_aborts_training() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    // Three distinct labels for a 2-way model.
    let batch = EpisodeBatch::new(vec![vec![0.5; 256]; 3], vec![0, 1, 2], [1, 16, 16]).unwrap();
    let mut source = vec![batch];
    let config = training_config(&tmp, 1, 1);

    let model = tiny_snail().init::<TestAutodiffBackend>(&device);
    let mut optimizer = AdamConfig::new().init();
    let result = train(&config, model, &mut optimizer, &mut source, None, &device);
    let err = result.err().expect("training should fail");
    assert!(err.to_string().contains("distinct labels"), "got: {err}");
}

#[test]
fn test_undersized_images_abort_training() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    let batch = EpisodeBatch::new(vec![vec![0.5; 64]; 3], vec![0, 1, 0], [1, 8, 8]).unwrap();
    let mut source = vec![batch];
    let config = training_config(&tmp, 1, 1);

    let model = tiny_snail().init::<TestAutodiffBackend>(&device);
    let mut optimizer = AdamConfig::new().init();
    let result = train(&config, model, &mut optimizer, &mut source, None, &device);
    let err = result.err().expect("training should fail");
    assert!(err.to_string().contains("shape mismatch"), "got: {err}");
}

#[test]
fn test_train_on_larger_images_with_progress_bar() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    let synthetic = SyntheticConfig::new()
        .with_classes([3, 3, 3])
        .with_images_per_class(2)
        .with_image_size(32);
    let [train_pool, val_pool, test_pool] = generate_pools(&synthetic, 4);
    let sampling = SamplingConfig::new(NUM_CLS, NUM_SAMPLES).with_iterations(2);
    let mut splits = DatasetSplits::from_pools(train_pool, val_pool, test_pool, &sampling, 4).unwrap();
    // A fixed list knows its pass length, so the bar gets a real length.
    let mut train_batches: Vec<_> = splits.train.episodes().collect::<Result<_, _>>().unwrap();
    let config = training_config(&tmp, 1, 2).with_progress(true);

    let model = tiny_snail().init::<TestAutodiffBackend>(&device);
    let mut optimizer = AdamConfig::new().init();
    let outcome = train(
        &config,
        model,
        &mut optimizer,
        &mut train_batches,
        Some(&mut splits.val),
        &device,
    )
    .unwrap();

    assert_eq!(outcome.history.train_loss.len(), 2);
    assert!(outcome.history.train_loss.iter().all(|l| l.is_finite()));
    assert!(outcome.best_model.is_some());
}

// ---------------------------------------------------------------------------
// Test 6: checkpoint save -> load -> same outputs, then evaluate
// ---------------------------------------------------------------------------

#[test]
fn test_checkpoint_reload_and_evaluate() {
    let tmp = TempDir::new().unwrap();
    let device = Default::default();
    let mut splits = tiny_splits(2, 21);
    let config = training_config(&tmp, 1, 2);
    let snail_config = tiny_snail();

    let model = snail_config.init::<TestAutodiffBackend>(&device);
    let mut optimizer = AdamConfig::new().init();
    let outcome = train(
        &config,
        model,
        &mut optimizer,
        &mut splits.train,
        Some(&mut splits.val),
        &device,
    )
    .unwrap();

    let last = outcome.last_model.valid();
    let reloaded = load_checkpoint::<TestBackend>(
        &tmp.path().join(format!("{LAST_MODEL}.mpk")),
        &snail_config,
        &device,
    )
    .unwrap();

    let batch = splits.test.sample_episode().unwrap();
    let a = last.forward_unlabeled(images_to_tensor::<TestBackend>(&batch, &device));
    let b = reloaded.forward_unlabeled(images_to_tensor::<TestBackend>(&batch, &device));
    let diff: f32 = (a - b).abs().max().into_scalar().elem();
    assert!(diff < 1e-5, "reloaded weights differ, max diff={diff}");

    let last_acc =
        evaluate_passes::<TestBackend, _>(&last, &mut splits.test, NUM_SAMPLES, 2, &device)
            .unwrap();
    let best = outcome.best_model.unwrap().valid();
    let best_acc =
        evaluate_passes::<TestBackend, _>(&best, &mut splits.test, NUM_SAMPLES, 2, &device)
            .unwrap();
    assert!((0.0..=1.0).contains(&last_acc));
    assert!((0.0..=1.0).contains(&best_acc));
}

#[test]
fn test_load_checkpoint_missing_file() {
    let device = Default::default();
    let result = load_checkpoint::<TestBackend>(
        std::path::Path::new("/nonexistent/best_model.mpk"),
        &tiny_snail(),
        &device,
    );
    assert!(result.is_err());
}

#[test]
fn test_episode_source_pass_is_iterations_long() {
    let mut splits = tiny_splits(4, 2);
    let batches: Vec<_> = splits.test.episodes().collect::<Result<_, _>>().unwrap();
    assert_eq!(batches.len(), 4);
    assert!(batches.iter().all(|b| b.len() == NUM_CLS * NUM_SAMPLES + 1));
}
