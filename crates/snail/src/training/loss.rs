//! Losses for episodic training and scoring.
//!
//! - [`last_step_loss`]: cross-entropy on the final time step of a labelled
//!   forward pass (the training objective).
//! - [`prototypical_loss`]: support/query prototype classification used to
//!   score validation and test episodes from unlabelled features.

use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;

use crate::model::bridge::{indices_to_tensor, tensor_to_f64};
use crate::types::EpisodeError;

/// Cross-entropy between the logits at the last sequence position and the
/// query's target index.
///
/// # Arguments
/// - `logits`: shape `(1, T, num_cls)`
/// - `target`: mapped class index of the final item
///
/// # Returns
/// Scalar loss tensor of shape `(1,)`.
pub fn last_step_loss<B: Backend>(logits: Tensor<B, 3>, target: usize) -> Tensor<B, 1> {
    let device = logits.device();
    let [batch, seq_len, num_cls] = logits.dims();
    let last: Tensor<B, 2> = logits
        .slice([0..batch, seq_len - 1..seq_len, 0..num_cls])
        .reshape([batch, num_cls]);
    let targets = indices_to_tensor::<B>(&vec![target; batch], &device);

    CrossEntropyLossConfig::new().init(&device).forward(last, targets)
}

/// Prototypical loss over one episode.
///
/// Classes are the distinct labels in ascending order. For every class the
/// first `n_support` items (in batch order) form the support set and the
/// rest are queries. Each query is classified by negative squared Euclidean
/// distance to the class prototypes (support means).
///
/// # Arguments
/// - `embeddings`: shape `(T, d)`, one row per item
/// - `labels`: raw labels, length `T`
/// - `n_support`: support items per class
///
/// # Returns
/// `(loss, accuracy)`: scalar loss tensor of shape `(1,)` and the fraction
/// of queries whose nearest prototype is their own class.
pub fn prototypical_loss<B: Backend>(
    embeddings: Tensor<B, 2>,
    labels: &[u32],
    n_support: usize,
) -> Result<(Tensor<B, 1>, f64), EpisodeError> {
    if labels.is_empty() {
        return Err(EpisodeError::EmptyBatch);
    }
    if n_support == 0 {
        return Err(EpisodeError::ZeroSupport);
    }
    let [rows, dim] = embeddings.dims();
    if rows != labels.len() {
        return Err(EpisodeError::ShapeMismatch(format!(
            "{rows} embeddings but {} labels",
            labels.len()
        )));
    }

    let mut classes = labels.to_vec();
    classes.sort_unstable();
    classes.dedup();

    let mut support: Vec<Vec<usize>> = vec![Vec::new(); classes.len()];
    let mut query_rows = Vec::new();
    let mut query_targets = Vec::new();
    for (row, label) in labels.iter().enumerate() {
        let class = classes.partition_point(|c| c < label);
        if support[class].len() < n_support {
            support[class].push(row);
        } else {
            query_rows.push(row);
            query_targets.push(class);
        }
    }
    if query_rows.is_empty() {
        return Err(EpisodeError::NoQueries { n_support });
    }

    let device = embeddings.device();
    let prototypes: Vec<Tensor<B, 2>> = support
        .iter()
        .map(|rows| {
            embeddings
                .clone()
                .select(0, indices_to_tensor::<B>(rows, &device))
                .mean_dim(0)
        })
        .collect();
    let prototypes = Tensor::cat(prototypes, 0); // (C, d)
    let queries = embeddings.select(0, indices_to_tensor::<B>(&query_rows, &device)); // (Q, d)

    let num_queries = query_rows.len();
    let num_classes = classes.len();
    let diff = queries.unsqueeze_dim::<3>(1).expand([num_queries, num_classes, dim])
        - prototypes.unsqueeze_dim::<3>(0).expand([num_queries, num_classes, dim]);
    let distances: Tensor<B, 2> = diff.powf_scalar(2.0).sum_dim(2).squeeze::<2>(2); // (Q, C)
    let logits = distances.neg();

    let targets = indices_to_tensor::<B>(&query_targets, &device);
    let predictions = logits.clone().argmax(1).reshape([num_queries]);
    let accuracy = tensor_to_f64(predictions.equal(targets.clone()).float().mean());

    let loss = CrossEntropyLossConfig::new()
        .init(&device)
        .forward(logits, targets);
    Ok((loss, accuracy))
}

/// [`prototypical_loss`] reduced to host scalars: `(loss, accuracy)`.
pub fn episode_score<B: Backend>(
    embeddings: Tensor<B, 2>,
    labels: &[u32],
    n_support: usize,
) -> Result<(f64, f64), EpisodeError> {
    let (loss, accuracy) = prototypical_loss(embeddings, labels, n_support)?;
    Ok((tensor_to_f64(loss), accuracy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    fn embeddings(rows: Vec<[f32; 2]>) -> Tensor<TestBackend, 2> {
        let n = rows.len();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        Tensor::from_data(TensorData::new(flat, [n, 2]), &Default::default())
    }

    #[test]
    fn test_perfect_separation() {
        // Class 3 near (0, 0), class 8 near (10, 10); last two rows are queries.
        let emb = embeddings(vec![[0.0, 0.0], [10.0, 10.0], [0.5, 0.0], [9.5, 10.0]]);
        let (loss, acc) = episode_score(emb, &[3, 8, 3, 8], 1).unwrap();
        assert!((acc - 1.0).abs() < 1e-9, "expected accuracy 1, got {acc}");
        assert!(loss < 0.01, "expected near-zero loss, got {loss}");
    }

    #[test]
    fn test_wrong_side_queries() {
        // Queries sit on the other class's prototype.
        let emb = embeddings(vec![[0.0, 0.0], [10.0, 10.0], [10.0, 10.0], [0.0, 0.0]]);
        let (loss, acc) = episode_score(emb, &[3, 8, 3, 8], 1).unwrap();
        assert!(acc.abs() < 1e-9, "expected accuracy 0, got {acc}");
        assert!(loss > 10.0, "expected large loss, got {loss}");
    }

    #[test]
    fn test_equidistant_query_loss_is_ln_classes() {
        // One query exactly between two prototypes → loss = ln 2.
        let emb = embeddings(vec![[-1.0, 0.0], [1.0, 0.0], [0.0, 0.0]]);
        let (loss, _) = episode_score(emb, &[1, 2, 1], 1).unwrap();
        assert!((loss - 2f64.ln()).abs() < 1e-4, "expected ln 2, got {loss}");
    }

    #[test]
    fn test_partial_accuracy() {
        // Class 0 prototype (0,0), class 1 prototype (4,0); queries: one right, one wrong.
        let emb = embeddings(vec![[0.0, 0.0], [4.0, 0.0], [0.5, 0.0], [0.5, 0.0]]);
        let (_, acc) = episode_score(emb, &[0, 1, 0, 1], 1).unwrap();
        assert!((acc - 0.5).abs() < 1e-9, "expected 0.5, got {acc}");
    }

    #[test]
    fn test_episode_with_single_query() {
        // Support-then-query layout of an N*K+1 episode: only class 5 has a query.
        let emb = embeddings(vec![[0.0, 0.0], [5.0, 5.0], [-5.0, 5.0], [4.8, 5.1]]);
        let (_, acc) = episode_score(emb, &[2, 5, 9, 5], 1).unwrap();
        assert!((acc - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_queries_is_error() {
        let emb = embeddings(vec![[0.0, 0.0], [1.0, 1.0]]);
        let err = episode_score(emb, &[1, 2], 1).unwrap_err();
        assert!(matches!(err, EpisodeError::NoQueries { n_support: 1 }));
    }

    #[test]
    fn test_invalid_arguments() {
        let emb = embeddings(vec![[0.0, 0.0], [1.0, 1.0]]);
        assert!(matches!(
            episode_score(emb.clone(), &[1, 1], 0).unwrap_err(),
            EpisodeError::ZeroSupport
        ));
        assert!(matches!(
            episode_score(emb, &[1, 1, 1], 1).unwrap_err(),
            EpisodeError::ShapeMismatch(_)
        ));
    }

    #[test]
    fn test_last_step_loss_uses_final_position() {
        let device = Default::default();
        // Step 0 strongly predicts class 0, final step strongly predicts class 1.
        let logits = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(vec![20.0_f32, 0.0, 0.0, 20.0], [1, 2, 2]),
            &device,
        );
        let right: f64 = last_step_loss(logits.clone(), 1).into_scalar().elem();
        let wrong: f64 = last_step_loss(logits, 0).into_scalar().elem();
        assert!(right < 1e-4, "target 1 should be near-free, got {right}");
        assert!(wrong > 10.0, "target 0 should be expensive, got {wrong}");
    }

    #[test]
    fn test_last_step_loss_gradient() {
        let device = Default::default();
        let logits = Tensor::<TestAutodiffBackend, 3>::zeros([1, 3, 4], &device).require_grad();
        let loss = last_step_loss(logits.clone(), 2);
        let grads = loss.backward();
        let grad = logits.grad(&grads).unwrap();

        // Only the final step receives gradient.
        let early: f32 = grad.clone().slice([0..1, 0..2, 0..4]).abs().sum().into_scalar().elem();
        let last: f32 = grad.slice([0..1, 2..3, 0..4]).abs().sum().into_scalar().elem();
        assert_eq!(early, 0.0);
        assert!(last > 0.0);
    }
}
