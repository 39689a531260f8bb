//! Batch-local label encoding.
//!
//! Raw class identifiers in an episode are arbitrary. Each batch gets its
//! own map: distinct labels sorted ascending, indexed `0..k`. The same raw
//! label can land on different indices in different batches.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::types::EpisodeError;

/// Mapped indices and one-hot rows for one batch of labels.
#[derive(Debug, Clone, PartialEq)]
pub struct OneHot {
    /// `indices[i]` is the column of `labels[i]`.
    pub indices: Vec<usize>,
    /// Number of distinct labels (matrix width).
    pub num_classes: usize,
}

/// Encode a batch of raw labels.
///
/// Returns [`EpisodeError::EmptyBatch`] for an empty slice.
pub fn encode_labels<L: Ord + Copy>(labels: &[L]) -> Result<OneHot, EpisodeError> {
    if labels.is_empty() {
        return Err(EpisodeError::EmptyBatch);
    }
    let mut distinct = labels.to_vec();
    distinct.sort_unstable();
    distinct.dedup();

    let indices = labels
        .iter()
        .map(|label| {
            distinct
                .binary_search(label)
                .expect("label taken from the same batch")
        })
        .collect();

    Ok(OneHot {
        indices,
        num_classes: distinct.len(),
    })
}

impl OneHot {
    /// Row-major `(batch, num_classes)` matrix with a single 1 per row.
    pub fn matrix(&self) -> Vec<Vec<f32>> {
        self.indices
            .iter()
            .map(|&idx| {
                let mut row = vec![0.0; self.num_classes];
                row[idx] = 1.0;
                row
            })
            .collect()
    }

    /// Index of the final item: the query's target class.
    pub fn last_index(&self) -> usize {
        // Non-empty by construction.
        self.indices[self.indices.len() - 1]
    }

    /// Place the matrix on `device`, padded with zero columns to `width`.
    ///
    /// Fails if the batch has more distinct labels than `width`.
    pub fn to_tensor<B: Backend>(
        &self,
        width: usize,
        device: &B::Device,
    ) -> Result<Tensor<B, 2>, EpisodeError> {
        if self.num_classes > width {
            return Err(EpisodeError::TooManyClasses {
                found: self.num_classes,
                max: width,
            });
        }
        let mut flat = vec![0.0_f32; self.indices.len() * width];
        for (row, &idx) in self.indices.iter().enumerate() {
            flat[row * width + idx] = 1.0;
        }
        Ok(Tensor::from_data(
            TensorData::new(flat, [self.indices.len(), width]),
            device,
        ))
    }
}
