//! Tensor bridge: converts host-side episode data (`Vec<f32>` images,
//! mapped label indices) into burn tensors and scalars back out.
//!
//! Everything that crosses from [`EpisodeBatch`] into the model goes
//! through here, so device placement happens in exactly one place.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::types::EpisodeBatch;

/// Stack an episode's images into a `(T, channels, height, width)` tensor.
pub fn images_to_tensor<B: Backend>(batch: &EpisodeBatch, device: &B::Device) -> Tensor<B, 4> {
    let [c, h, w] = batch.image_shape;
    let flat: Vec<f32> = batch.inputs.iter().flat_map(|v| v.iter().copied()).collect();
    Tensor::from_data(TensorData::new(flat, [batch.len(), c, h, w]), device)
}

/// Convert mapped class indices to a 1D integer tensor.
pub fn indices_to_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let data: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    Tensor::from_data(TensorData::new(data, [indices.len()]), device)
}

/// Extract a single f64 scalar from a burn 1D tensor.
///
/// # Panics
/// Panics if the tensor does not contain exactly one element.
pub fn tensor_to_f64<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}
