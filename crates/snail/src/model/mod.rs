//! SNAIL model components: convolutional image embedding, temporal
//! convolution and attention blocks, and the tensor bridge between episode
//! data and burn tensors.

pub mod blocks;
pub mod bridge;
pub mod embedding;
pub mod snail;
