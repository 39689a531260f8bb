use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;

use crate::types::EpisodeError;

const NUM_STAGES: usize = 4;

/// Smallest image side that survives every 2x pooling stage.
pub const MIN_IMAGE_SIDE: usize = 1 << NUM_STAGES;

/// Configuration for the convolutional image embedding.
///
/// ```text
/// (T, in_channels, 28, 28)
///   → 4 × [Conv3x3(filters) → BatchNorm → ReLU → MaxPool2]
///   → global average pool → flatten → (T, filters)
/// ```
///
/// Four 2× poolings take a 28×28 image down to 1×1. Larger images leave a
/// bigger map, which the final average pool reduces to 1×1, so the output
/// always has exactly `filters` features.
#[derive(Config, Debug)]
pub struct ConvEmbeddingConfig {
    /// Number of input image channels (1 for Omniglot).
    #[config(default = 1)]
    pub in_channels: usize,
    /// Filters per convolution (and output feature width).
    #[config(default = 64)]
    pub filters: usize,
}

/// One conv → batchnorm → relu → maxpool stage.
#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    pub(crate) conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    pool: MaxPool2d,
}

impl<B: Backend> ConvStage<B> {
    fn new(d_in: usize, d_out: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([d_in, d_out], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            norm: BatchNormConfig::new(d_out).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        self.pool.forward(relu(x))
    }
}

/// Image encoder shared by every item of an episode.
#[derive(Module, Debug)]
pub struct ConvEmbedding<B: Backend> {
    pub(crate) stages: Vec<ConvStage<B>>,
    global_pool: AdaptiveAvgPool2d,
    in_channels: usize,
}

impl ConvEmbeddingConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvEmbedding<B> {
        let stages = (0..NUM_STAGES)
            .map(|i| {
                let d_in = if i == 0 { self.in_channels } else { self.filters };
                ConvStage::new(d_in, self.filters, device)
            })
            .collect();
        ConvEmbedding {
            stages,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            in_channels: self.in_channels,
        }
    }
}

impl<B: Backend> ConvEmbedding<B> {
    /// Input shape: `(T, in_channels, h, w)`. Output shape: `(T, features)`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self
            .stages
            .iter()
            .fold(images, |x, stage| stage.forward(x));
        self.global_pool.forward(x).flatten(1, 3)
    }

    /// Check that images of `[channels, height, width]` fit this encoder.
    pub fn check_image_shape(&self, shape: [usize; 3]) -> Result<(), EpisodeError> {
        let [channels, height, width] = shape;
        if channels != self.in_channels {
            return Err(EpisodeError::ShapeMismatch(format!(
                "images have {channels} channels, encoder expects {}",
                self.in_channels
            )));
        }
        if height < MIN_IMAGE_SIDE || width < MIN_IMAGE_SIDE {
            return Err(EpisodeError::ShapeMismatch(format!(
                "images are {height}x{width}, encoder needs at least {MIN_IMAGE_SIDE}x{MIN_IMAGE_SIDE}"
            )));
        }
        Ok(())
    }
}
