use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

use crate::model::blocks::{AttentionBlock, TCBlock};
use crate::model::embedding::{ConvEmbedding, ConvEmbeddingConfig};
use crate::types::{EpisodeBatch, EpisodeError};

/// A model that can be trained and scored on episodes.
///
/// `forward_labeled` conditions on the episode's label sequence and yields
/// per-step class logits; `forward_unlabeled` sees the inputs alone and
/// yields per-item features for the episodic (prototypical) loss.
pub trait EpisodicModel<B: Backend> {
    /// Number of output classes per step.
    fn num_classes(&self) -> usize;

    /// Input: images `(T, c, h, w)`, one-hot labels `(T, num_classes)`.
    /// Output: logits `(1, T, num_classes)`.
    fn forward_labeled(&self, images: Tensor<B, 4>, labels: Tensor<B, 2>) -> Tensor<B, 3>;

    /// Input: images `(T, c, h, w)`. Output: features `(T, d)`.
    fn forward_unlabeled(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Reject an episode the forward passes cannot take.
    fn check_episode(&self, _batch: &EpisodeBatch) -> Result<(), EpisodeError> {
        Ok(())
    }
}

/// Configuration for the SNAIL few-shot classifier.
///
/// ```text
/// images (T, 1, 28, 28) → ConvEmbedding → (T, F)
/// concat one-hot labels (query label zeroed) → (1, T, F + N)
///   → Attention(k=64, v=32) → TC(128) → Attention(k=256, v=128)
///   → TC(128) → Attention(k=512, v=256) → Linear → (1, T, N)
/// ```
///
/// `T = num_cls * num_samples + 1`: the support set followed by one query.
#[derive(Config, Debug)]
pub struct SnailConfig {
    /// Classes per episode (N-way).
    pub num_cls: usize,
    /// Support samples per class (K-shot).
    pub num_samples: usize,
    /// Image channels.
    #[config(default = 1)]
    pub in_channels: usize,
    /// Width of the image embedding.
    #[config(default = 64)]
    pub embed_filters: usize,
    /// Filters per dense block inside each TC block.
    #[config(default = 128)]
    pub tc_filters: usize,
    /// `(key, value)` sizes of the three attention blocks.
    #[config(default = "[(64, 32), (256, 128), (512, 256)]")]
    pub attention_sizes: [(usize, usize); 3],
}

impl SnailConfig {
    /// Sequence length of one episode.
    pub fn seq_len(&self) -> usize {
        self.num_cls * self.num_samples + 1
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Snail<B> {
        let seq_len = self.seq_len();
        let [(k1, v1), (k2, v2), (k3, v3)] = self.attention_sizes;

        let mut channels = self.embed_filters + self.num_cls;
        let attention1 = AttentionBlock::new(channels, k1, v1, device);
        channels += v1;
        let tc1 = TCBlock::new(channels, seq_len, self.tc_filters, device);
        channels += TCBlock::<B>::output_growth(seq_len, self.tc_filters);
        let attention2 = AttentionBlock::new(channels, k2, v2, device);
        channels += v2;
        let tc2 = TCBlock::new(channels, seq_len, self.tc_filters, device);
        channels += TCBlock::<B>::output_growth(seq_len, self.tc_filters);
        let attention3 = AttentionBlock::new(channels, k3, v3, device);
        channels += v3;

        Snail {
            encoder: ConvEmbeddingConfig::new()
                .with_in_channels(self.in_channels)
                .with_filters(self.embed_filters)
                .init(device),
            attention1,
            tc1,
            attention2,
            tc2,
            attention3,
            head: LinearConfig::new(channels, self.num_cls).init(device),
            num_cls: self.num_cls,
        }
    }
}

/// SNAIL: an image encoder followed by interleaved temporal convolutions
/// and causal attention over the episode sequence.
#[derive(Module, Debug)]
pub struct Snail<B: Backend> {
    encoder: ConvEmbedding<B>,
    attention1: AttentionBlock<B>,
    tc1: TCBlock<B>,
    attention2: AttentionBlock<B>,
    tc2: TCBlock<B>,
    attention3: AttentionBlock<B>,
    head: Linear<B>,
    num_cls: usize,
}

impl<B: Backend> Snail<B> {
    /// Forward pass over one episode.
    ///
    /// The last row of `labels` (the query) is zeroed so the model never
    /// sees the answer it is asked to predict.
    pub fn forward(&self, images: Tensor<B, 4>, labels: Tensor<B, 2>) -> Tensor<B, 3> {
        let [seq_len, width] = labels.dims();
        let device = labels.device();

        let hidden_label = Tensor::<B, 2>::zeros([1, width], &device);
        let labels = labels.slice_assign([seq_len - 1..seq_len, 0..width], hidden_label);

        let features = self.encoder.forward(images);
        let x = Tensor::cat(vec![features, labels], 1).unsqueeze_dim::<3>(0);

        let x = self.attention1.forward(x);
        let x = self.tc1.forward(x);
        let x = self.attention2.forward(x);
        let x = self.tc2.forward(x);
        let x = self.attention3.forward(x);
        self.head.forward(x)
    }
}

impl<B: Backend> EpisodicModel<B> for Snail<B> {
    fn num_classes(&self) -> usize {
        self.num_cls
    }

    fn forward_labeled(&self, images: Tensor<B, 4>, labels: Tensor<B, 2>) -> Tensor<B, 3> {
        self.forward(images, labels)
    }

    fn forward_unlabeled(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.encoder.forward(images)
    }

    fn check_episode(&self, batch: &EpisodeBatch) -> Result<(), EpisodeError> {
        self.encoder.check_image_shape(batch.image_shape)
    }
}
