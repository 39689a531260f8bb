//! SNAIL building blocks: causal dilated convolutions (dense and TC
//! blocks) and causal soft attention.
//!
//! All blocks take and return `(batch, seq_len, channels)` tensors and
//! append their output channels to the input, so every block grows the
//! channel dimension by a known amount.

use burn::nn::conv::{Conv1d, Conv1dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig1d};
use burn::prelude::*;
use burn::tensor::activation::{sigmoid, softmax};
use burn::tensor::TensorData;

/// Number of dense blocks a TC block needs to see `seq_len` steps back.
pub fn tc_depth(seq_len: usize) -> usize {
    let mut depth = 0;
    while (1usize << depth) < seq_len {
        depth += 1;
    }
    depth.max(1)
}

/// Causal dilated convolution with a gated activation.
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    conv_filter: Conv1d<B>,
    conv_gate: Conv1d<B>,
    dilation: usize,
}

impl<B: Backend> DenseBlock<B> {
    pub fn new(d_in: usize, filters: usize, dilation: usize, device: &B::Device) -> Self {
        let conv = || {
            Conv1dConfig::new(d_in, filters, 2)
                .with_dilation(dilation)
                .with_padding(PaddingConfig1d::Explicit(dilation))
                .init(device)
        };
        Self {
            conv_filter: conv(),
            conv_gate: conv(),
            dilation,
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, seq_len, _] = x.dims();
        let channels_first = x.clone().swap_dims(1, 2);

        // Symmetric padding of `dilation` then dropping the tail keeps step t
        // from seeing anything after t.
        let causal = |conv: &Conv1d<B>| {
            let out = conv.forward(channels_first.clone());
            let [_, filters, _] = out.dims();
            out.slice([0..batch, 0..filters, 0..seq_len])
        };
        let filter = causal(&self.conv_filter).tanh();
        let gate = sigmoid(causal(&self.conv_gate));
        let activations = (filter * gate).swap_dims(1, 2);

        Tensor::cat(vec![x, activations], 2)
    }

    pub fn dilation(&self) -> usize {
        self.dilation
    }
}

/// Stack of dense blocks with dilations 1, 2, 4, … covering `seq_len`.
#[derive(Module, Debug)]
pub struct TCBlock<B: Backend> {
    blocks: Vec<DenseBlock<B>>,
}

impl<B: Backend> TCBlock<B> {
    pub fn new(d_in: usize, seq_len: usize, filters: usize, device: &B::Device) -> Self {
        let blocks = (0..tc_depth(seq_len))
            .map(|i| DenseBlock::new(d_in + i * filters, filters, 1 << i, device))
            .collect();
        Self { blocks }
    }

    /// Channels added to the input by this block.
    pub fn output_growth(seq_len: usize, filters: usize) -> usize {
        tc_depth(seq_len) * filters
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

/// Causal single-head soft attention; the read vector is appended to the
/// input.
#[derive(Module, Debug)]
pub struct AttentionBlock<B: Backend> {
    query: Linear<B>,
    key: Linear<B>,
    value: Linear<B>,
    key_size: usize,
}

impl<B: Backend> AttentionBlock<B> {
    pub fn new(d_in: usize, key_size: usize, value_size: usize, device: &B::Device) -> Self {
        Self {
            query: LinearConfig::new(d_in, key_size).init(device),
            key: LinearConfig::new(d_in, key_size).init(device),
            value: LinearConfig::new(d_in, value_size).init(device),
            key_size,
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, seq_len, _] = x.dims();
        let device = x.device();

        let queries = self.query.forward(x.clone());
        let keys = self.key.forward(x.clone());
        let values = self.value.forward(x.clone());

        let logits = queries.matmul(keys.swap_dims(1, 2)) / (self.key_size as f64).sqrt();
        let mask = causal_mask::<B>(batch, seq_len, &device);
        let probs = softmax(logits.mask_fill(mask, -1.0e9), 2);
        let read = probs.matmul(values);

        Tensor::cat(vec![x, read], 2)
    }
}

/// Boolean mask that is `true` strictly above the diagonal (future steps).
fn causal_mask<B: Backend>(batch: usize, seq_len: usize, device: &B::Device) -> Tensor<B, 3, Bool> {
    let mut mask = Vec::with_capacity(batch * seq_len * seq_len);
    for _ in 0..batch {
        for i in 0..seq_len {
            for j in 0..seq_len {
                mask.push(j > i);
            }
        }
    }
    Tensor::from_data(TensorData::new(mask, [batch, seq_len, seq_len]), device)
}
