//! Self-attention over flattened spatial positions.
//!
//! Interior resolution levels use the linear-cost variant; the bottleneck
//! uses full quadratic attention. Both are wrapped in a pre-norm residual
//! so an attention stage can never destroy its input signal.

use ndarray::{s, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use super::ops::{softmax_axis, ChanLayerNorm, Conv2d};

/// Linear-cost attention (softmax kernel factorization).
#[derive(Clone, Serialize, Deserialize)]
pub struct LinearAttention {
    pub heads: usize,
    pub dim_head: usize,
    pub to_qkv: Conv2d,
    pub to_out: Conv2d,
    pub out_norm: ChanLayerNorm,
}

impl LinearAttention {
    pub fn forward(&self, x: &Array3<f32>) -> Array3<f32> {
        let (_, h, w) = x.dim();
        let n = h * w;
        let hidden = self.heads * self.dim_head;
        let scale = (self.dim_head as f32).powf(-0.5);

        let qkv = self.to_qkv.forward(x);
        let flat = qkv
            .to_shape((3 * hidden, n))
            .expect("qkv projection uses contiguous layout");

        let mut out_flat = Array2::<f32>::zeros((hidden, n));
        for head in 0..self.heads {
            let lo = head * self.dim_head;
            let hi = lo + self.dim_head;
            let mut q = flat.slice(s![lo..hi, ..]).to_owned();
            let mut k = flat.slice(s![hidden + lo..hidden + hi, ..]).to_owned();
            let mut v = flat.slice(s![2 * hidden + lo..2 * hidden + hi, ..]).to_owned();

            softmax_axis(&mut q, Axis(0));
            softmax_axis(&mut k, Axis(1));
            q.mapv_inplace(|val| val * scale);
            v.mapv_inplace(|val| val / n as f32);

            let context = k.dot(&v.t());
            let head_out = context.t().dot(&q);
            out_flat.slice_mut(s![lo..hi, ..]).assign(&head_out);
        }

        let folded = out_flat
            .into_shape_with_order((hidden, h, w))
            .expect("attention output uses contiguous layout");
        self.out_norm.forward(&self.to_out.forward(&folded))
    }
}

/// Full quadratic attention, used at the bottleneck resolution.
#[derive(Clone, Serialize, Deserialize)]
pub struct FullAttention {
    pub heads: usize,
    pub dim_head: usize,
    pub to_qkv: Conv2d,
    pub to_out: Conv2d,
}

impl FullAttention {
    pub fn forward(&self, x: &Array3<f32>) -> Array3<f32> {
        let (_, h, w) = x.dim();
        let n = h * w;
        let hidden = self.heads * self.dim_head;
        let scale = (self.dim_head as f32).powf(-0.5);

        let qkv = self.to_qkv.forward(x);
        let flat = qkv
            .to_shape((3 * hidden, n))
            .expect("qkv projection uses contiguous layout");

        let mut out_flat = Array2::<f32>::zeros((hidden, n));
        for head in 0..self.heads {
            let lo = head * self.dim_head;
            let hi = lo + self.dim_head;
            let mut q = flat.slice(s![lo..hi, ..]).to_owned();
            let k = flat.slice(s![hidden + lo..hidden + hi, ..]);
            let v = flat.slice(s![2 * hidden + lo..2 * hidden + hi, ..]);

            q.mapv_inplace(|val| val * scale);
            let mut sim = q.t().dot(&k);
            softmax_axis(&mut sim, Axis(1));
            let head_out = sim.dot(&v.t());
            out_flat.slice_mut(s![lo..hi, ..]).assign(&head_out.t());
        }

        let folded = out_flat
            .into_shape_with_order((hidden, h, w))
            .expect("attention output uses contiguous layout");
        self.to_out.forward(&folded)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub enum AttentionKind {
    Linear(LinearAttention),
    Full(FullAttention),
}

/// Pre-norm residual attention stage.
#[derive(Clone, Serialize, Deserialize)]
pub struct AttentionBlock {
    pub norm: ChanLayerNorm,
    pub kind: AttentionKind,
}

impl AttentionBlock {
    pub fn forward(&self, x: &Array3<f32>) -> Array3<f32> {
        let normed = self.norm.forward(x);
        let attended = match &self.kind {
            AttentionKind::Linear(attn) => attn.forward(&normed),
            AttentionKind::Full(attn) => attn.forward(&normed),
        };
        attended + x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::init::WeightInit;

    #[test]
    fn test_linear_attention_preserves_shape() {
        let mut init = WeightInit::new(7);
        let attn = init.linear_attention(6, 2, 4);
        let x = ndarray::Array3::from_shape_simple_fn((6, 4, 4), || 0.3_f32);
        let out = attn.forward(&x);
        assert_eq!(out.dim(), (6, 4, 4));
    }

    #[test]
    fn test_full_attention_preserves_shape() {
        let mut init = WeightInit::new(7);
        let attn = init.full_attention(6, 2, 4);
        let x = ndarray::Array3::from_shape_simple_fn((6, 3, 3), || 0.1_f32);
        let out = attn.forward(&x);
        assert_eq!(out.dim(), (6, 3, 3));
    }

    #[test]
    fn test_attention_block_is_residual() {
        let mut init = WeightInit::new(11);
        let block = AttentionBlock {
            norm: ChanLayerNorm::new(4),
            kind: AttentionKind::Linear(init.linear_attention(4, 1, 4)),
        };
        // A zero input stays zero: the pre-norm path sees zeros (bias-free
        // qkv), and the residual adds the zero input back.
        let x = ndarray::Array3::<f32>::zeros((4, 4, 4));
        let out = block.forward(&x);
        for v in out.iter() {
            assert!(v.abs() < 1e-6);
        }
    }
}
