//! Deterministic random weight construction.
//!
//! A seeded initializer makes every network layer reproducible, which the
//! test suite and preview flows rely on. Pretrained deployments replace
//! these weights wholesale via checkpoint loading.

use ndarray::{Array1, Array2, Array4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use super::attention::{FullAttention, LinearAttention};
use super::ops::{ChanLayerNorm, Conv2d, GroupNorm, Linear};

/// Seeded source of freshly initialized layers.
pub struct WeightInit {
    rng: StdRng,
}

impl WeightInit {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn normal(&mut self, std: f32) -> f32 {
        let sample: f32 = self.rng.sample(StandardNormal);
        sample * std
    }

    fn kernel(&mut self, out_c: usize, in_c: usize, k: usize) -> Array4<f32> {
        let std = 1.0 / ((in_c * k * k) as f32).sqrt();
        Array4::from_shape_simple_fn((out_c, in_c, k, k), || self.normal(std))
    }

    pub fn conv(&mut self, out_c: usize, in_c: usize, k: usize) -> Conv2d {
        Conv2d::new(self.kernel(out_c, in_c, k), Some(Array1::zeros(out_c)))
    }

    pub fn conv_no_bias(&mut self, out_c: usize, in_c: usize, k: usize) -> Conv2d {
        Conv2d::new(self.kernel(out_c, in_c, k), None)
    }

    pub fn conv_weight_standardized(&mut self, out_c: usize, in_c: usize, k: usize) -> Conv2d {
        Conv2d::weight_standardized(self.kernel(out_c, in_c, k), Some(Array1::zeros(out_c)))
    }

    pub fn linear(&mut self, out_dim: usize, in_dim: usize) -> Linear {
        let std = 1.0 / (in_dim as f32).sqrt();
        Linear {
            weight: Array2::from_shape_simple_fn((out_dim, in_dim), || self.normal(std)),
            bias: Array1::zeros(out_dim),
        }
    }

    pub fn embedding(&mut self, rows: usize, dim: usize) -> Array2<f32> {
        Array2::from_shape_simple_fn((rows, dim), || self.normal(1.0))
    }

    pub fn group_norm(&mut self, groups: usize, channels: usize) -> GroupNorm {
        GroupNorm::new(groups, channels)
    }

    pub fn linear_attention(&mut self, dim: usize, heads: usize, dim_head: usize) -> LinearAttention {
        let hidden = heads * dim_head;
        LinearAttention {
            heads,
            dim_head,
            to_qkv: self.conv_no_bias(hidden * 3, dim, 1),
            to_out: self.conv(dim, hidden, 1),
            out_norm: ChanLayerNorm::new(dim),
        }
    }

    pub fn full_attention(&mut self, dim: usize, heads: usize, dim_head: usize) -> FullAttention {
        let hidden = heads * dim_head;
        FullAttention {
            heads,
            dim_head,
            to_qkv: self.conv_no_bias(hidden * 3, dim, 1),
            to_out: self.conv(dim, hidden, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_weights() {
        let a = WeightInit::new(99).conv(4, 2, 3);
        let b = WeightInit::new(99).conv(4, 2, 3);
        assert_eq!(a.weight, b.weight);
    }

    #[test]
    fn test_different_seed_different_weights() {
        let a = WeightInit::new(1).conv(4, 2, 3);
        let b = WeightInit::new(2).conv(4, 2, 3);
        assert_ne!(a.weight, b.weight);
    }

    #[test]
    fn test_fan_in_scaling() {
        let conv = WeightInit::new(5).conv(8, 16, 3);
        let spread = conv
            .weight
            .iter()
            .map(|v| v * v)
            .sum::<f32>()
            / conv.weight.len() as f32;
        // Variance should sit near 1 / fan_in = 1 / 144.
        assert!(spread < 3.0 / 144.0);
        assert!(spread > 0.2 / 144.0);
    }
}
