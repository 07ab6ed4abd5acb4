//! Low-level tensor operations for the denoising network.
//!
//! All spatial operators treat the image domain as a torus: convolutions
//! pad by wrapping the opposite edge, never with zeros. This holds at
//! every layer so that generated images tile seamlessly.

use ndarray::parallel::prelude::*;
use ndarray::{s, Array1, Array2, Array3, Array4, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Wrap a possibly negative coordinate onto `[0, n)`.
#[inline]
fn wrap(i: isize, n: usize) -> usize {
    i.rem_euclid(n as isize) as usize
}

#[inline]
pub fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

#[inline]
pub fn silu(v: f32) -> f32 {
    v * sigmoid(v)
}

/// Tanh-approximated GELU.
#[inline]
pub fn gelu(v: f32) -> f32 {
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    0.5 * v * (1.0 + (SQRT_2_OVER_PI * (v + 0.044_715 * v * v * v)).tanh())
}

pub fn silu_inplace(x: &mut Array3<f32>) {
    x.par_mapv_inplace(silu);
}

/// A 2-D convolution with toroidal padding.
///
/// `weight` is `(out, in, kh, kw)`; same-padding is derived from the
/// kernel size. When `weight_standardized` is set, each output channel's
/// kernel is normalized to zero mean and unit variance before use.
#[derive(Clone, Serialize, Deserialize)]
pub struct Conv2d {
    pub weight: Array4<f32>,
    pub bias: Option<Array1<f32>>,
    pub weight_standardized: bool,
}

impl Conv2d {
    pub fn new(weight: Array4<f32>, bias: Option<Array1<f32>>) -> Self {
        Self {
            weight,
            bias,
            weight_standardized: false,
        }
    }

    pub fn weight_standardized(weight: Array4<f32>, bias: Option<Array1<f32>>) -> Self {
        Self {
            weight,
            bias,
            weight_standardized: true,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.weight.dim().1
    }

    pub fn out_channels(&self) -> usize {
        self.weight.dim().0
    }

    /// Kernel with per-output-channel standardization applied when enabled.
    fn effective_weight(&self) -> Array4<f32> {
        if !self.weight_standardized {
            return self.weight.clone();
        }
        let eps = 1e-5_f32;
        let mut weight = self.weight.clone();
        for mut kernel in weight.outer_iter_mut() {
            let n = kernel.len() as f32;
            let mean = kernel.sum() / n;
            let var = kernel.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
            let inv_std = 1.0 / (var + eps).sqrt();
            kernel.mapv_inplace(|v| (v - mean) * inv_std);
        }
        weight
    }

    pub fn forward(&self, x: &Array3<f32>) -> Array3<f32> {
        let (out_c, in_c, kh, kw) = self.weight.dim();
        let (c, h, w) = x.dim();
        assert_eq!(c, in_c, "convolution input channels must match kernel");

        let weight = self.effective_weight();
        let pad_y = (kh / 2) as isize;
        let pad_x = (kw / 2) as isize;

        let mut out = Array3::<f32>::zeros((out_c, h, w));
        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(o, mut plane)| {
                for i in 0..in_c {
                    let input = x.index_axis(Axis(0), i);
                    for ky in 0..kh {
                        let row_offsets: Vec<usize> =
                            (0..h).map(|y| wrap(y as isize + ky as isize - pad_y, h)).collect();
                        for kx in 0..kw {
                            let col_offsets: Vec<usize> = (0..w)
                                .map(|x0| wrap(x0 as isize + kx as isize - pad_x, w))
                                .collect();
                            let wv = weight[[o, i, ky, kx]];
                            for y in 0..h {
                                let src_row = input.index_axis(Axis(0), row_offsets[y]);
                                for x0 in 0..w {
                                    plane[[y, x0]] += wv * src_row[col_offsets[x0]];
                                }
                            }
                        }
                    }
                }
                if let Some(bias) = &self.bias {
                    let b = bias[o];
                    plane.mapv_inplace(|v| v + b);
                }
            });
        out
    }
}

/// Group normalization over `(channels/groups, height, width)` groups.
#[derive(Clone, Serialize, Deserialize)]
pub struct GroupNorm {
    pub groups: usize,
    pub gamma: Array1<f32>,
    pub beta: Array1<f32>,
    pub eps: f32,
}

impl GroupNorm {
    pub fn new(groups: usize, channels: usize) -> Self {
        assert!(
            groups > 0 && channels % groups == 0,
            "group count must divide channels"
        );
        Self {
            groups,
            gamma: Array1::ones(channels),
            beta: Array1::zeros(channels),
            eps: 1e-5,
        }
    }

    pub fn forward(&self, x: &Array3<f32>) -> Array3<f32> {
        let (c, _, _) = x.dim();
        assert_eq!(c, self.gamma.len(), "group norm channel mismatch");
        let per_group = c / self.groups;

        let mut out = x.clone();
        for g in 0..self.groups {
            let start = g * per_group;
            let end = start + per_group;
            let group = x.slice(s![start..end, .., ..]);
            let n = group.len() as f32;
            let mean = group.sum() / n;
            let var = group.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
            let inv_std = 1.0 / (var + self.eps).sqrt();

            let mut target = out.slice_mut(s![start..end, .., ..]);
            for (local, mut plane) in target.outer_iter_mut().enumerate() {
                let ch = start + local;
                let gamma = self.gamma[ch];
                let beta = self.beta[ch];
                plane.mapv_inplace(|v| (v - mean) * inv_std * gamma + beta);
            }
        }
        out
    }
}

/// Per-pixel normalization over the channel axis with a learned gain.
#[derive(Clone, Serialize, Deserialize)]
pub struct ChanLayerNorm {
    pub gain: Array1<f32>,
    pub eps: f32,
}

impl ChanLayerNorm {
    pub fn new(channels: usize) -> Self {
        Self {
            gain: Array1::ones(channels),
            eps: 1e-5,
        }
    }

    pub fn forward(&self, x: &Array3<f32>) -> Array3<f32> {
        let (c, h, w) = x.dim();
        assert_eq!(c, self.gain.len(), "layer norm channel mismatch");

        let mut out = Array3::<f32>::zeros((c, h, w));
        for y in 0..h {
            for x0 in 0..w {
                let mut mean = 0.0_f32;
                for ch in 0..c {
                    mean += x[[ch, y, x0]];
                }
                mean /= c as f32;
                let mut var = 0.0_f32;
                for ch in 0..c {
                    let d = x[[ch, y, x0]] - mean;
                    var += d * d;
                }
                var /= c as f32;
                let inv_std = 1.0 / (var + self.eps).sqrt();
                for ch in 0..c {
                    out[[ch, y, x0]] = (x[[ch, y, x0]] - mean) * inv_std * self.gain[ch];
                }
            }
        }
        out
    }
}

/// A dense layer `y = Wx + b`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Linear {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl Linear {
    pub fn forward(&self, x: &Array1<f32>) -> Array1<f32> {
        self.weight.dot(x) + &self.bias
    }

    /// Apply the layer independently at every spatial position of a
    /// `(in, height, width)` tensor.
    pub fn forward_pixels(&self, x: &Array3<f32>) -> Array3<f32> {
        let (c, h, w) = x.dim();
        assert_eq!(c, self.weight.dim().1, "pixelwise linear input mismatch");
        let flat = x
            .to_shape((c, h * w))
            .expect("input tensor uses contiguous layout");
        let mut out = self.weight.dot(&flat);
        for (mut row, &b) in out.outer_iter_mut().zip(self.bias.iter()) {
            row.mapv_inplace(|v| v + b);
        }
        out.into_shape_with_order((self.weight.dim().0, h, w))
            .expect("matmul output uses contiguous layout")
    }
}

/// Softmax along the given axis, in place.
pub fn softmax_axis(m: &mut Array2<f32>, axis: Axis) {
    for mut lane in m.lanes_mut(axis) {
        let max = lane.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0_f32;
        for v in lane.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in lane.iter_mut() {
            *v /= sum;
        }
    }
}

/// Nearest-neighbor resize to an arbitrary resolution.
pub fn nearest_resize(x: &Array3<f32>, out_h: usize, out_w: usize) -> Array3<f32> {
    let (c, h, w) = x.dim();
    if (h, w) == (out_h, out_w) {
        return x.clone();
    }
    let mut out = Array3::<f32>::zeros((c, out_h, out_w));
    let row_map: Vec<usize> = (0..out_h).map(|y| (y * h / out_h).min(h - 1)).collect();
    let col_map: Vec<usize> = (0..out_w).map(|x0| (x0 * w / out_w).min(w - 1)).collect();
    Zip::indexed(&mut out).for_each(|(ch, y, x0), v| {
        *v = x[[ch, row_map[y], col_map[x0]]];
    });
    out
}

/// Double the spatial resolution by repeating each pixel.
pub fn upsample_nearest_x2(x: &Array3<f32>) -> Array3<f32> {
    let (c, h, w) = x.dim();
    let mut out = Array3::<f32>::zeros((c, h * 2, w * 2));
    Zip::indexed(&mut out).par_for_each(|(ch, y, x0), v| {
        *v = x[[ch, y / 2, x0 / 2]];
    });
    out
}

/// Fold each 2x2 spatial block into four channels.
///
/// Channel layout matches the training-time rearrange: output channel
/// `c * 4 + dy * 2 + dx` holds input channel `c` at offset `(dy, dx)`.
pub fn space_to_depth(x: &Array3<f32>) -> Array3<f32> {
    let (c, h, w) = x.dim();
    assert!(h % 2 == 0 && w % 2 == 0, "space-to-depth needs even extents");
    let mut out = Array3::<f32>::zeros((c * 4, h / 2, w / 2));
    Zip::indexed(&mut out).par_for_each(|(oc, y, x0), v| {
        let ch = oc / 4;
        let dy = (oc % 4) / 2;
        let dx = oc % 2;
        *v = x[[ch, y * 2 + dy, x0 * 2 + dx]];
    });
    out
}
