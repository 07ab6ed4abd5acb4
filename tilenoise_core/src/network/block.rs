//! Residual building blocks of the denoising network.
//!
//! Each residual block runs two conv blocks and adds a (possibly
//! projected) skip. Conditioning enters through two affine modulations in
//! the first conv block: a per-channel one from the diffusion-time
//! embedding and a per-pixel one from the conditioning field (applied
//! through a small convolutional head).

use ndarray::{concatenate, Array1, Array3, Axis};
use serde::{Deserialize, Serialize};

use super::init::WeightInit;
use super::ops::{nearest_resize, silu, silu_inplace, space_to_depth, upsample_nearest_x2, Conv2d, GroupNorm, Linear};

/// Weight-standardized conv + group norm + affine modulation + SiLU.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConvBlock {
    pub proj: Conv2d,
    pub norm: GroupNorm,
}

impl ConvBlock {
    pub fn forward(
        &self,
        x: &Array3<f32>,
        time_scale_shift: Option<(&Array1<f32>, &Array1<f32>)>,
        spatial_scale_shift: Option<(&Array3<f32>, &Array3<f32>)>,
    ) -> Array3<f32> {
        let mut out = self.norm.forward(&self.proj.forward(x));

        if let Some((gamma, beta)) = time_scale_shift {
            for (ch, mut plane) in out.outer_iter_mut().enumerate() {
                let g = gamma[ch] + 1.0;
                let b = beta[ch];
                plane.mapv_inplace(|v| v * g + b);
            }
        }

        if let Some((gamma, beta)) = spatial_scale_shift {
            ndarray::Zip::from(&mut out)
                .and(gamma)
                .and(beta)
                .for_each(|v, &g, &b| *v = *v * (g + 1.0) + b);
        }

        silu_inplace(&mut out);
        out
    }
}

/// Convolutional head turning the conditioning field into a spatially
/// varying scale and shift.
#[derive(Clone, Serialize, Deserialize)]
pub struct SpatialConditioning {
    pub conv_in: Conv2d,
    pub to_gamma: Conv2d,
    pub to_beta: Conv2d,
}

impl SpatialConditioning {
    /// Produce `(gamma, beta)` at the resolution of the current state,
    /// nearest-resampling the field when the level runs coarser.
    pub fn forward(&self, cond: &Array3<f32>, height: usize, width: usize) -> (Array3<f32>, Array3<f32>) {
        let resized = nearest_resize(cond, height, width);
        let mut activated = resized;
        silu_inplace(&mut activated);
        let mut hidden = self.conv_in.forward(&activated);
        silu_inplace(&mut hidden);
        (self.to_gamma.forward(&hidden), self.to_beta.forward(&hidden))
    }
}

/// Residual block conditioned on time and, optionally, the field.
#[derive(Clone, Serialize, Deserialize)]
pub struct ResnetBlock {
    pub time_mlp: Linear,
    pub spatial: Option<SpatialConditioning>,
    pub block1: ConvBlock,
    pub block2: ConvBlock,
    pub res_conv: Option<Conv2d>,
}

impl ResnetBlock {
    pub fn new(
        init: &mut WeightInit,
        dim_in: usize,
        dim_out: usize,
        time_dim: usize,
        groups: usize,
        cond_dim: Option<usize>,
    ) -> Self {
        Self {
            time_mlp: init.linear(dim_out * 2, time_dim),
            spatial: cond_dim.map(|cd| SpatialConditioning {
                conv_in: init.conv(dim_out, cd, 3),
                to_gamma: init.conv(dim_out, dim_out, 3),
                to_beta: init.conv(dim_out, dim_out, 3),
            }),
            block1: ConvBlock {
                proj: init.conv_weight_standardized(dim_out, dim_in, 3),
                norm: init.group_norm(groups, dim_out),
            },
            block2: ConvBlock {
                proj: init.conv_weight_standardized(dim_out, dim_out, 3),
                norm: init.group_norm(groups, dim_out),
            },
            res_conv: (dim_in != dim_out).then(|| init.conv(dim_out, dim_in, 1)),
        }
    }

    pub fn forward(
        &self,
        x: &Array3<f32>,
        time_emb: &Array1<f32>,
        cond: Option<&Array3<f32>>,
    ) -> Array3<f32> {
        let activated_time = time_emb.mapv(silu);
        let projected = self.time_mlp.forward(&activated_time);
        let half = projected.len() / 2;
        let gamma = projected.slice(ndarray::s![..half]).to_owned();
        let beta = projected.slice(ndarray::s![half..]).to_owned();

        let spatial = match (&self.spatial, cond) {
            (Some(head), Some(field)) => {
                let (_, h, w) = x.dim();
                Some(head.forward(field, h, w))
            }
            _ => None,
        };

        let h1 = self.block1.forward(
            x,
            Some((&gamma, &beta)),
            spatial.as_ref().map(|(g, b)| (g, b)),
        );
        let h2 = self.block2.forward(&h1, None, None);

        match &self.res_conv {
            Some(conv) => h2 + conv.forward(x),
            None => h2 + x,
        }
    }
}

/// Resolution transition at the end of a ladder stage.
#[derive(Clone, Serialize, Deserialize)]
pub enum Transition {
    /// Space-to-depth fold followed by a 1x1 projection (halves extent).
    Down(Conv2d),
    /// Nearest-neighbor upsample followed by a 3x3 conv (doubles extent).
    Up(Conv2d),
    /// Plain 3x3 conv at unchanged resolution (final stage of a ladder).
    Keep(Conv2d),
}

impl Transition {
    pub fn forward(&self, x: &Array3<f32>) -> Array3<f32> {
        match self {
            Transition::Down(conv) => conv.forward(&space_to_depth(x)),
            Transition::Up(conv) => conv.forward(&upsample_nearest_x2(x)),
            Transition::Keep(conv) => conv.forward(x),
        }
    }
}

/// Concatenate two tensors along the channel axis.
pub fn cat_channels(a: &Array3<f32>, b: &Array3<f32>) -> Array3<f32> {
    concatenate(Axis(0), &[a.view(), b.view()]).expect("channel concat shapes agree")
}
