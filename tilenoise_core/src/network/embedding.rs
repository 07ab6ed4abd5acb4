//! Time and conditioning embeddings.

use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};

use super::ops::{gelu, Linear};

/// Sinusoidal embedding of a scalar diffusion timestep.
///
/// Half the channels carry sines, half cosines, over a geometric
/// frequency ladder spanning four decades.
pub fn sinusoidal_time_embedding(timestep: f32, dim: usize) -> Array1<f32> {
    let half = dim / 2;
    let step = (10_000.0_f32).ln() / (half.saturating_sub(1).max(1)) as f32;
    let mut out = Array1::zeros(half * 2);
    for i in 0..half {
        let freq = (-(step * i as f32)).exp();
        out[i] = (timestep * freq).sin();
        out[half + i] = (timestep * freq).cos();
    }
    out
}

/// Two-layer GELU MLP over the sinusoidal time embedding.
#[derive(Clone, Serialize, Deserialize)]
pub struct TimeMlp {
    pub lin1: Linear,
    pub lin2: Linear,
}

impl TimeMlp {
    pub fn forward(&self, embedded: &Array1<f32>) -> Array1<f32> {
        let hidden = self.lin1.forward(embedded).mapv(gelu);
        self.lin2.forward(&hidden)
    }
}

/// Per-pixel two-layer GELU MLP mapping the raw conditioning field into
/// the channel width the residual blocks consume.
#[derive(Clone, Serialize, Deserialize)]
pub struct CondMlp {
    pub lin1: Linear,
    pub lin2: Linear,
}

impl CondMlp {
    pub fn forward_pixels(&self, field: &Array3<f32>) -> Array3<f32> {
        let mut hidden = self.lin1.forward_pixels(field);
        hidden.mapv_inplace(gelu);
        self.lin2.forward_pixels(&hidden)
    }
}

/// Learned per-class embedding table.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClassEmbedding {
    pub weight: Array2<f32>,
}

impl ClassEmbedding {
    pub fn row(&self, class_index: usize) -> ndarray::ArrayView1<'_, f32> {
        self.weight.row(class_index)
    }

    pub fn dim(&self) -> usize {
        self.weight.dim().1
    }
}
