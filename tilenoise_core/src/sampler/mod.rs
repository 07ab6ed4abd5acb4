//! Reverse-diffusion sampling.
//!
//! A sampling call owns its latent state for the duration of one strictly
//! sequential pass over a reduced timestep schedule; nothing is carried
//! between calls. The schedule arithmetic must match the one the network
//! was trained against; a mismatch degrades output quality without
//! raising an error, so the schedule family is part of the model's
//! deployment configuration, not a per-request choice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::conditioning::ConditioningField;
use crate::error::{SynthesisError, SynthesisResult};
use crate::network::NoiseUnet;

/// Family of the noise schedule the network was trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Linear,
    Cosine,
}

/// Precomputed noise schedule plus the reduced sampling subsequence.
///
/// Built once per sampler configuration and shared read-only across all
/// sampling calls for the process lifetime.
#[derive(Debug, Clone)]
pub struct Schedule {
    alpha_cumprod: Vec<f32>,
    step_pairs: Vec<(isize, isize)>,
}

impl Schedule {
    /// Build a schedule over `train_timesteps` noise levels, sampled at
    /// `sample_timesteps` points (strictly descending to the clean end).
    pub fn new(train_timesteps: usize, sample_timesteps: usize, kind: ScheduleKind) -> Self {
        assert!(train_timesteps >= 2, "training horizon too short");
        assert!(
            (1..=train_timesteps).contains(&sample_timesteps),
            "sample step count must lie within the training horizon"
        );

        let betas = match kind {
            ScheduleKind::Linear => linear_betas(train_timesteps),
            ScheduleKind::Cosine => cosine_betas(train_timesteps),
        };
        let mut alpha_cumprod = Vec::with_capacity(train_timesteps);
        let mut running = 1.0_f64;
        for beta in betas {
            running *= 1.0 - beta;
            alpha_cumprod.push(running as f32);
        }

        // Evenly spaced sampling times from the horizon down to the -1
        // sentinel that marks the clean image.
        let count = sample_timesteps + 1;
        let mut times: Vec<isize> = (0..count)
            .map(|i| {
                -1 + (i as f64 * train_timesteps as f64 / sample_timesteps as f64).round() as isize
            })
            .collect();
        for t in times.iter_mut() {
            *t = (*t).min(train_timesteps as isize - 1);
        }
        times.dedup();
        let step_pairs: Vec<(isize, isize)> = times
            .windows(2)
            .rev()
            .map(|pair| (pair[1], pair[0]))
            .collect();

        Self {
            alpha_cumprod,
            step_pairs,
        }
    }

    pub fn len(&self) -> usize {
        self.step_pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.step_pairs.is_empty()
    }

    pub fn train_timesteps(&self) -> usize {
        self.alpha_cumprod.len()
    }

    /// The descending `(t, t_next)` pairs driven by the sampler.
    pub fn step_pairs(&self) -> &[(isize, isize)] {
        &self.step_pairs
    }

    pub fn alpha_cumprod(&self, t: usize) -> f32 {
        self.alpha_cumprod[t]
    }
}

fn linear_betas(timesteps: usize) -> Vec<f64> {
    let scale = 1000.0 / timesteps as f64;
    let start = scale * 1e-4;
    let end = scale * 0.02;
    (0..timesteps)
        .map(|i| start + (end - start) * i as f64 / (timesteps - 1) as f64)
        .collect()
}

fn cosine_betas(timesteps: usize) -> Vec<f64> {
    let s = 0.008_f64;
    let f = |t: f64| {
        let inner = (t / timesteps as f64 + s) / (1.0 + s) * std::f64::consts::FRAC_PI_2;
        inner.cos().powi(2)
    };
    (0..timesteps)
        .map(|i| {
            let beta = 1.0 - f((i + 1) as f64) / f(i as f64).max(f64::MIN_POSITIVE);
            beta.clamp(1e-8, 0.999)
        })
        .collect()
}

/// Shared cancellation flag checked between diffusion steps.
///
/// Step boundaries are the only safe points; raising the token mid-step
/// takes effect before the next one.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Per-request sampling options.
#[derive(Debug, Clone, Default)]
pub struct SampleOptions {
    /// Seed for the initial latent noise (and any ancestral noise).
    pub seed: u64,
    /// Optional cooperative cancellation token.
    pub cancel: Option<CancelToken>,
}

impl SampleOptions {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed,
            cancel: None,
        }
    }
}

/// Drives the reverse-diffusion loop against a frozen network.
#[derive(Debug, Clone)]
pub struct DiffusionSampler {
    schedule: Schedule,
    /// Ancestral-noise strength: 0 is fully deterministic, 1 recovers
    /// ancestral sampling.
    eta: f32,
}

impl DiffusionSampler {
    pub fn new(schedule: Schedule, eta: f32) -> Self {
        Self {
            schedule,
            eta: eta.clamp(0.0, 1.0),
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Run the full reverse process and return an image in `[0, 1]`.
    ///
    /// The latent starts as seeded gaussian noise at the field's
    /// resolution. Any network failure aborts the sample; there is no
    /// partial result.
    pub fn sample(
        &self,
        model: &NoiseUnet,
        field: &ConditioningField,
        options: &SampleOptions,
    ) -> SynthesisResult<Array3<f32>> {
        let channels = model.config().channels;
        let (height, width) = (field.height(), field.width());

        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut state: Array3<f32> =
            Array3::from_shape_simple_fn((channels, height, width), || {
                rng.sample::<f32, _>(StandardNormal)
            });

        for (step, &(time, time_next)) in self.schedule.step_pairs().iter().enumerate() {
            if let Some(token) = &options.cancel {
                if token.is_cancelled() {
                    return Err(SynthesisError::cancelled(step));
                }
            }

            let timestep = time as usize;
            let predicted = model
                .predict(&state, timestep, field)
                .map_err(|cause| SynthesisError::sampling_failed(step, timestep, cause))?;

            let alpha = self.schedule.alpha_cumprod(timestep);
            let sqrt_alpha = alpha.sqrt();
            let sqrt_one_minus = (1.0 - alpha).sqrt();

            // Clamped clean-image estimate, then a noise estimate
            // consistent with the clamp.
            let mut x_start = ndarray::Zip::from(&state)
                .and(&predicted)
                .map_collect(|&x, &eps| (x - sqrt_one_minus * eps) / sqrt_alpha);
            x_start.mapv_inplace(|v| v.clamp(-1.0, 1.0));
            let eps = ndarray::Zip::from(&state)
                .and(&x_start)
                .map_collect(|&x, &x0| (x - sqrt_alpha * x0) / sqrt_one_minus.max(1e-8));

            if time_next < 0 {
                state = x_start;
                continue;
            }

            let alpha_next = self.schedule.alpha_cumprod(time_next as usize);
            let sigma = self.eta
                * ((1.0 - alpha / alpha_next) * (1.0 - alpha_next) / (1.0 - alpha))
                    .max(0.0)
                    .sqrt();
            let dir_coeff = (1.0 - alpha_next - sigma * sigma).max(0.0).sqrt();
            let sqrt_alpha_next = alpha_next.sqrt();

            state = ndarray::Zip::from(&x_start)
                .and(&eps)
                .map_collect(|&x0, &e| sqrt_alpha_next * x0 + dir_coeff * e);
            if sigma > 0.0 {
                state.mapv_inplace(|v| v + sigma * rng.sample::<f32, _>(StandardNormal));
            }
        }

        // Rescale from the model range to display range, clipping.
        state.mapv_inplace(|v| ((v + 1.0) * 0.5).clamp(0.0, 1.0));
        Ok(state)
    }
}
