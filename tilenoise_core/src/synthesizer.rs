//! Public entry points for single-material and blended synthesis.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use ndarray::Array3;

use crate::checkpoint::{CheckpointError, Checkpointable};
use crate::conditioning::{blend_fields, encode_conditioning, BlendMask, ConditioningField};
use crate::config::{SamplerSettings, SynthesisConfig};
use crate::error::SynthesisResult;
use crate::logging::{self, SynthesisLogEntry};
use crate::material::MaterialSpec;
use crate::network::NoiseUnet;
use crate::sampler::{DiffusionSampler, SampleOptions, Schedule};

/// The synthesis engine: a frozen model plus a precomputed schedule.
///
/// Construct one per process and share it; concurrent requests only read
/// the model weights and schedule, each owning its own latent state.
///
/// # Examples
///
/// ```
/// use tilenoise_core::config::SynthesisConfig;
/// use tilenoise_core::material::{MaterialSpec, NoiseClass};
/// use tilenoise_core::sampler::SampleOptions;
/// use tilenoise_core::synthesizer::Synthesizer;
///
/// let mut config = SynthesisConfig::default();
/// config.model = tilenoise_core::network::ModelConfig::tiny();
/// config.sampler.train_timesteps = 100;
/// config.sampler.sample_timesteps = 4;
///
/// let engine = Synthesizer::seeded(&config);
/// let spec = MaterialSpec::with_defaults(NoiseClass::Perlin);
/// let image = engine
///     .generate(&spec, 16, 16, &SampleOptions::seeded(7))
///     .unwrap();
/// assert_eq!(image.dim(), (1, 16, 16));
/// ```
pub struct Synthesizer {
    model: Arc<NoiseUnet>,
    sampler: DiffusionSampler,
}

impl Synthesizer {
    /// Wrap an already-constructed model.
    pub fn new(model: Arc<NoiseUnet>, settings: &SamplerSettings) -> Self {
        let schedule = Schedule::new(
            settings.train_timesteps,
            settings.sample_timesteps,
            settings.schedule,
        );
        Self {
            model,
            sampler: DiffusionSampler::new(schedule, settings.eta),
        }
    }

    /// Build an engine with deterministic random weights, for previews
    /// and tests that run without a pretrained checkpoint.
    pub fn seeded(config: &SynthesisConfig) -> Self {
        let model = NoiseUnet::from_seed(config.model.clone(), config.seed);
        Self::new(Arc::new(model), &config.sampler)
    }

    /// Load the frozen model from a checkpoint file.
    ///
    /// Checkpoint failures are fatal at startup; requests never observe
    /// them.
    pub fn from_checkpoint<P: AsRef<Path>>(
        path: P,
        settings: &SamplerSettings,
    ) -> Result<Self, CheckpointError> {
        let model = NoiseUnet::load_checkpoint(path)?;
        Ok(Self::new(Arc::new(model), settings))
    }

    pub fn model(&self) -> &Arc<NoiseUnet> {
        &self.model
    }

    /// Encode one material into a conditioning field at the target
    /// resolution, using the model's own class embedding table.
    pub fn conditioning(
        &self,
        spec: &MaterialSpec,
        height: usize,
        width: usize,
    ) -> SynthesisResult<ConditioningField> {
        encode_conditioning(
            spec,
            height,
            width,
            self.model.class_embedding(spec.class()),
            self.model.config().pos_enc_levels,
        )
    }

    /// Single-material synthesis.
    pub fn generate(
        &self,
        material: &MaterialSpec,
        height: usize,
        width: usize,
        options: &SampleOptions,
    ) -> SynthesisResult<Array3<f32>> {
        let started = Instant::now();
        let result = self
            .conditioning(material, height, width)
            .and_then(|field| self.sampler.sample(&self.model, &field, options));

        self.log_request(
            "generate",
            vec![material.class().name().to_string()],
            height,
            width,
            options.seed,
            started,
            &result,
        );
        result
    }

    /// Dual-material synthesis under a spatial mask.
    ///
    /// A mask whose resolution differs from the requested output is
    /// bilinearly resized to match before blending.
    #[allow(clippy::too_many_arguments)]
    pub fn blend(
        &self,
        mask: &BlendMask,
        material_a: &MaterialSpec,
        material_b: &MaterialSpec,
        height: usize,
        width: usize,
        blending_factor: f32,
        options: &SampleOptions,
    ) -> SynthesisResult<Array3<f32>> {
        let started = Instant::now();
        let result = (|| {
            let field_a = self.conditioning(material_a, height, width)?;
            let field_b = self.conditioning(material_b, height, width)?;
            let mask = mask.resized(height, width);
            let blended = blend_fields(&field_a, &field_b, &mask, blending_factor)?;
            self.sampler.sample(&self.model, &blended, options)
        })();

        self.log_request(
            "blend",
            vec![
                material_a.class().name().to_string(),
                material_b.class().name().to_string(),
            ],
            height,
            width,
            options.seed,
            started,
            &result,
        );
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn log_request(
        &self,
        kind: &str,
        classes: Vec<String>,
        height: usize,
        width: usize,
        seed: u64,
        started: Instant,
        result: &SynthesisResult<Array3<f32>>,
    ) {
        let mut entry = SynthesisLogEntry::new(kind, classes, height, width);
        entry.steps = self.sampler.schedule().len();
        entry.seed = seed;
        entry.duration_ms = started.elapsed().as_millis();
        entry.outcome = match result {
            Ok(_) => "ok".to_string(),
            Err(err) => err.to_string(),
        };
        if let Err(err) = logging::log_synthesis(&entry) {
            eprintln!("failed to log {kind} request: {err}");
        }
    }
}

/// Convert a `[0, 1]` image tensor to 8-bit display values.
pub fn to_display_u8(image: &Array3<f32>) -> Array3<u8> {
    image.mapv(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ModelConfig;

    #[test]
    fn test_display_conversion_saturates() {
        let image = ndarray::arr3(&[[[0.0_f32, 0.5], [1.0, 1.2]]]);
        let bytes = to_display_u8(&image);
        assert_eq!(bytes[[0, 0, 0]], 0);
        assert_eq!(bytes[[0, 0, 1]], 128);
        assert_eq!(bytes[[0, 1, 0]], 255);
        assert_eq!(bytes[[0, 1, 1]], 255);
    }

    #[test]
    fn test_seeded_engines_agree() {
        let mut config = SynthesisConfig::default();
        config.model = ModelConfig::tiny();
        config.sampler.train_timesteps = 50;
        config.sampler.sample_timesteps = 2;

        let a = Synthesizer::seeded(&config);
        let b = Synthesizer::seeded(&config);
        let spec = MaterialSpec::with_defaults(crate::material::NoiseClass::Micro);
        let options = SampleOptions::seeded(5);
        assert_eq!(
            a.generate(&spec, 8, 8, &options).unwrap(),
            b.generate(&spec, 8, 8, &options).unwrap()
        );
    }
}
