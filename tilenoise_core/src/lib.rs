//! # Tilenoise Core
//!
//! A deterministic Rust engine that synthesizes tileable procedural-noise
//! textures by running a learned conditional diffusion model. Two noise
//! materials can be blended spatially under a grayscale mask using
//! norm-preserving spherical interpolation of their conditioning fields.
//!
//! ## Quick Start
//!
//! ```rust
//! use tilenoise_core::config::SynthesisConfig;
//! use tilenoise_core::conditioning::BlendMask;
//! use tilenoise_core::material::{MaterialSpec, NoiseClass};
//! use tilenoise_core::sampler::SampleOptions;
//! use tilenoise_core::synthesizer::Synthesizer;
//!
//! // A small seeded engine; production deployments load a checkpoint.
//! let mut config = SynthesisConfig::default();
//! config.model = tilenoise_core::network::ModelConfig::tiny();
//! config.sampler.train_timesteps = 100;
//! config.sampler.sample_timesteps = 4;
//! let engine = Synthesizer::seeded(&config);
//!
//! // Single material.
//! let perlin = MaterialSpec::with_defaults(NoiseClass::Perlin);
//! let image = engine.generate(&perlin, 16, 16, &SampleOptions::seeded(7)).unwrap();
//!
//! // Two materials under a mask.
//! let voronoi = MaterialSpec::with_defaults(NoiseClass::Voronoi);
//! let mask = BlendMask::constant(1.0, 16, 16);
//! let blended = engine
//!     .blend(&mask, &perlin, &voronoi, 16, 16, 0.5, &SampleOptions::seeded(7))
//!     .unwrap();
//! assert_eq!(image.dim(), blended.dim());
//! ```
//!
//! ## Core Modules
//!
//! - [`config`] - Engine configuration via TOML
//! - [`material`] - Noise classes and their parameter registry
//! - [`conditioning`] - Conditioning encoder and masked slerp blending
//! - [`network`] - The conditional denoising network
//! - [`sampler`] - Reverse-diffusion sampling loop
//! - [`synthesizer`] - The two public entry points
//! - [`logging`] - JSON line-delimited logging

pub mod checkpoint;
pub mod conditioning;
pub mod config;
pub mod error;
pub mod logging;
pub mod material;
pub mod network;
pub mod sampler;
pub mod synthesizer;

pub use checkpoint::{CheckpointError, Checkpointable};
pub use conditioning::{blend_fields, slerp, BlendMask, ConditioningField};
pub use config::{ConfigError, SamplerSettings, SynthesisConfig};
pub use error::{SynthesisError, SynthesisResult};
pub use material::{MaterialSpec, NoiseClass};
pub use network::{ModelConfig, NoiseUnet};
pub use sampler::{CancelToken, DiffusionSampler, SampleOptions, Schedule, ScheduleKind};
pub use synthesizer::{to_display_u8, Synthesizer};
