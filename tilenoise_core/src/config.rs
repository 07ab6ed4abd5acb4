//! Engine configuration management via TOML files.
//!
//! Deployment-time settings: the network hyperparameters describing the
//! pretrained checkpoint and the sampling schedule. Both are fixed for
//! the process lifetime; nothing here varies per request.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::network::ModelConfig;
use crate::sampler::ScheduleKind;

/// Full engine configuration.
///
/// # Examples
///
/// ```
/// use tilenoise_core::config::SynthesisConfig;
///
/// let config = SynthesisConfig::load_from_file("config/engine.toml")
///     .unwrap_or_else(|_| SynthesisConfig::default());
///
/// println!("sampling {} steps", config.sampler.sample_timesteps);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisConfig {
    pub model: ModelConfig,
    pub sampler: SamplerSettings,
    /// Default seed for deterministic preview flows.
    pub seed: u64,
}

impl SynthesisConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::from_str(&contents)
    }

    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let raw: RawSynthesisConfig =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;

        let model = ModelConfig {
            dim: raw.model.dim,
            init_dim: raw.model.init_dim,
            out_channels: raw.model.out_channels,
            dim_mults: raw.model.dim_mults,
            channels: raw.model.channels,
            groups: raw.model.groups,
            cond_dim: raw.model.cond_dim,
            num_classes: raw.model.num_classes,
            pos_enc_levels: raw.model.pos_enc_levels,
            attention: raw.model.attention,
            attn_heads: raw.model.attn_heads,
            attn_dim_head: raw.model.attn_dim_head,
            cond_levels: raw.model.cond_levels,
        };
        model.validate().map_err(ConfigError::Parse)?;

        let sampler = SamplerSettings::try_from(&raw.sampler)?;

        Ok(Self {
            model,
            sampler,
            seed: raw.seed,
        })
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            sampler: SamplerSettings::default(),
            seed: 42,
        }
    }
}

/// Sampling schedule settings.
#[derive(Debug, Clone, Serialize)]
pub struct SamplerSettings {
    /// Training horizon of the pretrained network.
    pub train_timesteps: usize,
    /// Reduced step count used at inference; trades fidelity for latency.
    pub sample_timesteps: usize,
    /// Noise schedule family; must match the training run.
    pub schedule: ScheduleKind,
    /// Ancestral noise strength in `[0, 1]`; 0 is deterministic.
    pub eta: f32,
}

impl SamplerSettings {
    fn try_from(raw: &RawSamplerConfig) -> Result<Self, ConfigError> {
        if raw.train_timesteps < 2 {
            return Err(ConfigError::Parse(
                "sampler.train_timesteps must be ≥ 2".into(),
            ));
        }
        if raw.sample_timesteps == 0 || raw.sample_timesteps > raw.train_timesteps {
            return Err(ConfigError::Parse(
                "sampler.sample_timesteps must lie in [1, train_timesteps]".into(),
            ));
        }
        if !raw.eta.is_finite() || !(0.0..=1.0).contains(&raw.eta) {
            return Err(ConfigError::Parse("sampler.eta must lie in [0, 1]".into()));
        }

        Ok(Self {
            train_timesteps: raw.train_timesteps,
            sample_timesteps: raw.sample_timesteps,
            schedule: raw.schedule,
            eta: raw.eta,
        })
    }
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            train_timesteps: 1000,
            sample_timesteps: 40,
            schedule: ScheduleKind::Cosine,
            eta: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSynthesisConfig {
    #[serde(default)]
    model: RawModelConfig,
    #[serde(default)]
    sampler: RawSamplerConfig,
    #[serde(default = "default_seed")]
    seed: u64,
}

#[derive(Debug, Deserialize)]
struct RawModelConfig {
    #[serde(default = "default_dim")]
    dim: usize,
    #[serde(default)]
    init_dim: Option<usize>,
    #[serde(default)]
    out_channels: Option<usize>,
    #[serde(default = "default_dim_mults")]
    dim_mults: Vec<usize>,
    #[serde(default = "default_channels")]
    channels: usize,
    #[serde(default = "default_groups")]
    groups: usize,
    #[serde(default = "default_cond_dim")]
    cond_dim: usize,
    #[serde(default = "default_num_classes")]
    num_classes: usize,
    #[serde(default = "default_pos_enc_levels")]
    pos_enc_levels: usize,
    #[serde(default = "default_attention")]
    attention: bool,
    #[serde(default = "default_attn_heads")]
    attn_heads: usize,
    #[serde(default = "default_attn_dim_head")]
    attn_dim_head: usize,
    #[serde(default)]
    cond_levels: Vec<usize>,
}

impl Default for RawModelConfig {
    fn default() -> Self {
        Self {
            dim: default_dim(),
            init_dim: None,
            out_channels: None,
            dim_mults: default_dim_mults(),
            channels: default_channels(),
            groups: default_groups(),
            cond_dim: default_cond_dim(),
            num_classes: default_num_classes(),
            pos_enc_levels: default_pos_enc_levels(),
            attention: default_attention(),
            attn_heads: default_attn_heads(),
            attn_dim_head: default_attn_dim_head(),
            cond_levels: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSamplerConfig {
    #[serde(default = "default_train_timesteps")]
    train_timesteps: usize,
    #[serde(default = "default_sample_timesteps")]
    sample_timesteps: usize,
    #[serde(default = "default_schedule")]
    schedule: ScheduleKind,
    #[serde(default)]
    eta: f32,
}

impl Default for RawSamplerConfig {
    fn default() -> Self {
        Self {
            train_timesteps: default_train_timesteps(),
            sample_timesteps: default_sample_timesteps(),
            schedule: default_schedule(),
            eta: 0.0,
        }
    }
}

fn default_seed() -> u64 {
    42
}

fn default_dim() -> usize {
    64
}

fn default_dim_mults() -> Vec<usize> {
    vec![1, 2, 4, 8]
}

fn default_channels() -> usize {
    1
}

fn default_groups() -> usize {
    8
}

fn default_cond_dim() -> usize {
    128
}

fn default_num_classes() -> usize {
    crate::material::NoiseClass::num_classes()
}

fn default_pos_enc_levels() -> usize {
    2
}

fn default_attention() -> bool {
    true
}

fn default_attn_heads() -> usize {
    4
}

fn default_attn_dim_head() -> usize {
    32
}

fn default_train_timesteps() -> usize {
    1000
}

fn default_sample_timesteps() -> usize {
    40
}

fn default_schedule() -> ScheduleKind {
    ScheduleKind::Cosine
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "IO error: {}", err),
            ConfigError::Parse(err) => write!(f, "Parse error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_when_sections_missing() {
        let config = SynthesisConfig::from_str("").unwrap();
        assert_eq!(config.model.dim, 64);
        assert_eq!(config.sampler.train_timesteps, 1000);
        assert_eq!(config.sampler.sample_timesteps, 40);
        assert_eq!(config.sampler.schedule, ScheduleKind::Cosine);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn config_parses_custom_values() {
        let toml = r#"
seed = 7

[model]
dim = 32
dim_mults = [1, 2, 4]
cond_dim = 64
pos_enc_levels = 3
cond_levels = [2, 3, 4]

[sampler]
train_timesteps = 500
sample_timesteps = 30
schedule = "linear"
eta = 0.5
"#;
        let config = SynthesisConfig::from_str(toml).unwrap();
        assert_eq!(config.model.dim, 32);
        assert_eq!(config.model.dim_mults, vec![1, 2, 4]);
        assert_eq!(config.model.cond_levels, vec![2, 3, 4]);
        assert_eq!(config.sampler.train_timesteps, 500);
        assert_eq!(config.sampler.sample_timesteps, 30);
        assert_eq!(config.sampler.schedule, ScheduleKind::Linear);
        assert!((config.sampler.eta - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.seed, 7);
    }

    #[test]
    fn config_rejects_oversized_sample_steps() {
        let toml = "[sampler]\ntrain_timesteps = 100\nsample_timesteps = 200";
        let result = SynthesisConfig::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn config_rejects_indivisible_groups() {
        let toml = "[model]\ndim = 30\ngroups = 8";
        let result = SynthesisConfig::from_str(toml);
        assert!(result.is_err());
    }
}
