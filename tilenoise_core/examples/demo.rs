use tilenoise_core::config::{ConfigError, SynthesisConfig};
use tilenoise_core::material::{MaterialSpec, NoiseClass};
use tilenoise_core::network::ModelConfig;
use tilenoise_core::sampler::SampleOptions;
use tilenoise_core::synthesizer::{to_display_u8, Synthesizer};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config()?;
    // Keep the demo quick on a laptop; a pretrained deployment would use
    // the configured full-size model via Synthesizer::from_checkpoint.
    config.model = ModelConfig::tiny();
    config.sampler.train_timesteps = 100;
    config.sampler.sample_timesteps = 8;
    println!(
        "Sampling {} steps over a {}-step horizon",
        config.sampler.sample_timesteps, config.sampler.train_timesteps
    );

    let engine = Synthesizer::seeded(&config);
    let spec = MaterialSpec::with_defaults(NoiseClass::Perlin);
    let image = engine.generate(&spec, 32, 32, &SampleOptions::seeded(config.seed))?;

    let bytes = to_display_u8(&image);
    let mean = image.sum() / image.len() as f32;
    let min = image.iter().copied().fold(f32::INFINITY, f32::min);
    let max = image.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    println!(
        "Generated {}x{} '{}' tile: mean {:.4}, range [{:.4}, {:.4}], {} bytes",
        image.dim().1,
        image.dim().2,
        spec.class().name(),
        mean,
        min,
        max,
        bytes.len()
    );
    Ok(())
}

fn load_config() -> Result<SynthesisConfig, ConfigError> {
    SynthesisConfig::load_from_file("config/engine.toml").or_else(|err| {
        eprintln!("Falling back to default config: {err}");
        Ok(SynthesisConfig::default())
    })
}
