use anyhow::Result;
use ndarray::Array2;

use tilenoise_core::conditioning::BlendMask;
use tilenoise_core::config::SynthesisConfig;
use tilenoise_core::material::{MaterialSpec, NoiseClass};
use tilenoise_core::network::ModelConfig;
use tilenoise_core::sampler::SampleOptions;
use tilenoise_core::synthesizer::Synthesizer;

fn main() -> Result<()> {
    let mut config = SynthesisConfig::default();
    config.model = ModelConfig::tiny();
    config.sampler.train_timesteps = 100;
    config.sampler.sample_timesteps = 8;
    let engine = Synthesizer::seeded(&config);

    let damas = MaterialSpec::with_defaults(NoiseClass::Damas);
    let galvanic = MaterialSpec::with_defaults(NoiseClass::Galvanic);

    // Radial mask: damas in the center, galvanic at the edges.
    let size = 32_usize;
    let center = size as f32 / 2.0;
    let mask = BlendMask::from_array(Array2::from_shape_fn((size, size), |(y, x)| {
        let dy = y as f32 - center;
        let dx = x as f32 - center;
        1.0 - ((dy * dy + dx * dx).sqrt() / center).min(1.0)
    }));

    for factor in [0.0_f32, 0.5, 1.0] {
        let image = engine.blend(
            &mask,
            &damas,
            &galvanic,
            size,
            size,
            factor,
            &SampleOptions::seeded(config.seed),
        )?;
        let mean = image.sum() / image.len() as f32;
        println!("blend factor {factor:.1}: mean intensity {mean:.4}");
    }
    Ok(())
}
