use ndarray::Array3;

use tilenoise_core::conditioning::BlendMask;
use tilenoise_core::config::SynthesisConfig;
use tilenoise_core::material::{MaterialSpec, NoiseClass};
use tilenoise_core::network::ModelConfig;
use tilenoise_core::sampler::{CancelToken, SampleOptions};
use tilenoise_core::synthesizer::Synthesizer;
use tilenoise_core::SynthesisError;

fn tiny_engine() -> Synthesizer {
    let mut config = SynthesisConfig::default();
    config.model = ModelConfig::tiny();
    config.sampler.train_timesteps = 100;
    config.sampler.sample_timesteps = 4;
    Synthesizer::seeded(&config)
}

fn max_abs_diff(a: &Array3<f32>, b: &Array3<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

#[test]
fn generate_returns_image_in_display_range() {
    let engine = tiny_engine();
    for class in [NoiseClass::Perlin, NoiseClass::Gaussian, NoiseClass::Damas] {
        let spec = MaterialSpec::with_defaults(class);
        let image = engine
            .generate(&spec, 16, 16, &SampleOptions::seeded(3))
            .unwrap();
        assert_eq!(image.dim(), (1, 16, 16));
        for &v in image.iter() {
            assert!((0.0..=1.0).contains(&v), "value {v} out of display range");
        }
    }
}

#[test]
fn generate_is_reproducible_with_fixed_seed() {
    let engine = tiny_engine();
    let spec = MaterialSpec::with_defaults(NoiseClass::Fibers);
    let options = SampleOptions::seeded(123);
    let a = engine.generate(&spec, 16, 16, &options).unwrap();
    let b = engine.generate(&spec, 16, 16, &options).unwrap();
    assert_eq!(a, b);
}

#[test]
fn blending_a_material_with_itself_matches_generate() {
    let engine = tiny_engine();
    let spec = MaterialSpec::with_defaults(NoiseClass::Voronoi);
    let options = SampleOptions::seeded(9);
    let reference = engine.generate(&spec, 16, 16, &options).unwrap();

    // Any mask and any factor: identical conditioning on both sides must
    // reproduce single-material synthesis exactly.
    for (mask, factor) in [
        (BlendMask::constant(1.0, 16, 16), 0.3_f32),
        (BlendMask::constant(0.0, 16, 16), 0.8),
        (checkerboard(16, 16), 0.5),
    ] {
        let blended = engine
            .blend(&mask, &spec, &spec, 16, 16, factor, &options)
            .unwrap();
        assert_eq!(blended, reference);
    }
}

#[test]
fn blend_factor_boundaries_select_single_materials() {
    let engine = tiny_engine();
    let a = MaterialSpec::with_defaults(NoiseClass::Perlin);
    let b = MaterialSpec::with_defaults(NoiseClass::Rust);
    let options = SampleOptions::seeded(21);
    let mask = checkerboard(16, 16);

    let only_a = engine.blend(&mask, &a, &b, 16, 16, 0.0, &options).unwrap();
    assert_eq!(only_a, engine.generate(&a, 16, 16, &options).unwrap());

    let only_b = engine.blend(&mask, &a, &b, 16, 16, 1.0, &options).unwrap();
    assert_eq!(only_b, engine.generate(&b, 16, 16, &options).unwrap());
}

#[test]
fn midpoint_blend_differs_from_both_materials() {
    let engine = tiny_engine();
    let a = MaterialSpec::with_defaults(NoiseClass::Perlin);
    let b = MaterialSpec::with_defaults(NoiseClass::Galvanic);
    let options = SampleOptions::seeded(4);
    let mask = checkerboard(16, 16);

    let blended = engine.blend(&mask, &a, &b, 16, 16, 0.5, &options).unwrap();
    let pure_a = engine.generate(&a, 16, 16, &options).unwrap();
    let pure_b = engine.generate(&b, 16, 16, &options).unwrap();
    assert!(max_abs_diff(&blended, &pure_a) > 1e-4);
    assert!(max_abs_diff(&blended, &pure_b) > 1e-4);
}

#[test]
fn mismatched_mask_is_resized_to_match() {
    let engine = tiny_engine();
    let a = MaterialSpec::with_defaults(NoiseClass::Liquid);
    let b = MaterialSpec::with_defaults(NoiseClass::Micro);
    let small_mask = BlendMask::constant(1.0, 4, 4);
    let image = engine
        .blend(&small_mask, &a, &b, 16, 16, 0.5, &SampleOptions::seeded(2))
        .unwrap();
    assert_eq!(image.dim(), (1, 16, 16));
}

#[test]
fn generated_tiles_have_no_seam() {
    let engine = tiny_engine();
    let spec = MaterialSpec::with_defaults(NoiseClass::Cells1);
    let image = engine
        .generate(&spec, 16, 16, &SampleOptions::seeded(31))
        .unwrap();
    let (_, h, w) = image.dim();

    // Wrap-around differences must look like interior differences; a
    // zero-padded network would show a clear edge discontinuity.
    let mut seam_sum = 0.0_f32;
    let mut seam_count = 0;
    let mut interior_sum = 0.0_f32;
    let mut interior_count = 0;

    for y in 0..h {
        seam_sum += (image[[0, y, w - 1]] - image[[0, y, 0]]).abs();
        seam_count += 1;
        for x in 0..w - 1 {
            interior_sum += (image[[0, y, x + 1]] - image[[0, y, x]]).abs();
            interior_count += 1;
        }
    }
    for x in 0..w {
        seam_sum += (image[[0, h - 1, x]] - image[[0, 0, x]]).abs();
        seam_count += 1;
        for y in 0..h - 1 {
            interior_sum += (image[[0, y + 1, x]] - image[[0, y, x]]).abs();
            interior_count += 1;
        }
    }

    let seam_mean = seam_sum / seam_count as f32;
    let interior_mean = interior_sum / interior_count as f32;
    assert!(
        seam_mean <= interior_mean * 3.0 + 0.05,
        "seam discontinuity {seam_mean} vs interior variation {interior_mean}"
    );
}

#[test]
fn unknown_parameter_is_rejected() {
    let err = MaterialSpec::new(
        NoiseClass::Perlin,
        [("nonexistent_param".to_string(), 0.5)].into_iter().collect(),
    )
    .unwrap_err();
    assert!(matches!(err, SynthesisError::InvalidParameter { .. }));
}

#[test]
fn degenerate_dimensions_are_rejected() {
    let engine = tiny_engine();
    let spec = MaterialSpec::with_defaults(NoiseClass::Perlin);
    let err = engine
        .generate(&spec, 0, 16, &SampleOptions::seeded(1))
        .unwrap_err();
    assert!(matches!(err, SynthesisError::InvalidDimensions { .. }));
}

#[test]
fn cancellation_aborts_before_first_step() {
    let engine = tiny_engine();
    let spec = MaterialSpec::with_defaults(NoiseClass::Perlin);
    let token = CancelToken::new();
    token.cancel();
    let options = SampleOptions {
        seed: 1,
        cancel: Some(token),
    };
    let err = engine.generate(&spec, 16, 16, &options).unwrap_err();
    assert!(matches!(err, SynthesisError::Cancelled { .. }));
}

fn checkerboard(height: usize, width: usize) -> BlendMask {
    let data = ndarray::Array2::from_shape_fn((height, width), |(y, x)| {
        ((y / 4 + x / 4) % 2) as f32
    });
    BlendMask::from_array(data)
}
