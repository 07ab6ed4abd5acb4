//! Dense per-pixel conditioning for the denoising network.
//!
//! The encoder turns a [`MaterialSpec`](crate::material::MaterialSpec)
//! into a conditioning field: the material's global parameter-slot vector
//! is positionally encoded, concatenated with the class embedding row, and
//! broadcast to every spatial position. Spatial variation only appears
//! once two fields are blended under a mask.

pub mod blend;

pub use blend::{blend_fields, effective_weight, slerp, BlendMask};

use ndarray::{Array3, ArrayView1, ArrayView3};

use crate::error::{SynthesisError, SynthesisResult};
use crate::material::{MaterialSpec, NUM_PARAM_SLOTS};

/// A `(channels, height, width)` conditioning tensor.
///
/// Produced fresh per request and never mutated afterwards; the blender
/// returns a new field rather than touching its inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditioningField {
    data: Array3<f32>,
}

impl ConditioningField {
    /// Wrap an existing `(channels, height, width)` array.
    pub fn from_array(data: Array3<f32>) -> Self {
        Self { data }
    }

    /// Broadcast one conditioning vector uniformly across all pixels.
    pub fn uniform(vector: &[f32], height: usize, width: usize) -> Self {
        let channels = vector.len();
        let mut data = Array3::zeros((channels, height, width));
        for (ch, &value) in vector.iter().enumerate() {
            data.index_axis_mut(ndarray::Axis(0), ch).fill(value);
        }
        Self { data }
    }

    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    pub fn as_array(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn into_inner(self) -> Array3<f32> {
        self.data
    }
}

/// Channel count of the positionally encoded parameter vector.
///
/// Each of the [`NUM_PARAM_SLOTS`] slot values contributes itself plus a
/// sine and cosine band per frequency level.
pub fn encoded_parameter_dim(pos_enc_levels: usize) -> usize {
    NUM_PARAM_SLOTS * (2 * pos_enc_levels + 1)
}

/// Positionally encode a slot vector with power-of-two frequencies.
///
/// Layout matches the training-time encoder: the raw values first, then
/// all sine bands (frequency-major), then all cosine bands in the same
/// order.
pub fn positional_encode(slots: &[f32; NUM_PARAM_SLOTS], pos_enc_levels: usize) -> Vec<f32> {
    let mut encoded = Vec::with_capacity(encoded_parameter_dim(pos_enc_levels));
    encoded.extend_from_slice(slots);
    for level in 0..pos_enc_levels {
        let scale = (1u32 << level) as f32;
        encoded.extend(slots.iter().map(|&v| (scale * v).sin()));
    }
    for level in 0..pos_enc_levels {
        let scale = (1u32 << level) as f32;
        encoded.extend(slots.iter().map(|&v| (scale * v).cos()));
    }
    encoded
}

/// Encode a material spec into a conditioning field.
///
/// `class_embedding` is the embedding-table row for the spec's class; pass
/// an empty view for single-class models. Fails with
/// [`SynthesisError::InvalidDimensions`] when either dimension is zero.
pub fn encode_conditioning(
    spec: &MaterialSpec,
    height: usize,
    width: usize,
    class_embedding: ArrayView1<'_, f32>,
    pos_enc_levels: usize,
) -> SynthesisResult<ConditioningField> {
    if height == 0 || width == 0 {
        return Err(SynthesisError::invalid_dimensions(
            height as i64,
            width as i64,
        ));
    }

    let slots = spec.resolve();
    let mut vector = positional_encode(&slots, pos_enc_levels);
    vector.extend(class_embedding.iter().copied());

    Ok(ConditioningField::uniform(&vector, height, width))
}
