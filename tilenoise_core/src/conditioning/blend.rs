//! Masked spherical blending of two conditioning fields.
//!
//! Conditioning vectors encode material identity directionally, so two
//! fields are combined along the geodesic of the hypersphere rather than
//! componentwise. Linear blending would pass through an unrelated
//! direction and shrink the vector norm mid-blend; the denoiser only ever
//! saw conditioning of consistent norm during training.

use ndarray::{Array2, Array3, ArrayView1, ArrayViewMut1, Axis, Zip};

use super::ConditioningField;
use crate::error::{SynthesisError, SynthesisResult};

/// Angle below which slerp falls back to linear interpolation.
const PARALLEL_EPS: f32 = 1e-4;

/// Norm below which an operand counts as the zero vector.
const ZERO_NORM_EPS: f32 = 1e-8;

/// A caller-supplied `(height, width)` blend mask.
///
/// Values are clamped into `[0, 1]` at construction; 1 selects material A
/// at that pixel. The core never mutates a mask after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendMask {
    data: Array2<f32>,
}

impl BlendMask {
    /// Wrap a mask array, clamping every value into the unit range.
    pub fn from_array(mut data: Array2<f32>) -> Self {
        data.mapv_inplace(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 });
        Self { data }
    }

    /// A mask of a single constant value.
    pub fn constant(value: f32, height: usize, width: usize) -> Self {
        Self::from_array(Array2::from_elem((height, width), value))
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    /// The complementary mask, mirroring the front ends' invert option.
    pub fn inverted(&self) -> Self {
        Self {
            data: self.data.mapv(|v| 1.0 - v),
        }
    }

    /// Bilinearly resample the mask to a new resolution.
    ///
    /// This is the documented policy for masks whose resolution does not
    /// match the requested output: they are resized, never rejected.
    pub fn resized(&self, height: usize, width: usize) -> Self {
        let (src_h, src_w) = self.data.dim();
        if (src_h, src_w) == (height, width) {
            return self.clone();
        }

        let scale_y = src_h as f32 / height as f32;
        let scale_x = src_w as f32 / width as f32;
        let mut out = Array2::zeros((height, width));
        for y in 0..height {
            let fy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (src_h - 1) as f32);
            let y0 = fy.floor() as usize;
            let y1 = (y0 + 1).min(src_h - 1);
            let wy = fy - y0 as f32;
            for x in 0..width {
                let fx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (src_w - 1) as f32);
                let x0 = fx.floor() as usize;
                let x1 = (x0 + 1).min(src_w - 1);
                let wx = fx - x0 as f32;

                let top = self.data[[y0, x0]] * (1.0 - wx) + self.data[[y0, x1]] * wx;
                let bottom = self.data[[y1, x0]] * (1.0 - wx) + self.data[[y1, x1]] * wx;
                out[[y, x]] = top * (1.0 - wy) + bottom * wy;
            }
        }
        Self { data: out }
    }
}

/// Per-pixel slerp weight from mask value and the global blend factor.
///
/// With `m = mask` (1 = material A) and `f = blending_factor`:
///
/// ```text
/// f <= 0.5:  t = 2f * (1 - m)
/// f  > 0.5:  t = (1 - m) + (2f - 1) * m
/// ```
///
/// so `f = 0` forces material A everywhere, `f = 1` forces material B
/// everywhere, and `f = 0.5` reproduces the mask's own spatial pattern.
/// The weight is monotonically non-decreasing in `f` for every mask value.
pub fn effective_weight(mask: f32, blending_factor: f32) -> f32 {
    let m = mask.clamp(0.0, 1.0);
    let f = blending_factor.clamp(0.0, 1.0);
    let toward_b = 1.0 - m;
    if f <= 0.5 {
        2.0 * f * toward_b
    } else {
        toward_b + (2.0 * f - 1.0) * m
    }
}

/// Spherical linear interpolation between two channel vectors.
///
/// Endpoints are exact: `t <= 0` returns `a` verbatim and `t >= 1`
/// returns `b` verbatim. A zero-norm operand degenerates to scaling the
/// other operand by its own weight; nearly parallel operands fall back to
/// linear interpolation.
pub fn slerp(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>, t: f32) -> ndarray::Array1<f32> {
    let mut out = ndarray::Array1::zeros(a.len());
    slerp_into(out.view_mut(), a, b, t);
    out
}

fn slerp_into(mut out: ArrayViewMut1<'_, f32>, a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>, t: f32) {
    if t <= 0.0 {
        out.assign(&a);
        return;
    }
    if t >= 1.0 {
        out.assign(&b);
        return;
    }
    // Identical operands need no interpolation.
    if a == b {
        out.assign(&a);
        return;
    }

    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a < ZERO_NORM_EPS {
        Zip::from(&mut out).and(&b).for_each(|o, &bv| *o = t * bv);
        return;
    }
    if norm_b < ZERO_NORM_EPS {
        Zip::from(&mut out)
            .and(&a)
            .for_each(|o, &av| *o = (1.0 - t) * av);
        return;
    }

    let cos_theta = (a.dot(&b) / (norm_a * norm_b)).clamp(-1.0, 1.0);
    let theta = cos_theta.acos();
    if theta < PARALLEL_EPS {
        Zip::from(&mut out)
            .and(&a)
            .and(&b)
            .for_each(|o, &av, &bv| *o = (1.0 - t) * av + t * bv);
        return;
    }

    let sin_theta = theta.sin();
    let wa = ((1.0 - t) * theta).sin() / sin_theta;
    let wb = (t * theta).sin() / sin_theta;
    Zip::from(&mut out)
        .and(&a)
        .and(&b)
        .for_each(|o, &av, &bv| *o = wa * av + wb * bv);
}

/// Blend two conditioning fields under a spatial mask.
///
/// Fields must share one shape and the mask must share their spatial
/// shape; the result is a fresh field, inputs are untouched.
pub fn blend_fields(
    a: &ConditioningField,
    b: &ConditioningField,
    mask: &BlendMask,
    blending_factor: f32,
) -> SynthesisResult<ConditioningField> {
    let (channels, height, width) = a.shape();
    if b.shape() != (channels, height, width) {
        let (bc, bh, bw) = b.shape();
        return Err(SynthesisError::shape_mismatch(
            "conditioning field pair",
            vec![channels, height, width],
            vec![bc, bh, bw],
        ));
    }
    if (mask.height(), mask.width()) != (height, width) {
        return Err(SynthesisError::shape_mismatch(
            "blend mask",
            vec![height, width],
            vec![mask.height(), mask.width()],
        ));
    }

    // Pixel vectors live along the channel axis; permute so each lane is
    // one pixel and blend lanes in parallel.
    let a_pixels = a.view().permuted_axes([1, 2, 0]);
    let b_pixels = b.view().permuted_axes([1, 2, 0]);
    let mut blended = Array3::<f32>::zeros((height, width, channels));

    Zip::from(blended.lanes_mut(Axis(2)))
        .and(a_pixels.lanes(Axis(2)))
        .and(b_pixels.lanes(Axis(2)))
        .and(mask.data())
        .par_for_each(|out, av, bv, &m| {
            let t = effective_weight(m, blending_factor);
            slerp_into(out, av, bv, t);
        });

    let data = blended
        .permuted_axes([2, 0, 1])
        .as_standard_layout()
        .to_owned();
    Ok(ConditioningField::from_array(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn unit(values: &[f32]) -> ndarray::Array1<f32> {
        let v = arr1(values);
        let norm = v.dot(&v).sqrt();
        v / norm
    }

    #[test]
    fn test_slerp_endpoints_exact() {
        let a = unit(&[1.0, 0.0, 0.0]);
        let b = unit(&[0.0, 1.0, 0.0]);
        assert_eq!(slerp(a.view(), b.view(), 0.0), a);
        assert_eq!(slerp(a.view(), b.view(), 1.0), b);
    }

    #[test]
    fn test_slerp_preserves_norm() {
        let a = unit(&[0.4, -0.2, 0.89, 0.1]);
        let b = unit(&[-0.7, 0.3, 0.2, 0.61]);
        for i in 0..=10 {
            let t = i as f32 / 10.0;
            let s = slerp(a.view(), b.view(), t);
            let norm = s.dot(&s).sqrt();
            assert!(
                (norm - 1.0).abs() < 1e-5,
                "norm {} drifted at t={}",
                norm,
                t
            );
        }
    }

    #[test]
    fn test_slerp_midpoint_differs_from_lerp() {
        let a = unit(&[1.0, 0.0]);
        let b = unit(&[0.0, 1.0]);
        let mid = slerp(a.view(), b.view(), 0.5);
        let lerp_norm = (0.5_f32 * 0.5 * 2.0).sqrt();
        let mid_norm = mid.dot(&mid).sqrt();
        assert!((mid_norm - 1.0).abs() < 1e-5);
        assert!((mid_norm - lerp_norm).abs() > 0.2);
    }

    #[test]
    fn test_slerp_zero_vector_rule() {
        let zero = arr1(&[0.0_f32, 0.0, 0.0]);
        let b = arr1(&[0.0_f32, 2.0, 0.0]);
        let toward_b = slerp(zero.view(), b.view(), 0.25);
        assert!((toward_b[1] - 0.5).abs() < 1e-6);

        let toward_a = slerp(b.view(), zero.view(), 0.25);
        assert!((toward_a[1] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_slerp_parallel_fallback() {
        let a = arr1(&[0.5_f32, 0.5]);
        let b = arr1(&[0.5_f32 + 1e-7, 0.5]);
        let s = slerp(a.view(), b.view(), 0.5);
        assert!((s[0] - 0.5).abs() < 1e-5);
        assert!((s[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_effective_weight_boundaries() {
        for m in [0.0_f32, 0.3, 0.5, 1.0] {
            assert_eq!(effective_weight(m, 0.0), 0.0);
            assert_eq!(effective_weight(m, 1.0), 1.0);
            assert!((effective_weight(m, 0.5) - (1.0 - m)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_effective_weight_monotone_in_factor() {
        for m in [0.0_f32, 0.25, 0.5, 0.75, 1.0] {
            let mut previous = -1.0_f32;
            for i in 0..=20 {
                let f = i as f32 / 20.0;
                let w = effective_weight(m, f);
                assert!(w >= previous - 1e-6, "not monotone at m={} f={}", m, f);
                previous = w;
            }
        }
    }

    #[test]
    fn test_blend_fields_boundary_factors() {
        let a = ConditioningField::uniform(&[1.0, 0.0], 3, 3);
        let b = ConditioningField::uniform(&[0.0, 1.0], 3, 3);
        let mask = BlendMask::constant(0.5, 3, 3);

        let all_a = blend_fields(&a, &b, &mask, 0.0).unwrap();
        assert_eq!(all_a, a);

        let all_b = blend_fields(&a, &b, &mask, 1.0).unwrap();
        assert_eq!(all_b, b);
    }

    #[test]
    fn test_blend_fields_follows_mask_at_midpoint() {
        let a = ConditioningField::uniform(&[1.0, 0.0], 1, 2);
        let b = ConditioningField::uniform(&[0.0, 1.0], 1, 2);
        // Left pixel fully A, right pixel fully B.
        let mask = BlendMask::from_array(ndarray::arr2(&[[1.0_f32, 0.0]]));

        let blended = blend_fields(&a, &b, &mask, 0.5).unwrap();
        let view = blended.view();
        assert_eq!(view[[0, 0, 0]], 1.0);
        assert_eq!(view[[1, 0, 0]], 0.0);
        assert_eq!(view[[0, 0, 1]], 0.0);
        assert_eq!(view[[1, 0, 1]], 1.0);
    }

    #[test]
    fn test_blend_fields_rejects_mismatched_mask() {
        let a = ConditioningField::uniform(&[1.0], 4, 4);
        let b = ConditioningField::uniform(&[0.0], 4, 4);
        let mask = BlendMask::constant(1.0, 2, 2);
        let err = blend_fields(&a, &b, &mask, 0.5).unwrap_err();
        assert!(matches!(err, SynthesisError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_mask_resize_and_invert() {
        let mask = BlendMask::from_array(ndarray::arr2(&[[0.0_f32, 1.0], [1.0, 0.0]]));
        let up = mask.resized(4, 4);
        assert_eq!(up.height(), 4);
        assert_eq!(up.width(), 4);
        for value in up.data().iter() {
            assert!((0.0..=1.0).contains(value));
        }

        let inv = mask.inverted();
        assert_eq!(inv.data()[[0, 0]], 1.0);
        assert_eq!(inv.data()[[0, 1]], 0.0);
    }
}
