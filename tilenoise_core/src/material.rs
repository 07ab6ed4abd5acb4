//! Noise material classes and their parameter registry.
//!
//! A material is a named procedural noise family with a fixed set of
//! continuous parameters, each in `[0, 1]`. Every `(class, parameter)`
//! pair owns one slot in a global fixed-length vector that the
//! conditioning encoder consumes; slots outside the selected class stay
//! at zero.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{SynthesisError, SynthesisResult};

/// Neutral value used when a registered parameter is left unset.
pub const NEUTRAL_PARAMETER: f32 = 0.5;

/// Total number of parameter slots across all classes.
pub const NUM_PARAM_SLOTS: usize = 18;

/// The noise material classes the pretrained model was conditioned on.
///
/// Variant order defines the class index used for embedding lookup and
/// parameter slot assignment; it must match the training-time ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(usize)]
pub enum NoiseClass {
    Cells1 = 0,
    Cells4 = 1,
    Damas = 2,
    Fibers = 3,
    Galvanic = 4,
    Gaussian = 5,
    Liquid = 6,
    Micro = 7,
    Perlin = 8,
    Rust = 9,
    Voronoi = 10,
}

impl NoiseClass {
    /// Canonical lowercase name of this class.
    pub fn name(&self) -> &'static str {
        match self {
            NoiseClass::Cells1 => "cells1",
            NoiseClass::Cells4 => "cells4",
            NoiseClass::Damas => "damas",
            NoiseClass::Fibers => "fibers",
            NoiseClass::Galvanic => "galvanic",
            NoiseClass::Gaussian => "gaussian",
            NoiseClass::Liquid => "liquid",
            NoiseClass::Micro => "micro",
            NoiseClass::Perlin => "perlin",
            NoiseClass::Rust => "rust",
            NoiseClass::Voronoi => "voronoi",
        }
    }

    /// Look up a class by canonical name or accepted alias.
    pub fn from_name(name: &str) -> Option<Self> {
        let canonical = match name {
            "voro" => "voronoi",
            other => other,
        };
        Self::all().into_iter().find(|c| c.name() == canonical)
    }

    /// Get a class from its index.
    pub fn from_index(idx: usize) -> Option<Self> {
        Self::all().get(idx).copied()
    }

    /// Class index used for embedding lookup.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Total number of classes.
    pub fn num_classes() -> usize {
        Self::all().len()
    }

    /// All classes in index order.
    pub fn all() -> [NoiseClass; 11] {
        [
            NoiseClass::Cells1,
            NoiseClass::Cells4,
            NoiseClass::Damas,
            NoiseClass::Fibers,
            NoiseClass::Galvanic,
            NoiseClass::Gaussian,
            NoiseClass::Liquid,
            NoiseClass::Micro,
            NoiseClass::Perlin,
            NoiseClass::Rust,
            NoiseClass::Voronoi,
        ]
    }

    /// Registered parameter names for this class, in slot order.
    pub fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            NoiseClass::Cells1 => &["scale"],
            NoiseClass::Cells4 => &["scale", "randomness"],
            NoiseClass::Damas => &["scale", "waves", "distortion"],
            NoiseClass::Fibers => &["scale", "length"],
            NoiseClass::Galvanic => &["scale", "disorder"],
            NoiseClass::Gaussian => &[],
            NoiseClass::Liquid => &["scale", "warp"],
            NoiseClass::Micro => &["scale"],
            NoiseClass::Perlin => &["scale"],
            NoiseClass::Rust => &["scale", "disorder"],
            NoiseClass::Voronoi => &["scale", "distortion"],
        }
    }

    /// First global slot owned by this class.
    pub fn slot_offset(&self) -> usize {
        Self::all()
            .iter()
            .take_while(|c| *c != self)
            .map(|c| c.parameter_names().len())
            .sum()
    }
}

/// An immutable request for one noise material.
///
/// Construction validates every supplied parameter name and value against
/// the class registry; afterwards the spec can be resolved into the global
/// slot vector without failure.
///
/// # Examples
///
/// ```
/// use tilenoise_core::material::{MaterialSpec, NoiseClass};
///
/// let spec = MaterialSpec::new(
///     NoiseClass::Voronoi,
///     [("scale".to_string(), 0.8)].into_iter().collect(),
/// )
/// .unwrap();
/// assert_eq!(spec.class(), NoiseClass::Voronoi);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialSpec {
    class: NoiseClass,
    parameters: BTreeMap<String, f32>,
}

impl MaterialSpec {
    /// Build a spec, rejecting unknown parameter names and out-of-range
    /// values for the given class.
    pub fn new(class: NoiseClass, parameters: BTreeMap<String, f32>) -> SynthesisResult<Self> {
        let registered = class.parameter_names();
        for (name, value) in &parameters {
            if !registered.iter().any(|p| p == name) {
                return Err(SynthesisError::invalid_parameter(
                    class.name(),
                    name.clone(),
                    "unknown parameter name for this class",
                ));
            }
            if !value.is_finite() || *value < 0.0 || *value > 1.0 {
                return Err(SynthesisError::invalid_parameter(
                    class.name(),
                    name.clone(),
                    format!("value {} outside [0, 1]", value),
                ));
            }
        }
        Ok(Self { class, parameters })
    }

    /// Build a spec with every registered parameter at the neutral value,
    /// matching the preview flow when nothing has been customized yet.
    pub fn with_defaults(class: NoiseClass) -> Self {
        let parameters = class
            .parameter_names()
            .iter()
            .map(|name| (name.to_string(), NEUTRAL_PARAMETER))
            .collect();
        Self { class, parameters }
    }

    pub fn class(&self) -> NoiseClass {
        self.class
    }

    pub fn parameters(&self) -> &BTreeMap<String, f32> {
        &self.parameters
    }

    /// Resolve into the global slot vector: the class's registered
    /// parameters land in its slots (unset ones at the neutral value),
    /// every other slot is zero.
    pub fn resolve(&self) -> [f32; NUM_PARAM_SLOTS] {
        let mut slots = [0.0_f32; NUM_PARAM_SLOTS];
        let offset = self.class.slot_offset();
        for (i, name) in self.class.parameter_names().iter().enumerate() {
            slots[offset + i] = self
                .parameters
                .get(*name)
                .copied()
                .unwrap_or(NEUTRAL_PARAMETER);
        }
        slots
    }
}
