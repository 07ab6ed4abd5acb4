//! Error types for the synthesis engine.
//!
//! Every failure surfaced by the public entry points is one of these
//! variants; nothing is retried internally and there is no partial-output
//! path. A synthesis request either fully succeeds or returns an error.

use std::fmt;

/// Result type alias for synthesis operations.
pub type SynthesisResult<T> = Result<T, SynthesisError>;

/// Error type covering the whole synthesis pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisError {
    /// A parameter name is not registered for the given noise class,
    /// or its value falls outside the unit range.
    InvalidParameter {
        class: String,
        name: String,
        reason: String,
    },

    /// Requested output dimensions are unusable.
    InvalidDimensions { height: i64, width: i64 },

    /// A tensor violated a shape contract before network evaluation.
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// The reverse-diffusion loop failed; wraps the step and cause.
    SamplingFailed {
        step: usize,
        timestep: usize,
        cause: Box<SynthesisError>,
    },

    /// A cooperative cancellation token was raised between steps.
    Cancelled { step: usize },
}

impl fmt::Display for SynthesisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthesisError::InvalidParameter {
                class,
                name,
                reason,
            } => {
                write!(
                    f,
                    "Invalid parameter '{}' for noise class '{}': {}",
                    name, class, reason
                )
            }
            SynthesisError::InvalidDimensions { height, width } => {
                write!(
                    f,
                    "Invalid output dimensions {}x{}: height and width must be positive",
                    height, width
                )
            }
            SynthesisError::ShapeMismatch {
                context,
                expected,
                got,
            } => {
                write!(
                    f,
                    "Shape mismatch in {}: expected {:?}, got {:?}",
                    context, expected, got
                )
            }
            SynthesisError::SamplingFailed {
                step,
                timestep,
                cause,
            } => {
                write!(
                    f,
                    "Sampling failed at step {} (timestep {}): {}",
                    step, timestep, cause
                )
            }
            SynthesisError::Cancelled { step } => {
                write!(f, "Sampling cancelled before step {}", step)
            }
        }
    }
}

impl std::error::Error for SynthesisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SynthesisError::SamplingFailed { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

// Convenience constructors for common error patterns
impl SynthesisError {
    /// Create an invalid parameter error.
    pub fn invalid_parameter(
        class: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SynthesisError::InvalidParameter {
            class: class.into(),
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid dimensions error.
    pub fn invalid_dimensions(height: i64, width: i64) -> Self {
        SynthesisError::InvalidDimensions { height, width }
    }

    /// Create a shape mismatch error.
    pub fn shape_mismatch(
        context: impl Into<String>,
        expected: impl Into<Vec<usize>>,
        got: impl Into<Vec<usize>>,
    ) -> Self {
        SynthesisError::ShapeMismatch {
            context: context.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Wrap a network failure raised mid-sample.
    pub fn sampling_failed(step: usize, timestep: usize, cause: SynthesisError) -> Self {
        SynthesisError::SamplingFailed {
            step,
            timestep,
            cause: Box::new(cause),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(step: usize) -> Self {
        SynthesisError::Cancelled { step }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameter_display() {
        let err = SynthesisError::invalid_parameter("perlin", "warp", "unknown parameter name");
        let msg = err.to_string();
        assert!(msg.contains("perlin"));
        assert!(msg.contains("warp"));
        assert!(msg.contains("unknown"));
    }

    #[test]
    fn test_invalid_dimensions_display() {
        let err = SynthesisError::invalid_dimensions(0, 256);
        let msg = err.to_string();
        assert!(msg.contains("0x256"));
    }

    #[test]
    fn test_shape_mismatch_display() {
        let err = SynthesisError::shape_mismatch("network input", vec![1, 64, 64], vec![3, 64, 64]);
        let msg = err.to_string();
        assert!(msg.contains("network input"));
        assert!(msg.contains("[1, 64, 64]"));
        assert!(msg.contains("[3, 64, 64]"));
    }

    #[test]
    fn test_sampling_failed_exposes_cause() {
        let cause = SynthesisError::shape_mismatch("conditioning", vec![90], vec![64]);
        let err = SynthesisError::sampling_failed(3, 712, cause.clone());
        let msg = err.to_string();
        assert!(msg.contains("step 3"));
        assert!(msg.contains("712"));
        assert!(msg.contains("conditioning"));
        assert_eq!(
            std::error::Error::source(&err).map(|e| e.to_string()),
            Some(cause.to_string())
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SynthesisError>();
    }
}
