use thiserror::Error;

/// Errors surfaced by the detectors.
///
/// Numeric degeneracies (zero-width ranges, zero score variance) are handled
/// locally and never show up here. Only misuse of a detector does.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectorError {
    #[error("Dimension mismatch: expected {expected} features, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Empty observation: at least one feature is required")]
    EmptyObservation,

    #[error("Invalid parameter: {name} - {reason}")]
    InvalidParameter { name: String, reason: String },
}

impl DetectorError {
    pub(crate) fn invalid(name: &str, reason: &str) -> Self {
        DetectorError::InvalidParameter {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DetectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_display() {
        let error = DetectorError::DimensionMismatch {
            expected: 3,
            got: 2,
        };
        assert_eq!(
            error.to_string(),
            "Dimension mismatch: expected 3 features, got 2"
        );
    }

    #[test]
    fn test_invalid_parameter_display() {
        let error = DetectorError::invalid("window_size", "must be positive");
        assert_eq!(
            error.to_string(),
            "Invalid parameter: window_size - must be positive"
        );
    }
}
