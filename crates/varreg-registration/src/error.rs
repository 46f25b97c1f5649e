//! Error types for registration operations.

use thiserror::Error;
use varreg_core::CoreError;

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// A required component or parameter is missing or inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Field and image grids disagree at a pass boundary.
    #[error("Domain mismatch: {0}")]
    DomainMismatch(String),

    /// A required input image or field was not supplied.
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Numerical instability detected.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Error raised by a core image or field operation.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a domain mismatch error.
    pub fn domain_mismatch(msg: impl Into<String>) -> Self {
        Self::DomainMismatch(msg.into())
    }

    /// Create a missing input error.
    pub fn missing_input(msg: impl Into<String>) -> Self {
        Self::MissingInput(msg.into())
    }

    /// Create a numerical instability error.
    pub fn numerical_instability(msg: impl Into<String>) -> Self {
        Self::NumericalInstability(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RegistrationError::invalid_configuration("no force function");
        assert_eq!(err.to_string(), "Invalid configuration: no force function");
        assert!(matches!(
            RegistrationError::domain_mismatch("x"),
            RegistrationError::DomainMismatch(_)
        ));
    }

    #[test]
    fn test_core_error_conversion() {
        let core = CoreError::invalid_parameter("bad sigma");
        let err: RegistrationError = core.into();
        assert!(matches!(err, RegistrationError::Core(_)));
        assert_eq!(err.to_string(), "Invalid parameter: bad sigma");
    }

    #[test]
    fn test_shape_mismatch() {
        let err = RegistrationError::ShapeMismatch {
            expected: vec![10, 10],
            actual: vec![5, 5],
        };
        let err_str = err.to_string();
        assert!(err_str.contains("expected"));
        assert!(err_str.contains("got"));
    }
}
