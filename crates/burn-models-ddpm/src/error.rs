//! Error types for schedule construction and diffusion queries

use thiserror::Error;

/// Errors that can occur while building a schedule or querying the engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiffusionError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Timestep {t} out of range [{min}, {max}]")]
    TimestepOutOfRange { t: usize, min: usize, max: usize },

    #[error("Numerical instability at t = {t}: {quantity}")]
    NumericalInstability { t: usize, quantity: String },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

impl DiffusionError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn unstable(t: usize, quantity: impl Into<String>) -> Self {
        Self::NumericalInstability {
            t,
            quantity: quantity.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DiffusionError::TimestepOutOfRange { t: 11, min: 1, max: 10 };
        assert_eq!(err.to_string(), "Timestep 11 out of range [1, 10]");

        let err = DiffusionError::unstable(3, "1 - alpha_bar[t] = 0");
        assert_eq!(
            err.to_string(),
            "Numerical instability at t = 3: 1 - alpha_bar[t] = 0"
        );
    }
}
