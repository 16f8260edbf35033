use thiserror::Error;

/// Error type for invalid activation scenarios and models.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActivationError {
    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),
    #[error("Invalid calibrated parameters: {0}")]
    InvalidParameters(String),
}

/// Convenience type for `Result<T, ActivationError>`.
pub type ActivationResult<T> = Result<T, ActivationError>;
