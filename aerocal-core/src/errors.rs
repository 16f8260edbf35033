use crate::ensemble::EnsembleState;
use std::time::Duration;
use thiserror::Error;

/// Why a single forward-model evaluation was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationFailure {
    #[error("{0}")]
    Failed(String),
    #[error("output {index} is not finite ({value})")]
    NonFinite { index: usize, value: f64 },
    #[error("evaluation timed out after {0:?}")]
    TimedOut(Duration),
}

/// Error type for invalid calibration operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Invalid prior: {0}")]
    InvalidPrior(String),
    #[error("Invalid noise covariance: {0}")]
    InvalidCovariance(String),
    #[error("Forward model failed for ensemble member {member} at iteration {iteration}: {reason}")]
    ForwardModel {
        iteration: usize,
        member: usize,
        reason: EvaluationFailure,
    },
    #[error("Dimension mismatch in {context}. Expected {expected}, got {found}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        found: usize,
    },
    #[error("Value {value} of parameter '{name}' lies outside the support of its constraint")]
    OutOfSupport { name: String, value: f64 },
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Calibration cancelled before iteration {iteration}")]
    Cancelled { iteration: usize },
    #[error("{0}")]
    Persistence(String),
}

impl CalibrationError {
    pub(crate) fn dimension(context: impl Into<String>, expected: usize, found: usize) -> Self {
        CalibrationError::DimensionMismatch {
            context: context.into(),
            expected,
            found,
        }
    }
}

/// Convenience type for `Result<T, CalibrationError>`.
pub type CalibrationResult<T> = Result<T, CalibrationError>;

/// A run that stopped early.
///
/// The states completed before the failure are handed back untouched so the
/// caller can still inspect or report on them.
#[derive(Error, Debug, Clone)]
#[error("{error} ({} ensemble states completed)", .completed.len())]
pub struct RunFailure {
    #[source]
    pub error: CalibrationError,
    pub completed: Vec<EnsembleState>,
}

impl RunFailure {
    pub fn new(error: CalibrationError, completed: Vec<EnsembleState>) -> Self {
        Self { error, completed }
    }
}
