use aerocal_activation::ActivationError;
use aerocal_core::{CalibrationError, EvaluationFailure, RunFailure};
use std::path::PathBuf;
use thiserror::Error;

/// Error type for experiment set-up, execution and reporting.
#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error("Calibration run failed: {0}")]
    Run(#[from] RunFailure),
    #[error(transparent)]
    Activation(#[from] ActivationError),
    #[error("Forward model failed at the calibrated parameters: {0}")]
    Evaluation(#[from] EvaluationFailure),
    #[error("Invalid experiment configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialise configuration: {0}")]
    Serialise(#[from] toml::ser::Error),
    #[error("Failed to export report: {0}")]
    Export(#[from] serde_json::Error),
}

/// Convenience type for `Result<T, ExperimentError>`.
pub type ExperimentResult<T> = Result<T, ExperimentError>;
