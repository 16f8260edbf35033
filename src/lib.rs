//! Perfect-model calibration of aerosol properties
//!
//! Ties the calibration engine in [`aerocal_core`] to the activation scenarios
//! in [`aerocal_activation`]: an [`ExperimentConfig`] read from TOML describes
//! the priors, the synthetic truth and the calibration loop, and
//! [`PerfectModelExperiment`] runs it against any forward model, producing a
//! [`CalibrationReport`].

pub mod config;
pub mod errors;
pub mod experiment;
pub mod reporting;

pub use config::{CalibrationSettings, ExperimentConfig};
pub use errors::{ExperimentError, ExperimentResult};
pub use experiment::{ExperimentOutcome, PerfectModelExperiment};
pub use reporting::{CalibrationReport, IterationSummary, OutputComparison, ParameterSummary};
