//! Ensemble Kalman calibration of black-box forward models
//!
//! A population of candidate parameter vectors is drawn from Gaussian priors in
//! unconstrained space, mapped onto physical (constrained) values, pushed
//! through a forward model and nudged towards the observations by an ensemble
//! update rule. The loop runs for a fixed number of iterations and every
//! intermediate ensemble is kept for later reporting.
//!
//! # Module Organisation
//!
//! - `prior`: parameter priors and the constrained/unconstrained transforms
//! - `sampling`: seeded random streams and Gaussian noise
//! - `observation`: truth observations, synthetic or measured
//! - `ensemble`: ensemble state and the history of a run
//! - `forward`: the forward-model trait and (parallel) ensemble evaluation
//! - `update`: ensemble update rules, Ensemble Kalman Inversion by default
//! - `driver`: the calibration loop

pub mod driver;
pub mod ensemble;
pub mod errors;
pub mod forward;
pub mod observation;
pub mod prior;
pub mod sampling;
pub mod update;
pub mod utils;

pub use driver::{calibrate, initialize, Calibrator, ProgressInfo};
pub use ensemble::{CalibrationHistory, EnsembleState};
pub use errors::{CalibrationError, CalibrationResult, EvaluationFailure, RunFailure};
pub use forward::{model_fn, EvaluationConfig, ForwardModel, ModelResult};
pub use observation::{generate_truth, TruthObservation, TruthSample, TruthSettings};
pub use prior::{Constraint, ParameterPrior, PriorSet};
pub use update::{EkiConfig, EnsembleKalmanInversion, EnsembleUpdate};
