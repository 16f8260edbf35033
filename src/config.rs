//! Experiment configuration
//!
//! Every section has defaults reproducing the reference experiment:
//! calibrating the molar mass and osmotic coefficient of a sodium chloride
//! mode from its activated number and mass. A TOML file only needs to list
//! the values it changes.
//!
//! ```toml
//! [calibration]
//! ensemble_size = 100
//!
//! [truth]
//! relative_noise = 0.05
//! sample = "mean"
//!
//! [evaluation]
//! num_threads = 4
//! timeout = 30.0
//! ```

use crate::errors::{ExperimentError, ExperimentResult};
use aerocal_activation::{ActivationForwardModel, ActivationPhysics, ModeParameter, Scenario};
use aerocal_core::{
    Constraint, EkiConfig, EvaluationConfig, ParameterPrior, PriorSet, TruthSettings,
};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Size and seed of the calibration loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Number of ensemble members
    pub ensemble_size: usize,

    /// Number of update iterations
    pub iterations: usize,

    /// Seed for the initial ensemble and the update rule
    pub seed: u64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            ensemble_size: 50,
            iterations: 10,
            seed: 44,
        }
    }
}

/// Complete description of a perfect-model calibration experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Aerosol properties calibrated by the activation forward model
    pub calibrated: Vec<ModeParameter>,

    pub calibration: CalibrationSettings,

    /// Synthetic observations
    pub truth: TruthSettings,

    /// Parallelism and timeout of forward-model evaluation
    pub evaluation: EvaluationConfig,

    /// Ensemble Kalman Inversion settings
    pub update: EkiConfig,

    /// Conditions for the activation forward model
    pub scenario: Scenario,

    /// One prior per calibrated parameter, in parameter-vector order
    pub priors: Vec<ParameterPrior>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        let standard_normal = |name: &str| ParameterPrior {
            name: name.to_string(),
            mean: 0.0,
            std_dev: 1.0,
            constraint: Constraint::BoundedBelow { lower: 0.0 },
        };
        Self {
            calibrated: vec![ModeParameter::MolarMass, ModeParameter::OsmoticCoefficient],
            calibration: CalibrationSettings::default(),
            truth: TruthSettings::default(),
            evaluation: EvaluationConfig::default(),
            update: EkiConfig::default(),
            scenario: Scenario::default(),
            priors: vec![
                standard_normal("molar_mass"),
                standard_normal("osmotic_coefficient"),
            ],
        }
    }
}

impl ExperimentConfig {
    /// Parse and validate a TOML configuration.
    pub fn from_toml_str(text: &str) -> ExperimentResult<Self> {
        let config: ExperimentConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ExperimentResult<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|source| ExperimentError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> ExperimentResult<String> {
        Ok(toml::to_string(self)?)
    }

    /// Validated prior set.
    pub fn prior_set(&self) -> ExperimentResult<PriorSet> {
        Ok(PriorSet::new(self.priors.clone())?)
    }

    /// Check the sections against each other.
    ///
    /// Settings that only concern one component (thread counts, step size,
    /// scenario physics) are checked when that component is built.
    pub fn validate(&self) -> ExperimentResult<()> {
        let priors = self.prior_set()?;
        if self.calibration.ensemble_size == 0 {
            return Err(ExperimentError::InvalidConfiguration(
                "ensemble_size must be at least 1".to_string(),
            ));
        }
        if self.truth.parameters.len() != priors.len() {
            return Err(ExperimentError::InvalidConfiguration(format!(
                "{} true parameter values given for {} priors",
                self.truth.parameters.len(),
                priors.len()
            )));
        }
        // True values must be reachable from unconstrained space
        priors.to_unconstrained(Array1::from(self.truth.parameters.clone()).view())?;
        Ok(())
    }

    /// Build the activation forward model described by this configuration.
    ///
    /// The prior names must match the calibrated aerosol properties, in order.
    pub fn activation_model<P: ActivationPhysics>(
        &self,
        physics: P,
    ) -> ExperimentResult<ActivationForwardModel<P>> {
        let model =
            ActivationForwardModel::new(self.scenario.clone(), physics, self.calibrated.clone())?;
        let prior_names: Vec<&str> = self.priors.iter().map(|p| p.name.as_str()).collect();
        let model_names: Vec<&str> = self.calibrated.iter().map(|p| p.name()).collect();
        if prior_names != model_names {
            return Err(ExperimentError::InvalidConfiguration(format!(
                "priors {:?} do not match the calibrated parameters {:?}",
                prior_names, model_names
            )));
        }
        Ok(model)
    }
}
