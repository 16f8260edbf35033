//! Activation forward model
//!
//! [`ActivationForwardModel`] turns a vector of calibrated aerosol properties
//! into the observables of an activation calculation: the number and mass of
//! aerosol activated into cloud droplets. The scenario is fixed when the model
//! is built, so evaluation only takes the parameter vector.

use crate::errors::{ActivationError, ActivationResult};
use crate::parameters::{AerosolMode, Scenario};
use aerocal_core::{EvaluationFailure, ForwardModel, ModelResult};
use ndarray::{array, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Activated fraction of an aerosol mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivatedAerosol {
    /// Activated number concentration (m⁻³)
    pub number: f64,
    /// Activated mass concentration (kg/m³)
    pub mass: f64,
}

/// An aerosol activation parameterisation.
///
/// Implementations compute how much of the scenario's aerosol mode activates.
/// They must be deterministic: identical scenarios give identical results.
pub trait ActivationPhysics: Send + Sync {
    fn activate(&self, scenario: &Scenario) -> Result<ActivatedAerosol, EvaluationFailure>;
}

impl<F> ActivationPhysics for F
where
    F: Fn(&Scenario) -> Result<ActivatedAerosol, EvaluationFailure> + Send + Sync,
{
    fn activate(&self, scenario: &Scenario) -> Result<ActivatedAerosol, EvaluationFailure> {
        self(scenario)
    }
}

/// Aerosol mode properties that can be calibrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeParameter {
    MolarMass,
    OsmoticCoefficient,
    Dissociation,
    Density,
    DryRadius,
    Kappa,
}

impl ModeParameter {
    /// Name used for the matching prior.
    pub fn name(&self) -> &'static str {
        match self {
            ModeParameter::MolarMass => "molar_mass",
            ModeParameter::OsmoticCoefficient => "osmotic_coefficient",
            ModeParameter::Dissociation => "dissociation",
            ModeParameter::Density => "density",
            ModeParameter::DryRadius => "dry_radius",
            ModeParameter::Kappa => "kappa",
        }
    }

    pub fn get(&self, mode: &AerosolMode) -> f64 {
        match self {
            ModeParameter::MolarMass => mode.molar_mass,
            ModeParameter::OsmoticCoefficient => mode.osmotic_coefficient,
            ModeParameter::Dissociation => mode.dissociation,
            ModeParameter::Density => mode.density,
            ModeParameter::DryRadius => mode.dry_radius,
            ModeParameter::Kappa => mode.kappa,
        }
    }

    pub fn set(&self, mode: &mut AerosolMode, value: f64) {
        let field = match self {
            ModeParameter::MolarMass => &mut mode.molar_mass,
            ModeParameter::OsmoticCoefficient => &mut mode.osmotic_coefficient,
            ModeParameter::Dissociation => &mut mode.dissociation,
            ModeParameter::Density => &mut mode.density,
            ModeParameter::DryRadius => &mut mode.dry_radius,
            ModeParameter::Kappa => &mut mode.kappa,
        };
        *field = value;
    }
}

/// Forward model mapping calibrated mode properties to
/// `[activated number, activated mass]`.
#[derive(Debug, Clone)]
pub struct ActivationForwardModel<P> {
    scenario: Scenario,
    physics: P,
    calibrated: Vec<ModeParameter>,
}

impl<P: ActivationPhysics> ActivationForwardModel<P> {
    /// Create a forward model.
    ///
    /// # Arguments
    ///
    /// * `scenario` - Fixed conditions, validated here
    /// * `physics` - Activation parameterisation
    /// * `calibrated` - Mode properties overridden by the parameter vector, in
    ///   parameter-vector order
    pub fn new(
        scenario: Scenario,
        physics: P,
        calibrated: Vec<ModeParameter>,
    ) -> ActivationResult<Self> {
        scenario.validate()?;
        if calibrated.is_empty() {
            return Err(ActivationError::InvalidParameters(
                "at least one mode parameter must be calibrated".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = calibrated.iter().find(|p| !seen.insert(**p)) {
            return Err(ActivationError::InvalidParameters(format!(
                "'{}' is listed more than once",
                duplicate.name()
            )));
        }
        Ok(Self {
            scenario,
            physics,
            calibrated,
        })
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn calibrated(&self) -> &[ModeParameter] {
        &self.calibrated
    }

    /// Names of the calibrated parameters, in parameter-vector order.
    pub fn parameter_names(&self) -> Vec<String> {
        self.calibrated.iter().map(|p| p.name().to_string()).collect()
    }

    /// Values of the calibrated parameters in the base scenario.
    pub fn scenario_parameters(&self) -> Vec<f64> {
        self.calibrated
            .iter()
            .map(|p| p.get(&self.scenario.mode))
            .collect()
    }

    /// The scenario with the calibrated properties replaced by `parameters`.
    pub fn scenario_for(&self, parameters: ArrayView1<f64>) -> Result<Scenario, EvaluationFailure> {
        if parameters.len() != self.calibrated.len() {
            return Err(EvaluationFailure::Failed(format!(
                "expected {} parameters, got {}",
                self.calibrated.len(),
                parameters.len()
            )));
        }
        let mut scenario = self.scenario.clone();
        for (parameter, &value) in self.calibrated.iter().zip(parameters.iter()) {
            parameter.set(&mut scenario.mode, value);
        }
        scenario
            .validate()
            .map_err(|e| EvaluationFailure::Failed(e.to_string()))?;
        Ok(scenario)
    }
}

impl<P: ActivationPhysics> ForwardModel for ActivationForwardModel<P> {
    fn evaluate(&self, parameters: ArrayView1<f64>) -> ModelResult {
        let scenario = self.scenario_for(parameters)?;
        let activated = self.physics.activate(&scenario)?;
        debug!(
            number = activated.number,
            mass = activated.mass,
            "activation evaluated"
        );
        Ok(array![activated.number, activated.mass])
    }
}
