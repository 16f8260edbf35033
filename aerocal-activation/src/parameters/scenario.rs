//! Environmental conditions of an activation scenario

use super::AerosolMode;
use crate::errors::{ActivationError, ActivationResult};
use serde::{Deserialize, Serialize};

/// Specific humidities of the air parcel (kg/kg).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HumidityPartition {
    /// Total water specific humidity
    pub total: f64,
    /// Liquid water specific humidity
    pub liquid: f64,
    /// Ice specific humidity
    pub ice: f64,
}

impl HumidityPartition {
    /// Total water of a parcel near saturation at 294 K and 1000 hPa (kg/kg)
    pub const DEFAULT_TOTAL: f64 = 0.0154;

    /// Water vapour only, no condensate.
    pub fn vapour_only(total: f64) -> Self {
        Self {
            total,
            liquid: 0.0,
            ice: 0.0,
        }
    }

    /// Vapour specific humidity.
    pub fn vapour(&self) -> f64 {
        self.total - self.liquid - self.ice
    }

    pub fn validate(&self) -> ActivationResult<()> {
        if !(self.liquid >= 0.0 && self.ice >= 0.0) {
            return Err(ActivationError::InvalidScenario(format!(
                "condensate humidities must be non-negative, got liquid {} and ice {}",
                self.liquid, self.ice
            )));
        }
        if !(self.total.is_finite() && self.vapour() >= 0.0) {
            return Err(ActivationError::InvalidScenario(format!(
                "total humidity {} is smaller than the condensate it contains",
                self.total
            )));
        }
        Ok(())
    }
}

impl Default for HumidityPartition {
    fn default() -> Self {
        Self::vapour_only(Self::DEFAULT_TOTAL)
    }
}

/// Fixed conditions for an activation calculation.
///
/// Everything the physics needs apart from the calibrated parameters, which
/// are written into [`Scenario::mode`] by the forward model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Air temperature (K).
    ///
    /// Default: 294 K
    pub temperature: f64,

    /// Air pressure (Pa).
    ///
    /// Default: 100 000 Pa
    pub pressure: f64,

    /// Updraft velocity (m/s).
    ///
    /// Default: 0.5 m/s
    pub vertical_velocity: f64,

    /// Humidity of the parcel.
    ///
    /// Default: 0.0154 kg/kg of vapour, no condensate
    pub humidity: HumidityPartition,

    /// The activating aerosol mode.
    pub mode: AerosolMode,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            temperature: 294.0,
            pressure: 1e5,
            vertical_velocity: 0.5,
            humidity: HumidityPartition::default(),
            mode: AerosolMode::default(),
        }
    }
}

impl Scenario {
    pub fn validate(&self) -> ActivationResult<()> {
        for (name, value) in [("temperature", self.temperature), ("pressure", self.pressure)] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ActivationError::InvalidScenario(format!(
                    "{} must be positive and finite, got {}",
                    name, value
                )));
            }
        }
        if !self.vertical_velocity.is_finite() {
            return Err(ActivationError::InvalidScenario(format!(
                "vertical velocity must be finite, got {}",
                self.vertical_velocity
            )));
        }
        self.humidity.validate()?;
        self.mode.validate()
    }
}
