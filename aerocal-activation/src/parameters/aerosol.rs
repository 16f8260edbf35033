//! Aerosol mode parameters

use crate::constants::{DENSITY_WATER, MOLAR_MASS_WATER};
use crate::errors::{ActivationError, ActivationResult};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// A single lognormal aerosol mode of one soluble species.
///
/// # Size Distribution
///
/// The number size distribution is lognormal in dry radius:
///
/// $$\frac{dN}{d\ln r} = \frac{N}{\sqrt{2\pi}\ln\sigma_g}
///   \exp\left(-\frac{\ln^2(r/r_g)}{2\ln^2\sigma_g}\right)$$
///
/// with geometric mean radius $r_g$ and geometric standard deviation
/// $\sigma_g$.
///
/// # Hygroscopicity
///
/// Two descriptions of the solute are carried: the classical one (molar mass,
/// osmotic coefficient, dissociation) and the single-parameter `kappa`. The
/// classical parameters combine into the hygroscopicity
///
/// $$B = \frac{\nu \phi \epsilon M_w \rho_s}{M_s \rho_w}$$
///
/// returned by [`AerosolMode::hygroscopicity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AerosolMode {
    /// Geometric mean dry radius (m).
    ///
    /// Default: 0.243 µm
    pub dry_radius: f64,

    /// Geometric standard deviation (dimensionless, > 1).
    ///
    /// Default: 1.4
    pub geometric_std: f64,

    /// Total number concentration (m⁻³).
    ///
    /// Default: 100 cm⁻³
    pub number_concentration: f64,

    /// Mass mixing ratio of the soluble species within the particle.
    pub mass_mixing_ratio: f64,

    /// Volume mixing ratio of the soluble species within the particle.
    pub volume_mixing_ratio: f64,

    /// Number of ions the solute dissociates into.
    ///
    /// Default: 2 (NaCl)
    pub dissociation: f64,

    /// Osmotic coefficient (dimensionless).
    ///
    /// Default: 0.9
    pub osmotic_coefficient: f64,

    /// Molar mass of the solute (kg/mol).
    ///
    /// Default: 0.058443 kg/mol (NaCl)
    pub molar_mass: f64,

    /// Density of the solute (kg/m³).
    ///
    /// Default: 2170 kg/m³ (NaCl)
    pub density: f64,

    /// Kappa-Köhler hygroscopicity (dimensionless).
    ///
    /// Default: 1.28 (NaCl)
    pub kappa: f64,
}

impl Default for AerosolMode {
    fn default() -> Self {
        Self {
            dry_radius: 0.243e-6,
            geometric_std: 1.4,
            number_concentration: 100.0 * 1e6,
            mass_mixing_ratio: 1.0,
            volume_mixing_ratio: 1.0,
            dissociation: 2.0,
            osmotic_coefficient: 0.9,
            molar_mass: 0.058443,
            density: 2170.0,
            kappa: 1.28,
        }
    }
}

impl AerosolMode {
    /// Check that every property is physically meaningful.
    pub fn validate(&self) -> ActivationResult<()> {
        let positive = [
            ("dry_radius", self.dry_radius),
            ("number_concentration", self.number_concentration),
            ("dissociation", self.dissociation),
            ("osmotic_coefficient", self.osmotic_coefficient),
            ("molar_mass", self.molar_mass),
            ("density", self.density),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(ActivationError::InvalidScenario(format!(
                    "aerosol {} must be positive and finite, got {}",
                    name, value
                )));
            }
        }
        if !(self.geometric_std > 1.0 && self.geometric_std.is_finite()) {
            return Err(ActivationError::InvalidScenario(format!(
                "geometric standard deviation must be greater than 1, got {}",
                self.geometric_std
            )));
        }
        for (name, value) in [
            ("mass_mixing_ratio", self.mass_mixing_ratio),
            ("volume_mixing_ratio", self.volume_mixing_ratio),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ActivationError::InvalidScenario(format!(
                    "{} must lie in (0, 1], got {}",
                    name, value
                )));
            }
        }
        if !(self.kappa >= 0.0 && self.kappa.is_finite()) {
            return Err(ActivationError::InvalidScenario(format!(
                "kappa must be non-negative, got {}",
                self.kappa
            )));
        }
        Ok(())
    }

    /// Hygroscopicity `B` derived from the classical solute parameters.
    pub fn hygroscopicity(&self) -> f64 {
        self.dissociation
            * self.osmotic_coefficient
            * self.mass_mixing_ratio
            * MOLAR_MASS_WATER
            * self.density
            / (self.molar_mass * DENSITY_WATER)
    }

    /// Total dry aerosol mass per unit volume of air (kg/m³).
    ///
    /// Uses the third moment of the lognormal distribution,
    /// `N·(4/3)π r_g³ ρ·exp(9/2 ln²σ_g)`.
    pub fn dry_mass_concentration(&self) -> f64 {
        let ln_std = self.geometric_std.ln();
        self.number_concentration
            * 4.0
            / 3.0
            * PI
            * self.dry_radius.powi(3)
            * self.density
            * (4.5 * ln_std * ln_std).exp()
    }
}
