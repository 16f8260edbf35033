//! Ensemble update rules.
//!
//! The driver treats the update as a black box: it hands over the current
//! unconstrained ensemble, the forward-model outputs of every member and the
//! observation, and receives the next ensemble with the same population size.
//!
//! [`EnsembleKalmanInversion`] is the standard rule. With `Δt` the step size,
//! `Γ` the noise covariance and `y` the truth sample, member `k` moves by
//!
//! ```text
//! uₖ ← uₖ + C_ug (C_gg + Γ/Δt)⁻¹ (y + √(1/Δt)·ξₖ − gₖ),   ξₖ ~ N(0, Γ)
//! ```
//!
//! where `C_ug` and `C_gg` are population covariances of the ensemble.

use crate::errors::{CalibrationError, CalibrationResult};
use crate::observation::TruthObservation;
use crate::sampling::{seeded_rng, GaussianNoise, Stream};
use crate::utils::linear_algebra::{cross_covariance, solve_spd};
use ndarray::{Array2, ArrayView2};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Produces the next ensemble from the current one and its outputs.
pub trait EnsembleUpdate {
    /// Re-seed any internal randomness at the start of a run.
    ///
    /// Rules without randomness can keep the default no-op.
    fn reset(&mut self, _seed: u64) {}

    /// Compute the updated ensemble.
    ///
    /// # Arguments
    ///
    /// * `ensemble` - Unconstrained members: shape (ensemble_size, n_params)
    /// * `outputs` - Forward-model outputs: shape (ensemble_size, observation dim)
    /// * `observation` - Truth sample and noise covariance
    ///
    /// # Returns
    ///
    /// New unconstrained members with the same shape as `ensemble`.
    fn update(
        &mut self,
        ensemble: ArrayView2<f64>,
        outputs: ArrayView2<f64>,
        observation: &TruthObservation,
    ) -> CalibrationResult<Array2<f64>>;
}

/// Settings for [`EnsembleKalmanInversion`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EkiConfig {
    /// Artificial time step `Δt`
    pub step_size: f64,

    /// Perturb the truth sample for each member
    ///
    /// Disabling this gives the deterministic variant of the update.
    pub perturb_observations: bool,
}

impl Default for EkiConfig {
    fn default() -> Self {
        Self {
            step_size: 1.0,
            perturb_observations: true,
        }
    }
}

/// Perturbed-observation Ensemble Kalman Inversion.
#[derive(Debug, Clone)]
pub struct EnsembleKalmanInversion {
    config: EkiConfig,
    rng: ChaCha8Rng,
}

impl EnsembleKalmanInversion {
    pub fn new(config: EkiConfig) -> CalibrationResult<Self> {
        if !(config.step_size > 0.0 && config.step_size.is_finite()) {
            return Err(CalibrationError::InvalidConfiguration(format!(
                "step size must be positive and finite, got {}",
                config.step_size
            )));
        }
        Ok(Self {
            config,
            rng: seeded_rng(0, Stream::Update),
        })
    }

    pub fn config(&self) -> &EkiConfig {
        &self.config
    }
}

impl Default for EnsembleKalmanInversion {
    fn default() -> Self {
        Self {
            config: EkiConfig::default(),
            rng: seeded_rng(0, Stream::Update),
        }
    }
}

impl EnsembleUpdate for EnsembleKalmanInversion {
    fn reset(&mut self, seed: u64) {
        self.rng = seeded_rng(seed, Stream::Update);
    }

    fn update(
        &mut self,
        ensemble: ArrayView2<f64>,
        outputs: ArrayView2<f64>,
        observation: &TruthObservation,
    ) -> CalibrationResult<Array2<f64>> {
        let n_members = ensemble.nrows();
        if outputs.nrows() != n_members {
            return Err(CalibrationError::dimension(
                "number of forward-model outputs",
                n_members,
                outputs.nrows(),
            ));
        }
        if outputs.ncols() != observation.dim() {
            return Err(CalibrationError::dimension(
                "forward-model output",
                observation.dim(),
                outputs.ncols(),
            ));
        }

        let dt = self.config.step_size;
        let cov_ug = cross_covariance(ensemble, outputs);
        let cov_gg = cross_covariance(outputs, outputs);
        let gain_system = &cov_gg + &(observation.covariance() / dt);

        // Row k holds y + √(1/Δt)·ξₖ − gₖ
        let mut innovations: Array2<f64> = Array2::zeros(outputs.raw_dim());
        innovations.assign(&observation.sample());
        if self.config.perturb_observations {
            let noise = GaussianNoise::zero_mean(observation.covariance().view())?;
            let perturbations = noise.sample_n(n_members, &mut self.rng);
            innovations.scaled_add((1.0 / dt).sqrt(), &perturbations);
        }
        innovations -= &outputs;

        // (C_gg + Γ/Δt)⁻¹ applied to every innovation at once
        let weights = solve_spd(gain_system.view(), innovations.t()).ok_or_else(|| {
            CalibrationError::InvalidCovariance(
                "C_gg + Γ/Δt is not positive definite".to_string(),
            )
        })?;

        Ok(&ensemble + &cov_ug.dot(&weights).t())
    }
}
