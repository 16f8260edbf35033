//! Observations the ensemble is calibrated against.

use crate::errors::{CalibrationError, CalibrationResult};
use crate::forward::ForwardModel;
use crate::sampling::{seeded_rng, GaussianNoise, Stream};
use crate::utils::linear_algebra::{column_means, inverse_quadratic_form};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Which replicate(s) form the working truth sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruthSample {
    /// A single noisy replicate
    Replicate(usize),
    /// The mean over all replicates
    Mean,
}

impl Default for TruthSample {
    fn default() -> Self {
        TruthSample::Replicate(0)
    }
}

/// Observed data plus its noise covariance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthObservation {
    /// Noise-free model output, when the data are synthetic
    baseline: Option<Array1<f64>>,

    /// Observation noise covariance: shape (dim, dim)
    covariance: Array2<f64>,

    /// Noisy replicates: shape (n_replicates, dim)
    replicates: Array2<f64>,

    /// The sample the ensemble is calibrated against
    sample: Array1<f64>,

    policy: TruthSample,
}

impl TruthObservation {
    /// Build an observation from measured data and a full noise covariance.
    ///
    /// The covariance must be symmetric positive definite.
    pub fn from_parts(sample: Array1<f64>, covariance: Array2<f64>) -> CalibrationResult<Self> {
        if sample.is_empty() {
            return Err(CalibrationError::InvalidConfiguration(
                "observation must contain at least one value".to_string(),
            ));
        }
        if let Some(value) = sample.iter().find(|v| !v.is_finite()) {
            return Err(CalibrationError::InvalidConfiguration(format!(
                "observation contains a non-finite value ({})",
                value
            )));
        }
        GaussianNoise::new(sample.view(), covariance.view())?;

        let replicates = sample.clone().insert_axis(ndarray::Axis(0));
        Ok(Self {
            baseline: None,
            covariance,
            replicates,
            sample,
            policy: TruthSample::Replicate(0),
        })
    }

    /// Number of observed quantities.
    pub fn dim(&self) -> usize {
        self.sample.len()
    }

    /// The working truth sample `y`.
    pub fn sample(&self) -> ArrayView1<'_, f64> {
        self.sample.view()
    }

    /// Noise covariance `Γ`.
    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    pub fn replicates(&self) -> &Array2<f64> {
        &self.replicates
    }

    /// Noise-free output `G(θ†)` for synthetic observations.
    pub fn baseline(&self) -> Option<ArrayView1<'_, f64>> {
        self.baseline.as_ref().map(|b| b.view())
    }

    pub fn policy(&self) -> TruthSample {
        self.policy
    }

    /// Weighted misfit `(y - g)ᵀ Γ⁻¹ (y - g)` of a predicted output.
    pub fn misfit(&self, predicted: ArrayView1<f64>) -> CalibrationResult<f64> {
        if predicted.len() != self.dim() {
            return Err(CalibrationError::dimension(
                "predicted observation",
                self.dim(),
                predicted.len(),
            ));
        }
        let residual = &self.sample - &predicted;
        inverse_quadratic_form(self.covariance.view(), residual.view()).ok_or_else(|| {
            CalibrationError::InvalidCovariance(
                "covariance matrix is not positive definite".to_string(),
            )
        })
    }
}

/// Settings for synthetic ("perfect model") observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TruthSettings {
    /// Constrained parameter values used to generate the data
    pub parameters: Vec<f64>,

    /// Noise variance of output `i` is `relative_noise * G(θ†)[i]`
    pub relative_noise: f64,

    /// Number of noisy replicates to draw
    pub replicates: usize,

    /// Seed for the observation noise
    pub seed: u64,

    /// Replicate policy for the working truth sample
    pub sample: TruthSample,
}

impl Default for TruthSettings {
    fn default() -> Self {
        Self {
            // NaCl molar mass (kg/mol) and osmotic coefficient
            parameters: vec![0.058443, 0.9],
            relative_noise: 0.1,
            replicates: 10,
            seed: 44,
            sample: TruthSample::Replicate(0),
        }
    }
}

/// Generate synthetic observations from a forward model.
///
/// Evaluates `model` once at `settings.parameters` to get `G_t`, builds the
/// diagonal covariance `Γ = diag(relative_noise * G_t)`, and draws
/// `settings.replicates` noisy copies `G_t + ε`, `ε ~ N(0, Γ)`.
///
/// # Errors
///
/// - [`CalibrationError::InvalidCovariance`] if any variance is not strictly
///   positive, including `relative_noise == 0`
/// - [`CalibrationError::ForwardModel`] if the model fails at the true
///   parameters (reported as iteration 0, member 0)
/// - [`CalibrationError::InvalidConfiguration`] for zero replicates or a
///   replicate index out of range
pub fn generate_truth<M: ForwardModel + ?Sized>(
    model: &M,
    settings: &TruthSettings,
) -> CalibrationResult<TruthObservation> {
    if settings.replicates == 0 {
        return Err(CalibrationError::InvalidConfiguration(
            "at least one noisy replicate is required".to_string(),
        ));
    }
    if let TruthSample::Replicate(index) = settings.sample {
        if index >= settings.replicates {
            return Err(CalibrationError::InvalidConfiguration(format!(
                "truth replicate {} requested but only {} are generated",
                index, settings.replicates
            )));
        }
    }

    let parameters = Array1::from(settings.parameters.clone());
    let baseline = model
        .evaluate(parameters.view())
        .map_err(|reason| CalibrationError::ForwardModel {
            iteration: 0,
            member: 0,
            reason,
        })?;

    let variances = baseline.mapv(|g| settings.relative_noise * g);
    if let Some((index, variance)) = variances
        .iter()
        .enumerate()
        .find(|(_, v)| !(**v > 0.0 && v.is_finite()))
    {
        return Err(CalibrationError::InvalidCovariance(format!(
            "noise variance of output {} is {}, it must be strictly positive",
            index, variance
        )));
    }
    let covariance = Array2::from_diag(&variances);

    let noise = GaussianNoise::new(baseline.view(), covariance.view())?;
    let mut rng = seeded_rng(settings.seed, Stream::Truth);
    let replicates = noise.sample_n(settings.replicates, &mut rng);

    let sample = match settings.sample {
        TruthSample::Replicate(index) => replicates.row(index).to_owned(),
        TruthSample::Mean => column_means(replicates.view()),
    };

    info!(
        dim = baseline.len(),
        replicates = settings.replicates,
        policy = ?settings.sample,
        "generated synthetic truth"
    );

    Ok(TruthObservation {
        baseline: Some(baseline),
        covariance,
        replicates,
        sample,
        policy: settings.sample,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EvaluationFailure;
    use crate::forward::model_fn;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn linear() -> impl ForwardModel {
        model_fn(|p: ArrayView1<f64>| Ok(array![100.0 * p[0], 50.0 + p[1]]))
    }

    #[test]
    fn test_generate_truth_shapes_and_covariance() {
        let settings = TruthSettings {
            parameters: vec![2.0, 10.0],
            relative_noise: 0.5,
            replicates: 10,
            seed: 44,
            sample: TruthSample::Replicate(0),
        };

        let truth = generate_truth(&linear(), &settings).unwrap();

        assert_eq!(truth.dim(), 2);
        assert_eq!(truth.baseline().unwrap(), array![200.0, 60.0]);
        assert_eq!(truth.covariance(), &array![[100.0, 0.0], [0.0, 30.0]]);
        assert_eq!(truth.replicates().dim(), (10, 2));
        assert_eq!(truth.sample(), truth.replicates().row(0));
        assert_eq!(truth.policy(), TruthSample::Replicate(0));
    }

    #[test]
    fn test_generate_truth_is_seeded() {
        let settings = TruthSettings {
            parameters: vec![2.0, 10.0],
            ..TruthSettings::default()
        };

        let a = generate_truth(&linear(), &settings).unwrap();
        let b = generate_truth(&linear(), &settings).unwrap();
        let c = generate_truth(
            &linear(),
            &TruthSettings {
                seed: 45,
                ..settings.clone()
            },
        )
        .unwrap();

        assert_eq!(a, b);
        assert_ne!(a.sample(), c.sample());
    }

    #[test]
    fn test_replicates_differ_from_baseline() {
        let settings = TruthSettings {
            parameters: vec![2.0, 10.0],
            ..TruthSettings::default()
        };
        let truth = generate_truth(&linear(), &settings).unwrap();

        for row in truth.replicates().rows() {
            assert_ne!(row, truth.baseline().unwrap());
        }
    }

    #[test]
    fn test_mean_policy() {
        let settings = TruthSettings {
            parameters: vec![2.0, 10.0],
            sample: TruthSample::Mean,
            ..TruthSettings::default()
        };
        let truth = generate_truth(&linear(), &settings).unwrap();

        let expected = column_means(truth.replicates().view());
        assert_eq!(truth.sample(), expected);
    }

    #[test]
    fn test_zero_noise_is_rejected() {
        let settings = TruthSettings {
            parameters: vec![2.0, 10.0],
            relative_noise: 0.0,
            ..TruthSettings::default()
        };

        let result = generate_truth(&linear(), &settings);
        assert!(matches!(result, Err(CalibrationError::InvalidCovariance(_))));
    }

    #[test]
    fn test_negative_output_gives_invalid_covariance() {
        let settings = TruthSettings {
            parameters: vec![-2.0, 10.0],
            ..TruthSettings::default()
        };

        let error = generate_truth(&linear(), &settings).unwrap_err();
        assert!(matches!(error, CalibrationError::InvalidCovariance(_)));
        assert!(error.to_string().contains("output 0"));
    }

    #[test]
    fn test_replicate_index_out_of_range() {
        let settings = TruthSettings {
            parameters: vec![2.0, 10.0],
            replicates: 3,
            sample: TruthSample::Replicate(3),
            ..TruthSettings::default()
        };
        assert!(matches!(
            generate_truth(&linear(), &settings),
            Err(CalibrationError::InvalidConfiguration(_))
        ));

        let none = TruthSettings {
            parameters: vec![2.0, 10.0],
            replicates: 0,
            ..TruthSettings::default()
        };
        assert!(generate_truth(&linear(), &none).is_err());
    }

    #[test]
    fn test_failing_model() {
        let model = model_fn(|_: ArrayView1<f64>| {
            Err(EvaluationFailure::Failed("no convergence".to_string()))
        });
        let result = generate_truth(&model, &TruthSettings::default());
        assert!(matches!(
            result,
            Err(CalibrationError::ForwardModel { member: 0, .. })
        ));
    }

    #[test]
    fn test_from_parts_and_misfit() {
        let truth =
            TruthObservation::from_parts(array![1.0, 2.0], array![[4.0, 0.0], [0.0, 1.0]])
                .unwrap();

        assert!(truth.baseline().is_none());
        assert_eq!(truth.replicates().dim(), (1, 2));
        assert_relative_eq!(truth.misfit(array![1.0, 2.0].view()).unwrap(), 0.0);
        // 2²/4 + 1²/1
        assert_relative_eq!(truth.misfit(array![3.0, 1.0].view()).unwrap(), 2.0);
        assert!(truth.misfit(array![1.0].view()).is_err());
    }

    #[test]
    fn test_from_parts_validation() {
        assert!(TruthObservation::from_parts(array![1.0], array![[0.0]]).is_err());
        assert!(
            TruthObservation::from_parts(array![1.0, 2.0], array![[1.0]]).is_err()
        );
        assert!(TruthObservation::from_parts(array![f64::NAN], array![[1.0]]).is_err());
    }

    #[test]
    fn test_truth_settings_defaults() {
        let settings = TruthSettings::default();
        assert_eq!(settings.parameters, vec![0.058443, 0.9]);
        assert_eq!(settings.replicates, 10);
        assert_eq!(settings.sample, TruthSample::Replicate(0));
    }
}
