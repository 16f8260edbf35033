//! Perfect-model experiments
//!
//! Observations are generated from the forward model itself at known
//! parameter values, and the calibration is judged by how closely it recovers
//! them.

use crate::config::ExperimentConfig;
use crate::errors::ExperimentResult;
use crate::reporting::{CalibrationReport, OutputComparison};
use aerocal_core::{
    generate_truth, CalibrationHistory, Calibrator, EnsembleKalmanInversion, ForwardModel,
    PriorSet, ProgressInfo, TruthObservation,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything produced by [`PerfectModelExperiment::run`].
#[derive(Debug, Clone)]
pub struct ExperimentOutcome {
    pub truth: TruthObservation,
    pub history: CalibrationHistory,
    pub report: CalibrationReport,
    pub comparison: OutputComparison,
}

/// Truth generation, calibration and reporting for one configuration.
#[derive(Debug)]
pub struct PerfectModelExperiment {
    config: ExperimentConfig,
    priors: PriorSet,
    cancel: Option<Arc<AtomicBool>>,
}

impl PerfectModelExperiment {
    pub fn new(config: ExperimentConfig) -> ExperimentResult<Self> {
        config.validate()?;
        let priors = config.prior_set()?;
        Ok(Self {
            config,
            priors,
            cancel: None,
        })
    }

    /// Stop the calibration at the next iteration boundary once `flag` is set.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn priors(&self) -> &PriorSet {
        &self.priors
    }

    /// Run the experiment against `model`.
    ///
    /// # Errors
    ///
    /// Fails if the truth cannot be generated, the run aborts (the completed
    /// ensembles are carried in [`crate::ExperimentError::Run`]), or the model
    /// fails at the calibrated parameters.
    pub fn run<M: ForwardModel + 'static>(&self, model: M) -> ExperimentResult<ExperimentOutcome> {
        let model = Arc::new(model);
        let settings = &self.config.calibration;

        let truth = generate_truth(&*model, &self.config.truth)?;
        debug!(sample = ?truth.sample().to_vec(), "working truth sample");

        let update = EnsembleKalmanInversion::new(self.config.update.clone())?;
        let mut calibrator = Calibrator::new(self.priors.clone(), Arc::clone(&model), update)?
            .with_evaluation(self.config.evaluation.clone())?;
        if let Some(flag) = &self.cancel {
            calibrator = calibrator.with_cancellation(Arc::clone(flag));
        }

        let history = calibrator.run_with_progress(
            &truth,
            settings.ensemble_size,
            settings.iterations,
            settings.seed,
            Some(|progress: &ProgressInfo| {
                debug!(
                    iteration = progress.iteration + 1,
                    total = progress.total,
                    "experiment progress"
                )
            }),
        )?;

        let report = CalibrationReport::new(
            &history,
            &self.priors,
            Some(self.config.truth.parameters.as_slice()),
        )?;
        let comparison = OutputComparison::new(&*model, &truth, report.final_mean().view())?;

        report.log_summary();
        info!(
            relative_difference = ?comparison.relative_difference,
            "calibrated output against truth"
        );

        Ok(ExperimentOutcome {
            truth,
            history,
            report,
            comparison,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CalibrationSettings;
    use crate::errors::ExperimentError;
    use aerocal_core::{model_fn, CalibrationError};
    use ndarray::{array, ArrayView1};

    fn surrogate() -> impl ForwardModel + 'static {
        model_fn(|p: ArrayView1<f64>| {
            Ok(array![
                500.0 + 100.0 * (p[1] / p[0]).ln(),
                800.0 + 100.0 * (p[0] * p[1]).ln()
            ])
        })
    }

    fn small_config() -> ExperimentConfig {
        ExperimentConfig {
            calibration: CalibrationSettings {
                ensemble_size: 20,
                iterations: 3,
                seed: 1,
            },
            ..ExperimentConfig::default()
        }
    }

    #[test]
    fn test_outcome_is_consistent() {
        let experiment = PerfectModelExperiment::new(small_config()).unwrap();

        let outcome = experiment.run(surrogate()).unwrap();

        assert_eq!(outcome.history.len(), 4);
        assert_eq!(outcome.report.iterations.len(), 4);
        assert_eq!(outcome.truth.replicates().nrows(), 10);
        assert_eq!(
            outcome.comparison.observed,
            outcome.truth.baseline().unwrap().to_vec()
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ExperimentConfig {
            priors: vec![],
            ..ExperimentConfig::default()
        };
        assert!(matches!(
            PerfectModelExperiment::new(config),
            Err(ExperimentError::Calibration(CalibrationError::InvalidPrior(_)))
        ));
    }

    #[test]
    fn test_cancelled_experiment() {
        let flag = Arc::new(AtomicBool::new(true));
        let experiment = PerfectModelExperiment::new(small_config())
            .unwrap()
            .with_cancellation(flag);

        match experiment.run(surrogate()) {
            Err(ExperimentError::Run(failure)) => {
                assert_eq!(failure.error, CalibrationError::Cancelled { iteration: 0 });
                assert_eq!(failure.completed.len(), 1);
            }
            other => panic!("unexpected result {:?}", other.map(|o| o.report)),
        }
    }
}
