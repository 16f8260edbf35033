//! The calibration driver.
//!
//! [`Calibrator`] owns the priors, the forward model and the update rule, and
//! runs a fixed number of iterations against a [`TruthObservation`]. Each
//! iteration maps the ensemble to constrained space, evaluates every member,
//! and hands the outputs to the update rule. There is no convergence-based
//! early stopping.

use crate::ensemble::{CalibrationHistory, EnsembleState};
use crate::errors::{CalibrationError, CalibrationResult, RunFailure};
use crate::forward::{EvaluationConfig, Evaluator, ForwardModel};
use crate::observation::TruthObservation;
use crate::prior::PriorSet;
use crate::sampling::sample_priors;
use crate::update::{EnsembleKalmanInversion, EnsembleUpdate};
use crate::utils::linear_algebra::column_means;
use ndarray::Axis;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Draw the initial ensemble (iteration 0) from the priors.
///
/// # Arguments
///
/// * `priors` - Prior for every calibrated parameter
/// * `ensemble_size` - Number of members, at least one
/// * `seed` - Seed for the ensemble draw
pub fn initialize(
    priors: &PriorSet,
    ensemble_size: usize,
    seed: u64,
) -> CalibrationResult<EnsembleState> {
    if ensemble_size == 0 {
        return Err(CalibrationError::InvalidConfiguration(
            "ensemble size must be at least 1".to_string(),
        ));
    }
    let members = sample_priors(priors, ensemble_size, seed)?;
    info!(
        ensemble_size,
        n_params = priors.len(),
        seed,
        "initialised ensemble from priors"
    );
    EnsembleState::new(0, members)
}

/// Progress of a running calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressInfo {
    /// Index of the iteration that just completed (0-based)
    pub iteration: usize,

    /// Total number of iterations requested
    pub total: usize,

    /// Data misfit of the ensemble before this iteration's update
    pub misfit: f64,
}

/// Iterative ensemble calibration of a forward model.
///
/// # Example
///
/// ```
/// use aerocal_core::driver::Calibrator;
/// use aerocal_core::forward::model_fn;
/// use aerocal_core::observation::TruthObservation;
/// use aerocal_core::prior::{ParameterPrior, PriorSet};
/// use aerocal_core::update::EnsembleKalmanInversion;
/// use ndarray::{array, ArrayView1};
///
/// let priors = PriorSet::new(vec![ParameterPrior::standard_normal_bounded_below("k", 0.0)?])?;
/// let model = model_fn(|p: ArrayView1<f64>| Ok(array![p[0].ln()]));
/// let truth = TruthObservation::from_parts(array![0.5], array![[0.01]])?;
///
/// let mut calibrator = Calibrator::new(priors, model, EnsembleKalmanInversion::default())?;
/// let history = calibrator.run(&truth, 20, 5, 44)?;
/// assert_eq!(history.len(), 6);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Calibrator<M, U = EnsembleKalmanInversion> {
    priors: PriorSet,
    model: Arc<M>,
    update: U,
    evaluator: Evaluator,
    cancel: Option<Arc<AtomicBool>>,
}

impl<M, U> std::fmt::Debug for Calibrator<M, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Calibrator")
            .field("priors", &self.priors)
            .field("evaluator", &self.evaluator)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

impl<M, U> Calibrator<M, U>
where
    M: ForwardModel + 'static,
    U: EnsembleUpdate,
{
    /// Create a calibrator that evaluates members serially.
    ///
    /// # Arguments
    ///
    /// * `priors` - Priors, in parameter-vector order
    /// * `model` - Forward model taking constrained parameters
    /// * `update` - Ensemble update rule
    pub fn new(priors: PriorSet, model: M, update: U) -> CalibrationResult<Self> {
        Ok(Self {
            priors,
            model: Arc::new(model),
            update,
            evaluator: Evaluator::new(EvaluationConfig::default())?,
            cancel: None,
        })
    }

    /// Use the given evaluation settings (worker threads, timeout).
    pub fn with_evaluation(mut self, config: EvaluationConfig) -> CalibrationResult<Self> {
        self.evaluator = Evaluator::new(config)?;
        Ok(self)
    }

    /// Stop at the next iteration boundary once `flag` is set.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn priors(&self) -> &PriorSet {
        &self.priors
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn evaluation(&self) -> &EvaluationConfig {
        self.evaluator.config()
    }

    /// Perform one calibration iteration.
    ///
    /// The input state is left untouched, the returned state carries the next
    /// iteration index and the same population size.
    pub fn step(
        &mut self,
        state: &EnsembleState,
        truth: &TruthObservation,
    ) -> CalibrationResult<EnsembleState> {
        self.advance(state, truth).map(|(next, _)| next)
    }

    /// Run `iterations` calibration iterations from a fresh ensemble.
    ///
    /// The update rule is re-seeded from `seed`, so two runs with identical
    /// inputs produce identical histories.
    ///
    /// # Returns
    ///
    /// Every ensemble from the initial draw to the final update. On failure the
    /// states completed so far are returned inside the [`RunFailure`].
    pub fn run(
        &mut self,
        truth: &TruthObservation,
        ensemble_size: usize,
        iterations: usize,
        seed: u64,
    ) -> Result<CalibrationHistory, RunFailure> {
        self.run_with_progress(
            truth,
            ensemble_size,
            iterations,
            seed,
            None::<fn(&ProgressInfo)>,
        )
    }

    /// Same as [`Calibrator::run`], calling `progress` after every iteration.
    pub fn run_with_progress<F>(
        &mut self,
        truth: &TruthObservation,
        ensemble_size: usize,
        iterations: usize,
        seed: u64,
        mut progress: Option<F>,
    ) -> Result<CalibrationHistory, RunFailure>
    where
        F: FnMut(&ProgressInfo),
    {
        let initial = initialize(&self.priors, ensemble_size, seed)
            .map_err(|error| RunFailure::new(error, Vec::new()))?;
        self.update.reset(seed);

        info!(
            ensemble_size,
            iterations,
            observations = truth.dim(),
            "starting calibration"
        );
        let mut history = CalibrationHistory::new(self.priors.names(), initial);

        for _ in 0..iterations {
            let current = history.final_state();
            let iteration = current.iteration;

            if self.is_cancelled() {
                warn!(iteration, "calibration cancelled");
                return Err(RunFailure::new(
                    CalibrationError::Cancelled { iteration },
                    history.into_states(),
                ));
            }

            match self.advance(current, truth) {
                Ok((next, misfit)) => {
                    info!(iteration, misfit, "calibration iteration complete");
                    history.push(next, misfit);
                    if let Some(ref mut callback) = progress {
                        callback(&ProgressInfo {
                            iteration,
                            total: iterations,
                            misfit,
                        });
                    }
                }
                Err(error) => {
                    warn!(iteration, %error, "calibration aborted");
                    return Err(RunFailure::new(error, history.into_states()));
                }
            }
        }

        Ok(history)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// One iteration, also returning the misfit of the ensemble-mean output.
    fn advance(
        &mut self,
        state: &EnsembleState,
        truth: &TruthObservation,
    ) -> CalibrationResult<(EnsembleState, f64)> {
        if state.n_params() != self.priors.len() {
            return Err(CalibrationError::dimension(
                "ensemble parameters",
                self.priors.len(),
                state.n_params(),
            ));
        }
        let iteration = state.iteration;

        let constrained = state.constrained(&self.priors)?;
        let outputs = self
            .evaluator
            .evaluate_ensemble(&self.model, constrained.view(), truth.dim())
            .map_err(|failure| failure.at_iteration(iteration))?;

        let misfit = truth.misfit(column_means(outputs.view()).view())?;

        let members = self
            .update
            .update(state.members.view(), outputs.view(), truth)?;
        if members.dim() != state.members.dim() {
            return Err(CalibrationError::dimension(
                format!("updated ensemble size at iteration {}", iteration),
                state.ensemble_size(),
                members.nrows(),
            ));
        }

        debug!(
            iteration,
            spread = ?members.std_axis(Axis(0), 0.0).to_vec(),
            "ensemble updated"
        );
        let next = EnsembleState::new(iteration + 1, members)?;
        Ok((next, misfit))
    }
}

/// Calibrate with the default update rule and serial evaluation.
///
/// Shorthand for building a [`Calibrator`] with [`EnsembleKalmanInversion`]
/// and calling [`Calibrator::run`].
pub fn calibrate<M: ForwardModel + 'static>(
    priors: &PriorSet,
    model: M,
    truth: &TruthObservation,
    ensemble_size: usize,
    iterations: usize,
    seed: u64,
) -> Result<CalibrationHistory, RunFailure> {
    let mut calibrator = Calibrator::new(priors.clone(), model, EnsembleKalmanInversion::default())
        .map_err(|error| RunFailure::new(error, Vec::new()))?;
    calibrator.run(truth, ensemble_size, iterations, seed)
}
