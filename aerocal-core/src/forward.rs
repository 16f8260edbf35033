//! Forward models and ensemble-wide evaluation.
//!
//! A forward model maps one constrained parameter vector to a vector of
//! predicted observables. Models are treated as pure functions: the same input
//! always yields the same output, and evaluations of different ensemble
//! members never depend on each other. That makes them safe to evaluate in
//! parallel, which [`Evaluator`] does on a `rayon` thread pool when asked to.

use crate::errors::{CalibrationError, CalibrationResult, EvaluationFailure};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Result of a single forward-model evaluation.
pub type ModelResult = Result<Array1<f64>, EvaluationFailure>;

/// A deterministic map from constrained parameters to observables.
///
/// Any configuration the model needs (physical constants, scenario settings)
/// is captured when the model is constructed, so `evaluate` only receives the
/// parameter vector.
pub trait ForwardModel: Send + Sync {
    /// Evaluate the model for one constrained parameter vector.
    fn evaluate(&self, parameters: ArrayView1<f64>) -> ModelResult;
}

impl<M: ForwardModel + ?Sized> ForwardModel for Arc<M> {
    fn evaluate(&self, parameters: ArrayView1<f64>) -> ModelResult {
        (**self).evaluate(parameters)
    }
}

impl<M: ForwardModel + ?Sized> ForwardModel for Box<M> {
    fn evaluate(&self, parameters: ArrayView1<f64>) -> ModelResult {
        (**self).evaluate(parameters)
    }
}

/// Forward model backed by a closure.
///
/// Use [`model_fn`] to build one.
#[derive(Debug, Clone)]
pub struct FnModel<F> {
    f: F,
}

/// Wrap a closure as a [`ForwardModel`].
///
/// ```
/// use aerocal_core::forward::{model_fn, ForwardModel};
/// use ndarray::{array, ArrayView1};
///
/// let model = model_fn(|p: ArrayView1<f64>| Ok(array![p[0] + p[1], p[0] * p[1]]));
/// let output = model.evaluate(array![2.0, 3.0].view()).unwrap();
/// assert_eq!(output, array![5.0, 6.0]);
/// ```
pub fn model_fn<F>(f: F) -> FnModel<F>
where
    F: Fn(ArrayView1<f64>) -> ModelResult + Send + Sync,
{
    FnModel { f }
}

impl<F> ForwardModel for FnModel<F>
where
    F: Fn(ArrayView1<f64>) -> ModelResult + Send + Sync,
{
    fn evaluate(&self, parameters: ArrayView1<f64>) -> ModelResult {
        (self.f)(parameters)
    }
}

/// Controls how ensemble members are evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Number of worker threads, `None` to evaluate members one after another
    /// on the calling thread
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<usize>,

    /// Per-evaluation time limit, in seconds when serialised
    #[serde(with = "optional_seconds", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

mod optional_seconds {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        value.map(|d| d.as_secs_f64()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let seconds = Option::<f64>::deserialize(d)?;
        seconds
            .map(|s| Duration::try_from_secs_f64(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// A failed member evaluation, before the iteration index is attached.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberFailure {
    /// The model failed, returned non-finite values, or timed out
    Evaluation {
        member: usize,
        reason: EvaluationFailure,
    },
    /// The model returned the wrong number of observables
    Dimension {
        member: usize,
        expected: usize,
        found: usize,
    },
}

impl MemberFailure {
    /// Attach the iteration index and convert to a [`CalibrationError`].
    pub fn at_iteration(self, iteration: usize) -> CalibrationError {
        match self {
            MemberFailure::Evaluation { member, reason } => CalibrationError::ForwardModel {
                iteration,
                member,
                reason,
            },
            MemberFailure::Dimension {
                member,
                expected,
                found,
            } => CalibrationError::dimension(
                format!(
                    "forward model output of member {} at iteration {}",
                    member, iteration
                ),
                expected,
                found,
            ),
        }
    }
}

/// Evaluates a forward model over a whole ensemble.
pub struct Evaluator {
    config: EvaluationConfig,
    pool: Option<rayon::ThreadPool>,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("config", &self.config)
            .field(
                "threads",
                &self.pool.as_ref().map(|pool| pool.current_num_threads()),
            )
            .finish()
    }
}

impl Evaluator {
    pub fn new(config: EvaluationConfig) -> CalibrationResult<Self> {
        if config.num_threads == Some(0) {
            return Err(CalibrationError::InvalidConfiguration(
                "number of threads must be positive".to_string(),
            ));
        }
        if config.timeout == Some(Duration::ZERO) {
            return Err(CalibrationError::InvalidConfiguration(
                "evaluation timeout must be positive".to_string(),
            ));
        }
        let pool = match config.num_threads {
            Some(threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| CalibrationError::InvalidConfiguration(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Evaluate every row of `parameters` (constrained space).
    ///
    /// Outputs keep the member order of the input. Every member is evaluated
    /// before failures are inspected, and the failure reported is the one with
    /// the lowest member index, so the outcome does not depend on scheduling.
    ///
    /// # Returns
    ///
    /// Array of shape (ensemble_size, output_dim).
    pub fn evaluate_ensemble<M>(
        &self,
        model: &Arc<M>,
        parameters: ArrayView2<f64>,
        output_dim: usize,
    ) -> Result<Array2<f64>, MemberFailure>
    where
        M: ForwardModel + 'static,
    {
        let n_members = parameters.nrows();
        let timeout = self.config.timeout;
        debug!(n_members, output_dim, ?timeout, "evaluating forward model");

        let evaluate_member = |member: usize| {
            let row = parameters.row(member);
            match timeout {
                Some(limit) => evaluate_with_timeout(model, row.to_owned(), limit),
                None => model.evaluate(row),
            }
        };
        let results: Vec<ModelResult> = match &self.pool {
            Some(pool) => {
                pool.install(|| (0..n_members).into_par_iter().map(evaluate_member).collect())
            }
            None => (0..n_members).map(evaluate_member).collect(),
        };

        let mut outputs = Array2::zeros((n_members, output_dim));
        for (member, result) in results.into_iter().enumerate() {
            let output =
                result.map_err(|reason| MemberFailure::Evaluation { member, reason })?;
            if output.len() != output_dim {
                return Err(MemberFailure::Dimension {
                    member,
                    expected: output_dim,
                    found: output.len(),
                });
            }
            if let Some((index, &value)) = output.iter().enumerate().find(|(_, v)| !v.is_finite())
            {
                return Err(MemberFailure::Evaluation {
                    member,
                    reason: EvaluationFailure::NonFinite { index, value },
                });
            }
            outputs.row_mut(member).assign(&output);
        }
        Ok(outputs)
    }
}

/// Run one evaluation on a detached thread and wait at most `limit` for it.
///
/// A model that hangs keeps its thread alive until it returns, but the
/// calibration stops waiting for it.
fn evaluate_with_timeout<M>(model: &Arc<M>, parameters: Array1<f64>, limit: Duration) -> ModelResult
where
    M: ForwardModel + 'static,
{
    let (tx, rx) = mpsc::channel();
    let model = Arc::clone(model);
    std::thread::spawn(move || {
        // The receiver is gone if the evaluation already timed out
        let _ = tx.send(model.evaluate(parameters.view()));
    });

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(EvaluationFailure::TimedOut(limit)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(EvaluationFailure::Failed(
            "forward model panicked".to_string(),
        )),
    }
}
