//! Perfect-model calibration tests.
//!
//! Synthetic observations are generated from known parameters and the
//! calibration is expected to recover them.

use aerocal_core::{
    generate_truth, CalibrationError, Calibrator, CalibrationHistory, EnsembleKalmanInversion,
    EvaluationConfig, EvaluationFailure, ForwardModel, ModelResult, ParameterPrior, PriorSet,
    TruthSettings,
};
use approx::assert_relative_eq;
use is_close::is_close;
use ndarray::{array, ArrayView1};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const TRUE_PARAMETERS: [f64; 2] = [0.058443, 0.9];

fn priors() -> PriorSet {
    PriorSet::new(vec![
        ParameterPrior::standard_normal_bounded_below("molar_mass", 0.0).unwrap(),
        ParameterPrior::standard_normal_bounded_below("osmotic_coefficient", 0.0).unwrap(),
    ])
    .unwrap()
}

/// Smooth surrogate in which both parameters are identifiable.
struct Surrogate;

impl ForwardModel for Surrogate {
    fn evaluate(&self, p: ArrayView1<f64>) -> ModelResult {
        let (molar_mass, osmotic) = (p[0], p[1]);
        Ok(array![
            500.0 + 100.0 * (osmotic / molar_mass).ln(),
            800.0 + 100.0 * (molar_mass * osmotic).ln()
        ])
    }
}

/// Surrogate that returns NaN on one particular call.
struct FailsOnCall {
    calls: AtomicUsize,
    failing_call: usize,
}

impl ForwardModel for FailsOnCall {
    fn evaluate(&self, p: ArrayView1<f64>) -> ModelResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == self.failing_call {
            return Ok(array![f64::NAN, 1.0]);
        }
        Surrogate.evaluate(p)
    }
}

fn truth_settings() -> TruthSettings {
    TruthSettings {
        parameters: TRUE_PARAMETERS.to_vec(),
        ..TruthSettings::default()
    }
}

fn run_reference(calibrator: &mut Calibrator<impl ForwardModel + 'static>) -> CalibrationHistory {
    let truth = generate_truth(&Surrogate, &truth_settings()).unwrap();
    calibrator.run(&truth, 50, 10, 44).unwrap()
}

#[test]
fn test_recovers_true_parameters() {
    let mut calibrator =
        Calibrator::new(priors(), Surrogate, EnsembleKalmanInversion::default()).unwrap();

    let history = run_reference(&mut calibrator);

    assert_eq!(history.len(), 11);
    let mean = history.final_constrained_mean(&priors()).unwrap();
    assert_relative_eq!(mean["molar_mass"], TRUE_PARAMETERS[0], max_relative = 0.1);
    assert_relative_eq!(mean["osmotic_coefficient"], TRUE_PARAMETERS[1], max_relative = 0.1);

    // The fit improves on the prior ensemble
    let misfits = history.misfits();
    assert!(misfits[misfits.len() - 1] < misfits[0]);
}

#[test]
fn test_runs_are_reproducible() {
    let mut first =
        Calibrator::new(priors(), Surrogate, EnsembleKalmanInversion::default()).unwrap();
    let mut second =
        Calibrator::new(priors(), Surrogate, EnsembleKalmanInversion::default()).unwrap();

    let a = run_reference(&mut first);
    let b = run_reference(&mut second);
    let again = run_reference(&mut first);

    assert_eq!(a, b);
    assert_eq!(a, again);
}

#[test]
fn test_parallel_evaluation_matches_serial() {
    let mut serial =
        Calibrator::new(priors(), Surrogate, EnsembleKalmanInversion::default()).unwrap();
    let mut parallel = Calibrator::new(priors(), Surrogate, EnsembleKalmanInversion::default())
        .unwrap()
        .with_evaluation(EvaluationConfig {
            num_threads: Some(4),
            timeout: None,
        })
        .unwrap();

    assert_eq!(run_reference(&mut serial), run_reference(&mut parallel));
}

#[test]
fn test_nan_aborts_run_and_keeps_completed_states() {
    let ensemble_size = 50;
    let model = FailsOnCall {
        calls: AtomicUsize::new(0),
        // Serial evaluation visits members in order: member 3 of iteration 2
        failing_call: 2 * ensemble_size + 3,
    };
    let mut calibrator =
        Calibrator::new(priors(), model, EnsembleKalmanInversion::default()).unwrap();
    let truth = generate_truth(&Surrogate, &truth_settings()).unwrap();

    let failure = calibrator.run(&truth, ensemble_size, 10, 44).unwrap_err();

    match &failure.error {
        CalibrationError::ForwardModel {
            iteration,
            member,
            reason,
        } => {
            assert_eq!(*iteration, 2);
            assert_eq!(*member, 3);
            assert!(matches!(reason, EvaluationFailure::NonFinite { index: 0, .. }));
        }
        other => panic!("unexpected error {:?}", other),
    }

    // The states completed before the failure match an undisturbed run
    let mut reference =
        Calibrator::new(priors(), Surrogate, EnsembleKalmanInversion::default()).unwrap();
    let history = run_reference(&mut reference);
    assert_eq!(failure.completed.len(), 3);
    assert_eq!(failure.completed.as_slice(), &history.states()[..3]);
}

#[test]
fn test_cancel_at_iteration_boundary() {
    let flag = Arc::new(AtomicBool::new(false));
    let mut calibrator = Calibrator::new(priors(), Surrogate, EnsembleKalmanInversion::default())
        .unwrap()
        .with_cancellation(Arc::clone(&flag));
    let truth = generate_truth(&Surrogate, &truth_settings()).unwrap();

    let failure = calibrator
        .run_with_progress(
            &truth,
            20,
            10,
            44,
            Some(|info: &aerocal_core::ProgressInfo| {
                if info.iteration == 1 {
                    flag.store(true, Ordering::SeqCst);
                }
            }),
        )
        .unwrap_err();

    assert_eq!(failure.error, CalibrationError::Cancelled { iteration: 2 });
    assert_eq!(failure.completed.len(), 3);
}

#[test]
fn test_history_trace_and_persistence() {
    use tempfile::tempdir;

    let mut calibrator =
        Calibrator::new(priors(), Surrogate, EnsembleKalmanInversion::default()).unwrap();
    let history = run_reference(&mut calibrator);

    let trace = history.constrained_trace(&priors()).unwrap();
    assert_eq!(trace.dim(), (2, 50, 11));
    let final_mean = history.final_constrained_mean(&priors()).unwrap();
    let trace_mean = trace.index_axis(ndarray::Axis(2), 10).mean_axis(ndarray::Axis(1)).unwrap();
    assert!(is_close!(trace_mean[0], final_mean["molar_mass"]));
    assert!(is_close!(trace_mean[1], final_mean["osmotic_coefficient"]));

    let dir = tempdir().unwrap();
    let path = dir.path().join("calibration.history");
    history.save(&path).unwrap();
    assert_eq!(CalibrationHistory::load(&path).unwrap(), history);
}
