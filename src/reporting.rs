//! Summaries of calibration runs
//!
//! Reporting only consumes a finished [`CalibrationHistory`]; nothing here is
//! called from inside the calibration loop.

use crate::errors::{ExperimentError, ExperimentResult};
use aerocal_core::{CalibrationHistory, ForwardModel, PriorSet, TruthObservation};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::info;

/// Constrained ensemble moments at one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: usize,

    /// Mean of every parameter, in parameter-vector order
    pub mean: Vec<f64>,

    /// Population standard deviation of every parameter
    pub std_dev: Vec<f64>,

    /// Data misfit of this ensemble, absent for the final ensemble which is
    /// never evaluated
    pub misfit: Option<f64>,
}

/// Final estimate of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub std_dev: f64,

    /// Value used to generate the observations, if known
    pub truth: Option<f64>,

    /// `(mean - truth) / truth`
    pub relative_error: Option<f64>,
}

/// Per-iteration parameter moments and the final estimates of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub parameters: Vec<ParameterSummary>,
    pub iterations: Vec<IterationSummary>,
}

impl CalibrationReport {
    /// Summarise a calibration history.
    ///
    /// # Arguments
    ///
    /// * `history` - The completed run
    /// * `priors` - Priors used for the run, to map members to constrained space
    /// * `truth` - True constrained parameter values, when known
    pub fn new(
        history: &CalibrationHistory,
        priors: &PriorSet,
        truth: Option<&[f64]>,
    ) -> ExperimentResult<Self> {
        if let Some(values) = truth {
            if values.len() != priors.len() {
                return Err(ExperimentError::InvalidConfiguration(format!(
                    "{} true values given for {} parameters",
                    values.len(),
                    priors.len()
                )));
            }
        }

        let iterations = history
            .states()
            .iter()
            .map(|state| -> ExperimentResult<IterationSummary> {
                Ok(IterationSummary {
                    iteration: state.iteration,
                    mean: state.constrained_mean(priors)?.to_vec(),
                    std_dev: state.constrained_std(priors)?.to_vec(),
                    misfit: history.misfits().get(state.iteration).copied(),
                })
            })
            .collect::<ExperimentResult<Vec<_>>>()?;

        let last = iterations.last().ok_or_else(|| {
            ExperimentError::InvalidConfiguration("history contains no ensembles".to_string())
        })?;
        if history.param_names().len() != last.mean.len() {
            return Err(ExperimentError::InvalidConfiguration(format!(
                "{} parameter names given for {} parameters",
                history.param_names().len(),
                last.mean.len()
            )));
        }
        let parameters = history
            .param_names()
            .iter()
            .zip(last.mean.iter().zip(&last.std_dev))
            .enumerate()
            .map(|(i, (name, (&mean, &std_dev)))| {
                let value = truth.and_then(|t| t.get(i).copied());
                ParameterSummary {
                    name: name.clone(),
                    mean,
                    std_dev,
                    truth: value,
                    relative_error: value.map(|t| (mean - t) / t),
                }
            })
            .collect();

        Ok(Self {
            parameters,
            iterations,
        })
    }

    /// Final ensemble mean in constrained space.
    pub fn final_mean(&self) -> Array1<f64> {
        self.parameters.iter().map(|p| p.mean).collect()
    }

    pub fn to_json(&self) -> ExperimentResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ExperimentResult<()> {
        fs::write(path.as_ref(), self.to_json()?).map_err(|source| ExperimentError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })
    }

    /// Emit the final estimates as structured log events.
    pub fn log_summary(&self) {
        for parameter in &self.parameters {
            info!(
                parameter = %parameter.name,
                mean = parameter.mean,
                std_dev = parameter.std_dev,
                truth = ?parameter.truth,
                relative_error = ?parameter.relative_error,
                "calibrated parameter"
            );
        }
        if let Some(misfit) = self.iterations.iter().rev().find_map(|it| it.misfit) {
            info!(misfit, iterations = self.iterations.len() - 1, "final data misfit");
        }
    }
}

impl fmt::Display for CalibrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>5}", "iter")?;
        for parameter in &self.parameters {
            write!(f, " {:>25}", parameter.name)?;
        }
        writeln!(f, " {:>12}", "misfit")?;

        for summary in &self.iterations {
            write!(f, "{:>5}", summary.iteration)?;
            for (mean, std_dev) in summary.mean.iter().zip(&summary.std_dev) {
                write!(f, " {:>25}", format!("{:.4e} ± {:.1e}", mean, std_dev))?;
            }
            match summary.misfit {
                Some(misfit) => writeln!(f, " {:>12.4e}", misfit)?,
                None => writeln!(f, " {:>12}", "-")?,
            }
        }

        writeln!(f)?;
        for parameter in &self.parameters {
            write!(
                f,
                "{}: {:.6} ± {:.2e}",
                parameter.name, parameter.mean, parameter.std_dev
            )?;
            if let (Some(truth), Some(error)) = (parameter.truth, parameter.relative_error) {
                write!(f, " (truth {}, error {:+.2}%)", truth, 100.0 * error)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Observed output next to the output of the calibrated parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputComparison {
    /// Noise-free output at the true parameters, or the observation itself
    /// for measured data
    pub observed: Vec<f64>,

    /// Model output at the final ensemble mean
    pub calibrated: Vec<f64>,

    /// `(calibrated - observed) / observed`
    pub relative_difference: Vec<f64>,
}

impl OutputComparison {
    /// Evaluate `model` at `parameters` and compare with the observation.
    pub fn new<M: ForwardModel + ?Sized>(
        model: &M,
        truth: &TruthObservation,
        parameters: ArrayView1<f64>,
    ) -> ExperimentResult<Self> {
        let observed = truth
            .baseline()
            .unwrap_or_else(|| truth.sample())
            .to_owned();
        let calibrated = model.evaluate(parameters)?;
        if calibrated.len() != observed.len() {
            return Err(ExperimentError::InvalidConfiguration(format!(
                "model returned {} outputs for {} observations",
                calibrated.len(),
                observed.len()
            )));
        }
        let relative_difference = (&calibrated - &observed) / &observed;
        Ok(Self {
            observed: observed.to_vec(),
            calibrated: calibrated.to_vec(),
            relative_difference: relative_difference.to_vec(),
        })
    }
}

impl fmt::Display for OutputComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>6} {:>14} {:>14} {:>10}", "output", "observed", "calibrated", "diff")?;
        for (i, ((observed, calibrated), diff)) in self
            .observed
            .iter()
            .zip(&self.calibrated)
            .zip(&self.relative_difference)
            .enumerate()
        {
            writeln!(
                f,
                "{:>6} {:>14.6e} {:>14.6e} {:>9.2}%",
                i,
                observed,
                calibrated,
                100.0 * diff
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aerocal_core::{calibrate, model_fn, ParameterPrior};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn priors() -> PriorSet {
        PriorSet::new(vec![
            ParameterPrior::standard_normal_bounded_below("a", 0.0).unwrap(),
            ParameterPrior::standard_normal_bounded_below("b", 0.0).unwrap(),
        ])
        .unwrap()
    }

    fn history() -> CalibrationHistory {
        let model = model_fn(|p: ArrayView1<f64>| Ok(array![p[0].ln(), p[1].ln()]));
        let truth =
            TruthObservation::from_parts(array![0.0, 1.0], array![[0.01, 0.0], [0.0, 0.01]])
                .unwrap();
        calibrate(&priors(), model, &truth, 20, 3, 44).unwrap()
    }

    #[test]
    fn test_report_layout() {
        let history = history();
        let report = CalibrationReport::new(&history, &priors(), Some(&[1.0, 2.0])).unwrap();

        assert_eq!(report.iterations.len(), 4);
        assert_eq!(report.parameters.len(), 2);
        assert_eq!(report.iterations[0].misfit, Some(history.misfits()[0]));
        assert_eq!(report.iterations[3].misfit, None);

        let final_mean = history.final_constrained_mean(&priors()).unwrap();
        assert_relative_eq!(report.parameters[0].mean, final_mean["a"]);
        assert_eq!(report.parameters[1].truth, Some(2.0));
        assert_relative_eq!(
            report.parameters[1].relative_error.unwrap(),
            (final_mean["b"] - 2.0) / 2.0
        );
        assert_eq!(report.final_mean().len(), 2);
    }

    #[test]
    fn test_report_without_truth() {
        let report = CalibrationReport::new(&history(), &priors(), None).unwrap();
        assert!(report.parameters.iter().all(|p| p.relative_error.is_none()));

        assert!(CalibrationReport::new(&history(), &priors(), Some(&[1.0])).is_err());
    }

    #[test]
    fn test_report_display() {
        let report = CalibrationReport::new(&history(), &priors(), Some(&[1.0, 2.0])).unwrap();
        let text = report.to_string();

        assert!(text.lines().next().unwrap().contains("misfit"));
        assert!(text.contains("a: "));
        assert!(text.contains("(truth 2, error"));
        // header, 4 iterations, blank line, 2 parameters
        assert_eq!(text.lines().count(), 8);
    }

    #[test]
    fn test_report_json() {
        let report = CalibrationReport::new(&history(), &priors(), None).unwrap();

        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["iterations"].as_array().unwrap().len(), 4);
        assert_eq!(value["parameters"][1]["name"], "b");
        assert!(value["parameters"][0]["truth"].is_null());
        assert!(value["iterations"][3]["misfit"].is_null());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.save_json(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), json);
    }

    #[test]
    fn test_output_comparison() {
        let model = model_fn(|p: ArrayView1<f64>| Ok(array![2.0 * p[0], 3.0 * p[1]]));
        let truth =
            TruthObservation::from_parts(array![2.0, 6.0], array![[1.0, 0.0], [0.0, 1.0]]).unwrap();

        let comparison = OutputComparison::new(&model, &truth, array![1.1, 2.0].view()).unwrap();

        assert_eq!(comparison.observed, vec![2.0, 6.0]);
        assert_eq!(comparison.calibrated, vec![2.2, 6.0]);
        assert_relative_eq!(comparison.relative_difference[0], 0.1, epsilon = 1e-12);
        assert_eq!(comparison.relative_difference[1], 0.0);
        assert_eq!(comparison.to_string().lines().count(), 3);

        let short = model_fn(|p: ArrayView1<f64>| Ok(array![p[0]]));
        assert!(OutputComparison::new(&short, &truth, array![1.0, 2.0].view()).is_err());
    }
}
