//! Ensemble state and calibration history.

use crate::errors::{CalibrationError, CalibrationResult};
use crate::prior::PriorSet;
use crate::utils::linear_algebra::column_means;
use indexmap::IndexMap;
use ndarray::{Array1, Array2, Array3, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Population of parameter vectors at one iteration.
///
/// Members are stored in unconstrained space, one per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredEnsembleState")]
pub struct EnsembleState {
    /// Iteration index, 0 for the initial ensemble
    pub iteration: usize,

    /// Unconstrained members: shape (ensemble_size, n_params)
    pub members: Array2<f64>,
}

impl EnsembleState {
    /// Create an ensemble state, rejecting empty populations.
    pub fn new(iteration: usize, members: Array2<f64>) -> CalibrationResult<Self> {
        let (n_members, n_params) = members.dim();
        if n_members == 0 || n_params == 0 {
            return Err(CalibrationError::InvalidConfiguration(format!(
                "ensemble must contain at least one member and one parameter, got shape ({}, {})",
                n_members, n_params
            )));
        }
        Ok(Self { iteration, members })
    }

    pub fn ensemble_size(&self) -> usize {
        self.members.nrows()
    }

    pub fn n_params(&self) -> usize {
        self.members.ncols()
    }

    /// Unconstrained parameter vector of member `index`.
    pub fn member(&self, index: usize) -> ArrayView1<'_, f64> {
        self.members.row(index)
    }

    /// Ensemble mean in unconstrained space.
    pub fn mean(&self) -> Array1<f64> {
        column_means(self.members.view())
    }

    /// Members mapped to constrained space.
    pub fn constrained(&self, priors: &PriorSet) -> CalibrationResult<Array2<f64>> {
        priors.ensemble_to_constrained(self.members.view())
    }

    /// Mean of the constrained members.
    ///
    /// This is the mean of the transformed members, not the transform of the
    /// unconstrained mean.
    pub fn constrained_mean(&self, priors: &PriorSet) -> CalibrationResult<Array1<f64>> {
        Ok(column_means(self.constrained(priors)?.view()))
    }

    /// Population standard deviation of the constrained members.
    pub fn constrained_std(&self, priors: &PriorSet) -> CalibrationResult<Array1<f64>> {
        Ok(self.constrained(priors)?.std_axis(Axis(0), 0.0))
    }
}

#[derive(Deserialize)]
struct StoredEnsembleState {
    iteration: usize,
    members: Array2<f64>,
}

impl TryFrom<StoredEnsembleState> for EnsembleState {
    type Error = CalibrationError;

    fn try_from(stored: StoredEnsembleState) -> Result<Self, Self::Error> {
        EnsembleState::new(stored.iteration, stored.members)
    }
}

/// Ordered record of a completed calibration run.
///
/// Holds every ensemble from the initial draw to the final update, plus the
/// data misfit of the ensemble-mean output evaluated at each iteration.
///
/// Deserialisation checks that the states are non-empty, share one member
/// shape, are numbered consecutively, and carry one misfit per update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredHistory")]
pub struct CalibrationHistory {
    param_names: Vec<String>,
    states: Vec<EnsembleState>,
    misfits: Vec<f64>,
}

impl CalibrationHistory {
    pub(crate) fn new(param_names: Vec<String>, initial: EnsembleState) -> Self {
        Self {
            param_names,
            states: vec![initial],
            misfits: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, state: EnsembleState, misfit: f64) {
        self.states.push(state);
        self.misfits.push(misfit);
    }

    pub(crate) fn into_states(self) -> Vec<EnsembleState> {
        self.states
    }

    /// Number of stored ensembles (iterations + 1).
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Always false, a history starts with the initial ensemble.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Number of completed update iterations.
    pub fn iterations(&self) -> usize {
        self.misfits.len()
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn states(&self) -> &[EnsembleState] {
        &self.states
    }

    pub fn initial(&self) -> &EnsembleState {
        &self.states[0]
    }

    pub fn final_state(&self) -> &EnsembleState {
        &self.states[self.states.len() - 1]
    }

    /// Data misfit `(y - ḡ)ᵀ Γ⁻¹ (y - ḡ)` for each iteration.
    ///
    /// Entry `i` is measured on the ensemble of iteration `i`, before its update.
    pub fn misfits(&self) -> &[f64] {
        &self.misfits
    }

    /// Constrained members of every stored ensemble.
    ///
    /// # Returns
    ///
    /// Array of shape (n_params, ensemble_size, n_states), i.e. indexed as
    /// parameter, member, iteration.
    pub fn constrained_trace(&self, priors: &PriorSet) -> CalibrationResult<Array3<f64>> {
        let first = self.initial();
        let mut trace = Array3::zeros((first.n_params(), first.ensemble_size(), self.len()));
        for (k, state) in self.states.iter().enumerate() {
            let constrained = state.constrained(priors)?;
            if constrained.dim() != (first.ensemble_size(), first.n_params()) {
                return Err(CalibrationError::dimension(
                    format!("ensemble size at iteration {}", state.iteration),
                    first.ensemble_size(),
                    constrained.nrows(),
                ));
            }
            trace
                .index_axis_mut(Axis(2), k)
                .assign(&constrained.t());
        }
        Ok(trace)
    }

    /// Constrained mean of the final ensemble, keyed by parameter name.
    pub fn final_constrained_mean(
        &self,
        priors: &PriorSet,
    ) -> CalibrationResult<IndexMap<String, f64>> {
        let mean = self.final_state().constrained_mean(priors)?;
        Ok(self
            .param_names
            .iter()
            .cloned()
            .zip(mean.iter().copied())
            .collect())
    }

    /// Save the history to a file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the file to create
    pub fn save<P: AsRef<Path>>(&self, path: P) -> CalibrationResult<()> {
        let file = File::create(path).map_err(|e| {
            CalibrationError::Persistence(format!("Failed to create history file: {}", e))
        })?;
        let mut writer = BufWriter::new(file);

        bincode::serialize_into(&mut writer, self).map_err(|e| {
            CalibrationError::Persistence(format!("Failed to serialize history: {}", e))
        })?;

        writer.flush().map_err(|e| {
            CalibrationError::Persistence(format!("Failed to flush history file: {}", e))
        })?;

        Ok(())
    }

    /// Load a history previously written by [`CalibrationHistory::save`].
    ///
    /// Files holding an inconsistent history are rejected with
    /// [`CalibrationError::Persistence`].
    pub fn load<P: AsRef<Path>>(path: P) -> CalibrationResult<Self> {
        let file = File::open(path).map_err(|e| {
            CalibrationError::Persistence(format!("Failed to open history file: {}", e))
        })?;
        let mut reader = BufReader::new(file);

        let history: CalibrationHistory = bincode::deserialize_from(&mut reader).map_err(|e| {
            CalibrationError::Persistence(format!("Failed to deserialize history: {}", e))
        })?;

        Ok(history)
    }
}

#[derive(Deserialize)]
struct StoredHistory {
    param_names: Vec<String>,
    states: Vec<EnsembleState>,
    misfits: Vec<f64>,
}

impl TryFrom<StoredHistory> for CalibrationHistory {
    type Error = CalibrationError;

    fn try_from(stored: StoredHistory) -> Result<Self, Self::Error> {
        let first = stored.states.first().ok_or_else(|| {
            CalibrationError::InvalidConfiguration(
                "history must contain the initial ensemble".to_string(),
            )
        })?;
        if stored.param_names.len() != first.n_params() {
            return Err(CalibrationError::dimension(
                "history parameter names",
                first.n_params(),
                stored.param_names.len(),
            ));
        }
        if stored.misfits.len() + 1 != stored.states.len() {
            return Err(CalibrationError::dimension(
                "history misfits",
                stored.states.len() - 1,
                stored.misfits.len(),
            ));
        }
        for (k, state) in stored.states.iter().enumerate() {
            if state.members.dim() != first.members.dim() {
                return Err(CalibrationError::InvalidConfiguration(format!(
                    "ensemble at iteration {} has shape {:?}, expected {:?}",
                    state.iteration,
                    state.members.dim(),
                    first.members.dim()
                )));
            }
            if state.iteration != first.iteration + k {
                return Err(CalibrationError::InvalidConfiguration(format!(
                    "history state {} is labelled iteration {}, expected {}",
                    k,
                    state.iteration,
                    first.iteration + k
                )));
            }
        }
        Ok(Self {
            param_names: stored.param_names,
            states: stored.states,
            misfits: stored.misfits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prior::ParameterPrior;
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
        let mut history = CalibrationHistory::new(
            vec!["a".to_string(), "b".to_string()],
            EnsembleState::new(0, array![[0.0, 1.0], [2.0, 3.0], [4.0, 5.0]]).unwrap(),
        );
        history.push(
            EnsembleState::new(1, array![[0.5, 1.5], [2.5, 3.5], [4.5, 5.5]]).unwrap(),
            12.0,
        );
        history
    }

    #[test]
    fn test_ensemble_state_creation() {
        let state = EnsembleState::new(3, array![[0.0, 1.0], [2.0, 3.0], [4.0, 5.0]]).unwrap();

        assert_eq!(state.iteration, 3);
        assert_eq!(state.ensemble_size(), 3);
        assert_eq!(state.n_params(), 2);
        assert_eq!(state.member(1), array![2.0, 3.0]);
        assert_eq!(state.mean(), array![2.0, 3.0]);
    }

    #[test]
    fn test_ensemble_state_validation() {
        assert!(EnsembleState::new(0, Array2::zeros((0, 2))).is_err());
        assert!(EnsembleState::new(0, Array2::zeros((3, 0))).is_err());
    }

    #[test]
    fn test_constrained_statistics() {
        let state = EnsembleState::new(0, array![[0.0, 0.0], [2.0_f64.ln(), 0.0]]).unwrap();
        let priors = priors();

        let mean = state.constrained_mean(&priors).unwrap();
        assert_relative_eq!(mean[0], 1.5, epsilon = 1e-12);
        assert_relative_eq!(mean[1], 1.0, epsilon = 1e-12);

        let std = state.constrained_std(&priors).unwrap();
        assert_relative_eq!(std[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(std[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_history_accessors() {
        let history = history();

        assert_eq!(history.len(), 2);
        assert_eq!(history.iterations(), 1);
        assert_eq!(history.initial().iteration, 0);
        assert_eq!(history.final_state().iteration, 1);
        assert_eq!(history.misfits(), &[12.0]);
        assert_eq!(history.param_names(), &["a", "b"]);
    }

    #[test]
    fn test_constrained_trace_layout() {
        let history = history();
        let trace = history.constrained_trace(&priors()).unwrap();

        // parameter x member x iteration
        assert_eq!(trace.dim(), (2, 3, 2));
        assert_relative_eq!(trace[[0, 1, 0]], 2.0_f64.exp());
        assert_relative_eq!(trace[[1, 2, 1]], 5.5_f64.exp());
    }

    #[test]
    fn test_final_constrained_mean_keys() {
        let history = history();
        let mean = history.final_constrained_mean(&priors()).unwrap();

        assert_eq!(mean.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        let expected_a = (0.5_f64.exp() + 2.5_f64.exp() + 4.5_f64.exp()) / 3.0;
        assert_relative_eq!(mean["a"], expected_a, epsilon = 1e-12);
    }

    #[test]
    fn test_history_save_load() {
        use std::fs;
        use tempfile::tempdir;

        let history = history();

        let dir = tempdir().unwrap();
        let path = dir.path().join("calibration.history");
        history.save(&path).unwrap();

        let loaded = CalibrationHistory::load(&path).unwrap();
        assert_eq!(loaded, history);

        fs::remove_file(&path).unwrap();
    }

    fn assert_load_rejects(history: CalibrationHistory) {
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let path = dir.path().join("malformed.history");
        history.save(&path).unwrap();

        let result = CalibrationHistory::load(&path);
        assert!(
            matches!(result, Err(CalibrationError::Persistence(_))),
            "{:?}",
            result
        );
    }

    #[test]
    fn test_load_rejects_empty_history() {
        assert_load_rejects(CalibrationHistory {
            param_names: vec!["a".to_string()],
            states: vec![],
            misfits: vec![],
        });
    }

    #[test]
    fn test_load_rejects_inconsistent_history() {
        let valid = history();

        let mut extra_name = valid.clone();
        extra_name.param_names.push("c".to_string());
        assert_load_rejects(extra_name);

        let mut missing_misfit = valid.clone();
        missing_misfit.misfits.clear();
        assert_load_rejects(missing_misfit);

        let mut resized = valid.clone();
        resized.states[1].members = array![[0.5, 1.5], [2.5, 3.5]];
        assert_load_rejects(resized);

        let mut renumbered = valid.clone();
        renumbered.states[1].iteration = 5;
        assert_load_rejects(renumbered);

        let mut empty_state = valid;
        empty_state.states[1].members = Array2::zeros((0, 2));
        assert_load_rejects(empty_state);
    }

    #[test]
    fn test_ensemble_state_json_is_validated() {
        let state: EnsembleState = serde_json::from_str(
            r#"{"iteration": 2, "members": {"v": 1, "dim": [1, 2], "data": [0.5, 1.5]}}"#,
        )
        .unwrap();
        assert_eq!(state.n_params(), 2);

        let empty = serde_json::from_str::<EnsembleState>(
            r#"{"iteration": 0, "members": {"v": 1, "dim": [0, 2], "data": []}}"#,
        );
        assert!(empty.is_err());
    }

    #[test]
    fn test_history_load_missing_file() {
        let result = CalibrationHistory::load("/nonexistent/path/history.bin");
        assert!(matches!(result, Err(CalibrationError::Persistence(_))));
    }
}
