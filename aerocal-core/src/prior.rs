//! Parameter priors and the constrained/unconstrained transforms.
//!
//! Every calibrated parameter is represented internally by an unconstrained
//! real number with a Gaussian prior. A [`Constraint`] maps that number onto the
//! physically meaningful (constrained) range and back again.
//!
//! All transforms are monotonic and invertible on the support of the
//! constraint, so `to_unconstrained(to_constrained(u)) == u` up to rounding.

use crate::errors::{CalibrationError, CalibrationResult};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Mapping between unconstrained and constrained parameter space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    /// Identity transform
    #[default]
    Unbounded,
    /// `c = exp(u) + lower`
    BoundedBelow { lower: f64 },
    /// `c = upper - exp(-u)`
    BoundedAbove { upper: f64 },
    /// `c = lower + (upper - lower) * sigmoid(u)`
    Bounded { lower: f64, upper: f64 },
}

impl Constraint {
    /// Check that the bounds describe a non-empty interval.
    pub fn validate(&self) -> CalibrationResult<()> {
        match *self {
            Constraint::Unbounded => Ok(()),
            Constraint::BoundedBelow { lower: bound } | Constraint::BoundedAbove { upper: bound } => {
                if bound.is_finite() {
                    Ok(())
                } else {
                    Err(CalibrationError::InvalidPrior(format!(
                        "constraint bound must be finite, got {}",
                        bound
                    )))
                }
            }
            Constraint::Bounded { lower, upper } => {
                if !(lower.is_finite() && upper.is_finite()) {
                    return Err(CalibrationError::InvalidPrior(format!(
                        "constraint bounds must be finite, got ({}, {})",
                        lower, upper
                    )));
                }
                if lower >= upper {
                    return Err(CalibrationError::InvalidPrior(format!(
                        "lower bound {} must be strictly less than upper bound {}",
                        lower, upper
                    )));
                }
                Ok(())
            }
        }
    }

    /// Whether `value` lies strictly inside the constrained range.
    pub fn contains(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match *self {
            Constraint::Unbounded => true,
            Constraint::BoundedBelow { lower } => value > lower,
            Constraint::BoundedAbove { upper } => value < upper,
            Constraint::Bounded { lower, upper } => value > lower && value < upper,
        }
    }

    /// Map an unconstrained value into the constrained range.
    pub fn to_constrained(&self, u: f64) -> f64 {
        match *self {
            Constraint::Unbounded => u,
            Constraint::BoundedBelow { lower } => u.exp() + lower,
            Constraint::BoundedAbove { upper } => upper - (-u).exp(),
            Constraint::Bounded { lower, upper } => {
                // Logistic form stays finite for large |u|
                lower + (upper - lower) / (1.0 + (-u).exp())
            }
        }
    }

    /// Map a constrained value back to unconstrained space.
    ///
    /// Returns `None` when `c` lies outside the support.
    pub fn to_unconstrained(&self, c: f64) -> Option<f64> {
        if !self.contains(c) {
            return None;
        }
        let u = match *self {
            Constraint::Unbounded => c,
            Constraint::BoundedBelow { lower } => (c - lower).ln(),
            Constraint::BoundedAbove { upper } => -(upper - c).ln(),
            Constraint::Bounded { lower, upper } => ((c - lower) / (upper - c)).ln(),
        };
        Some(u)
    }
}

/// A named scalar parameter with a Gaussian prior in unconstrained space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterPrior {
    /// Parameter name, unique within a [`PriorSet`]
    pub name: String,
    /// Mean of the unconstrained normal distribution
    pub mean: f64,
    /// Standard deviation of the unconstrained normal distribution
    pub std_dev: f64,
    /// Transform into the physical range
    #[serde(default)]
    pub constraint: Constraint,
}

impl ParameterPrior {
    /// Create a prior, validating the distribution/constraint pair.
    pub fn new(
        name: impl Into<String>,
        mean: f64,
        std_dev: f64,
        constraint: Constraint,
    ) -> CalibrationResult<Self> {
        let prior = Self {
            name: name.into(),
            mean,
            std_dev,
            constraint,
        };
        prior.validate()?;
        Ok(prior)
    }

    /// Standard normal prior whose constrained image is bounded below by `lower`.
    pub fn standard_normal_bounded_below(
        name: impl Into<String>,
        lower: f64,
    ) -> CalibrationResult<Self> {
        Self::new(name, 0.0, 1.0, Constraint::BoundedBelow { lower })
    }

    /// Prior bounded below by `lower` whose constrained distribution has the
    /// requested mean and standard deviation.
    ///
    /// The constrained distribution is a shifted log-normal, so the moments
    /// can be matched exactly:
    ///
    /// $$\sigma_u^2 = \ln\left(1 + \frac{s^2}{(m - l)^2}\right), \quad
    /// \mu_u = \ln(m - l) - \frac{\sigma_u^2}{2}$$
    pub fn from_constrained_moments(
        name: impl Into<String>,
        mean: f64,
        std_dev: f64,
        lower: f64,
    ) -> CalibrationResult<Self> {
        let name = name.into();
        let offset = mean - lower;
        if !(offset > 0.0 && offset.is_finite()) {
            return Err(CalibrationError::InvalidPrior(format!(
                "mean {} of '{}' must lie above the lower bound {}",
                mean, name, lower
            )));
        }
        if !(std_dev > 0.0 && std_dev.is_finite()) {
            return Err(CalibrationError::InvalidPrior(format!(
                "standard deviation of '{}' must be positive and finite, got {}",
                name, std_dev
            )));
        }

        let variance_u = (1.0 + (std_dev / offset).powi(2)).ln();
        let mean_u = offset.ln() - variance_u / 2.0;
        Self::new(
            name,
            mean_u,
            variance_u.sqrt(),
            Constraint::BoundedBelow { lower },
        )
    }

    /// Check that the prior is well formed.
    pub fn validate(&self) -> CalibrationResult<()> {
        if self.name.is_empty() {
            return Err(CalibrationError::InvalidPrior(
                "parameter name must not be empty".to_string(),
            ));
        }
        if !self.mean.is_finite() {
            return Err(CalibrationError::InvalidPrior(format!(
                "mean of '{}' must be finite, got {}",
                self.name, self.mean
            )));
        }
        if !(self.std_dev > 0.0 && self.std_dev.is_finite()) {
            return Err(CalibrationError::InvalidPrior(format!(
                "standard deviation of '{}' must be positive and finite, got {}",
                self.name, self.std_dev
            )));
        }
        self.constraint.validate().map_err(|e| match e {
            CalibrationError::InvalidPrior(msg) => {
                CalibrationError::InvalidPrior(format!("'{}': {}", self.name, msg))
            }
            other => other,
        })
    }
}

/// Ordered, immutable collection of parameter priors.
///
/// The order of the priors defines the layout of every parameter vector used
/// during a calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ParameterPrior>", into = "Vec<ParameterPrior>")]
pub struct PriorSet {
    priors: Vec<ParameterPrior>,
}

impl PriorSet {
    /// Create a prior set from an ordered list of priors.
    ///
    /// Fails if the list is empty, any prior is malformed, or names repeat.
    pub fn new(priors: Vec<ParameterPrior>) -> CalibrationResult<Self> {
        if priors.is_empty() {
            return Err(CalibrationError::InvalidPrior(
                "a prior set needs at least one parameter".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for prior in &priors {
            prior.validate()?;
            if !seen.insert(prior.name.as_str()) {
                return Err(CalibrationError::InvalidPrior(format!(
                    "duplicate parameter name '{}'",
                    prior.name
                )));
            }
        }

        Ok(Self { priors })
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.priors.len()
    }

    /// Always false, a prior set cannot be constructed empty.
    pub fn is_empty(&self) -> bool {
        self.priors.is_empty()
    }

    /// Parameter names in vector order.
    pub fn names(&self) -> Vec<String> {
        self.priors.iter().map(|p| p.name.clone()).collect()
    }

    pub fn priors(&self) -> &[ParameterPrior] {
        &self.priors
    }

    /// Look up a prior by name.
    pub fn get(&self, name: &str) -> Option<&ParameterPrior> {
        self.priors.iter().find(|p| p.name == name)
    }

    /// Prior means in unconstrained space.
    pub fn unconstrained_mean(&self) -> Array1<f64> {
        self.priors.iter().map(|p| p.mean).collect()
    }

    fn check_len(&self, found: usize) -> CalibrationResult<()> {
        if found != self.len() {
            return Err(CalibrationError::dimension(
                "parameter vector",
                self.len(),
                found,
            ));
        }
        Ok(())
    }

    /// Map an unconstrained parameter vector to constrained space.
    pub fn to_constrained(&self, u: ArrayView1<f64>) -> CalibrationResult<Array1<f64>> {
        self.check_len(u.len())?;
        Ok(self
            .priors
            .iter()
            .zip(u.iter())
            .map(|(prior, &value)| prior.constraint.to_constrained(value))
            .collect())
    }

    /// Map a constrained parameter vector to unconstrained space.
    ///
    /// Fails with [`CalibrationError::OutOfSupport`] if any value lies
    /// outside the range of its constraint.
    pub fn to_unconstrained(&self, c: ArrayView1<f64>) -> CalibrationResult<Array1<f64>> {
        self.check_len(c.len())?;
        self.priors
            .iter()
            .zip(c.iter())
            .map(|(prior, &value)| {
                prior
                    .constraint
                    .to_unconstrained(value)
                    .ok_or_else(|| CalibrationError::OutOfSupport {
                        name: prior.name.clone(),
                        value,
                    })
            })
            .collect()
    }

    /// Map every row of an unconstrained ensemble to constrained space.
    pub fn ensemble_to_constrained(
        &self,
        members: ArrayView2<f64>,
    ) -> CalibrationResult<Array2<f64>> {
        self.check_len(members.ncols())?;
        let mut constrained = members.to_owned();
        for (prior, mut column) in self.priors.iter().zip(constrained.columns_mut()) {
            column.mapv_inplace(|u| prior.constraint.to_constrained(u));
        }
        Ok(constrained)
    }

    /// Draw `count` unconstrained parameter vectors, one per row.
    ///
    /// Draws are taken member by member, parameter by parameter, so the
    /// result only depends on the state of `rng`.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> CalibrationResult<Array2<f64>> {
        let normals = self
            .priors
            .iter()
            .map(|p| {
                Normal::new(p.mean, p.std_dev)
                    .map_err(|e| CalibrationError::InvalidPrior(format!("'{}': {}", p.name, e)))
            })
            .collect::<CalibrationResult<Vec<_>>>()?;

        let mut draws = Array2::zeros((count, self.len()));
        for mut row in draws.rows_mut() {
            for (value, normal) in row.iter_mut().zip(&normals) {
                *value = normal.sample(rng);
            }
        }
        Ok(draws)
    }
}

impl TryFrom<Vec<ParameterPrior>> for PriorSet {
    type Error = CalibrationError;

    fn try_from(priors: Vec<ParameterPrior>) -> Result<Self, Self::Error> {
        PriorSet::new(priors)
    }
}

impl From<PriorSet> for Vec<ParameterPrior> {
    fn from(set: PriorSet) -> Self {
        set.priors
    }
}
