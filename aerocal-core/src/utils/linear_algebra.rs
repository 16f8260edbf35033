//! Linear algebra utilities.
//!
//! Ensembles are stored as `ndarray` matrices with one member per row. The
//! factorisations are delegated to `nalgebra`, so these helpers mostly move data
//! between the two representations.

use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Copy an `ndarray` matrix into a `nalgebra` matrix.
pub fn to_dmatrix(a: ArrayView2<f64>) -> DMatrix<f64> {
    let (rows, cols) = a.dim();
    DMatrix::from_fn(rows, cols, |i, j| a[[i, j]])
}

/// Copy a `nalgebra` matrix into an `ndarray` matrix.
pub fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Lower Cholesky factor `L` with `A = L Lᵀ`.
///
/// Returns `None` if `A` is not square or not symmetric positive definite.
pub fn cholesky_lower(a: ArrayView2<f64>) -> Option<Array2<f64>> {
    if a.nrows() != a.ncols() {
        return None;
    }
    let chol = to_dmatrix(a).cholesky()?;
    Some(from_dmatrix(&chol.l()))
}

/// Solve `A X = B` for symmetric positive definite `A`.
///
/// # Returns
/// `None` if the shapes are inconsistent or `A` is not positive definite.
///
/// # Example
/// ```
/// use aerocal_core::utils::linear_algebra::solve_spd;
/// use ndarray::array;
///
/// // | 4  1 |   | x0 |   | 1 |
/// // | 1  3 | * | x1 | = | 2 |
/// let a = array![[4.0, 1.0], [1.0, 3.0]];
/// let b = array![[1.0], [2.0]];
///
/// let x = solve_spd(a.view(), b.view()).unwrap();
/// assert!((x[[0, 0]] - 1.0 / 11.0).abs() < 1e-12);
/// assert!((x[[1, 0]] - 7.0 / 11.0).abs() < 1e-12);
/// ```
pub fn solve_spd(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Option<Array2<f64>> {
    if a.nrows() != a.ncols() || a.nrows() != b.nrows() {
        return None;
    }
    let chol = to_dmatrix(a).cholesky()?;
    let x = chol.solve(&to_dmatrix(b));
    Some(from_dmatrix(&x))
}

/// Compute `xᵀ A⁻¹ x` for symmetric positive definite `A`.
pub fn inverse_quadratic_form(a: ArrayView2<f64>, x: ArrayView1<f64>) -> Option<f64> {
    let rhs = x.to_owned().insert_axis(Axis(1));
    let solved = solve_spd(a, rhs.view())?;
    Some(x.dot(&solved.column(0)))
}

/// Population cross-covariance of two ensembles sharing the member axis.
///
/// `a` has shape (n_members, n_a) and `b` has shape (n_members, n_b); the
/// result has shape (n_a, n_b). Normalised by `1 / n_members` (no Bessel
/// correction).
///
/// # Panics
/// Panics if the ensembles have a different number of members or are empty.
pub fn cross_covariance(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
    let n = a.nrows();
    assert_eq!(n, b.nrows(), "ensembles must have the same number of members");
    assert!(n > 0, "ensembles must not be empty");

    let a_anom = &a - &column_means(a);
    let b_anom = &b - &column_means(b);
    a_anom.t().dot(&b_anom) / n as f64
}

/// Mean of every column, i.e. the ensemble mean when members are rows.
pub fn column_means(a: ArrayView2<f64>) -> Array1<f64> {
    a.mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(a.ncols()))
}
