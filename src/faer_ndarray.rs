//! Minimal faer ↔ ndarray interop for the regression backends.
//!
//! The solvers only ever factorize small symmetric positive (semi-)definite
//! Gram systems, so the bridge copies data into owned faer matrices instead
//! of juggling raw stride views.

use faer::linalg::solvers::{self, Ldlt as FaerLdlt, Llt as FaerLlt, Solve};
use faer::{Mat, MatRef, Side};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),

    #[error("LDLT factorization failed: {0:?}")]
    Ldlt(solvers::LdltError),

    #[error("Linear solve produced non-finite values; the system is singular or ill-conditioned.")]
    NonFiniteSolution,
}

pub enum FaerSymmetricFactor {
    Llt(FaerLlt<f64>),
    Ldlt(FaerLdlt<f64>),
}

impl FaerSymmetricFactor {
    #[inline]
    pub fn solve(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        match self {
            FaerSymmetricFactor::Llt(factor) => factor.solve(rhs),
            FaerSymmetricFactor::Ldlt(factor) => factor.solve(rhs),
        }
    }
}

/// Factorize a symmetric system with an LLT first attempt and LDLT fallback.
pub fn factorize_symmetric_with_fallback(
    matrix: MatRef<'_, f64>,
    side: Side,
) -> Result<FaerSymmetricFactor, FaerLinalgError> {
    if let Ok(llt) = FaerLlt::new(matrix, side) {
        return Ok(FaerSymmetricFactor::Llt(llt));
    }
    let ldlt = FaerLdlt::new(matrix, side).map_err(FaerLinalgError::Ldlt)?;
    Ok(FaerSymmetricFactor::Ldlt(ldlt))
}

/// Solve the symmetric system `matrix * x = rhs` for a single right-hand
/// side, rejecting non-finite solutions.
pub fn solve_symmetric(
    matrix: &Array2<f64>,
    rhs: &Array1<f64>,
) -> Result<Array1<f64>, FaerLinalgError> {
    let n = matrix.nrows();
    let a = Mat::from_fn(n, n, |i, j| matrix[[i, j]]);
    let b = Mat::from_fn(n, 1, |i, _| rhs[i]);
    let factor = factorize_symmetric_with_fallback(a.as_ref(), Side::Lower)?;
    let x = factor.solve(b.as_ref());
    let solution = Array1::from_iter((0..n).map(|i| x[(i, 0)]));
    if !solution.iter().all(|v| v.is_finite()) {
        return Err(FaerLinalgError::NonFiniteSolution);
    }
    Ok(solution)
}

/// Solve the ridge-regularized normal equations
/// `(X^T X + alpha I) beta = X^T y`.
pub fn solve_ridge_normal_equations(
    design: ArrayView2<'_, f64>,
    targets: ArrayView1<'_, f64>,
    alpha: f64,
) -> Result<Array1<f64>, FaerLinalgError> {
    let mut gram = design.t().dot(&design);
    if alpha != 0.0 {
        for i in 0..gram.nrows() {
            gram[[i, i]] += alpha;
        }
    }
    let rhs = design.t().dot(&targets);
    solve_symmetric(&gram, &rhs)
}
