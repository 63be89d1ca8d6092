//! Polynomial basis evaluation: (index set, samples) → design matrix.
//!
//! Samples are row-major: shape (nsamples, nvars). Design-matrix columns
//! follow the index-set insertion order, so coefficients fitted against a
//! design matrix stay aligned to their indices.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::indices::IndexSet;

#[derive(Error, Debug)]
pub enum BasisError {
    #[error("Samples have {found} columns but the index set is {expected}-variate.")]
    SampleDimensionMismatch { expected: usize, found: usize },

    #[error("Cannot build a design matrix over an empty index set.")]
    EmptyIndexSet,

    #[error("Coefficient matrix has {found} rows but the index set holds {expected} terms.")]
    CoefficientRowMismatch { expected: usize, found: usize },
}

/// Univariate polynomial family used for every variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PolynomialBasis {
    /// Plain powers `x^k`. Coefficients are directly interpretable as the
    /// coefficients of the approximated polynomial.
    #[default]
    Monomial,
    /// Legendre polynomials via the three-term recurrence, orthogonal on
    /// [-1, 1]. Better conditioned than monomials at higher degrees.
    Legendre,
}

impl PolynomialBasis {
    /// Evaluate the univariate family at `x` for all degrees `0..=max_degree`
    /// into `out` (length `max_degree + 1`).
    fn univariate(&self, x: f64, out: &mut [f64]) {
        out[0] = 1.0;
        if out.len() == 1 {
            return;
        }
        out[1] = x;
        match self {
            Self::Monomial => {
                for k in 2..out.len() {
                    out[k] = out[k - 1] * x;
                }
            }
            Self::Legendre => {
                // (k+1) P_{k+1} = (2k+1) x P_k - k P_{k-1}
                for k in 1..out.len() - 1 {
                    let kf = k as f64;
                    out[k + 1] = ((2.0 * kf + 1.0) * x * out[k] - kf * out[k - 1]) / (kf + 1.0);
                }
            }
        }
    }

    /// Design matrix with rows = samples and columns = indices, in index-set
    /// order.
    pub fn design_matrix(
        &self,
        indices: &IndexSet,
        samples: ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, BasisError> {
        if indices.is_empty() {
            return Err(BasisError::EmptyIndexSet);
        }
        let nvars = indices.nvars();
        if samples.ncols() != nvars {
            return Err(BasisError::SampleDimensionMismatch {
                expected: nvars,
                found: samples.ncols(),
            });
        }
        let max_degree = indices
            .iter()
            .flat_map(|index| index.components().iter().copied())
            .max()
            .unwrap_or(0) as usize;

        let nsamples = samples.nrows();
        let mut design = Array2::<f64>::zeros((nsamples, indices.len()));
        // Per-sample table of univariate values, one row per variable.
        let mut table = vec![vec![0.0_f64; max_degree + 1]; nvars];
        for (row, sample) in samples.outer_iter().enumerate() {
            for (dim, values) in table.iter_mut().enumerate() {
                self.univariate(sample[dim], values);
            }
            for (col, index) in indices.iter().enumerate() {
                let mut term = 1.0;
                for (dim, &component) in index.components().iter().enumerate() {
                    term *= table[dim][component as usize];
                }
                design[[row, col]] = term;
            }
        }
        Ok(design)
    }

    /// Evaluate the expansion `sum_j coefficients[j] * phi_j(sample)` for a
    /// single QoI at every sample.
    pub fn values(
        &self,
        indices: &IndexSet,
        samples: ArrayView2<'_, f64>,
        coefficients: ArrayView1<'_, f64>,
    ) -> Result<Array1<f64>, BasisError> {
        if coefficients.len() != indices.len() {
            return Err(BasisError::CoefficientRowMismatch {
                expected: indices.len(),
                found: coefficients.len(),
            });
        }
        let design = self.design_matrix(indices, samples)?;
        Ok(design.dot(&coefficients))
    }

    /// Evaluate a multi-QoI expansion; `coefficients` has one row per index
    /// and one column per QoI.
    pub fn values_multi(
        &self,
        indices: &IndexSet,
        samples: ArrayView2<'_, f64>,
        coefficients: ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, BasisError> {
        if coefficients.nrows() != indices.len() {
            return Err(BasisError::CoefficientRowMismatch {
                expected: indices.len(),
                found: coefficients.nrows(),
            });
        }
        let design = self.design_matrix(indices, samples)?;
        Ok(design.dot(&coefficients))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indices::{MultiIndex, hyperbolic_indices};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn monomial_design_matrix_matches_hand_computation() {
        let indices = IndexSet::from_indices(
            2,
            vec![
                MultiIndex::new(vec![0, 0]),
                MultiIndex::new(vec![1, 0]),
                MultiIndex::new(vec![0, 2]),
            ],
        )
        .unwrap();
        let samples = array![[0.5, -1.0], [2.0, 3.0]];
        let design = PolynomialBasis::Monomial
            .design_matrix(&indices, samples.view())
            .unwrap();
        let expected = array![[1.0, 0.5, 1.0], [1.0, 2.0, 9.0]];
        for (got, want) in design.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(got, want, epsilon = 1e-14);
        }
    }

    #[test]
    fn legendre_recurrence_matches_closed_forms() {
        let indices = hyperbolic_indices(1, 3, 1.0).unwrap();
        let samples = array![[0.3], [-0.7]];
        let design = PolynomialBasis::Legendre
            .design_matrix(&indices, samples.view())
            .unwrap();
        for (row, &x) in [0.3, -0.7].iter().enumerate() {
            assert_abs_diff_eq!(design[[row, 0]], 1.0, epsilon = 1e-14);
            assert_abs_diff_eq!(design[[row, 1]], x, epsilon = 1e-14);
            assert_abs_diff_eq!(design[[row, 2]], 1.5 * x * x - 0.5, epsilon = 1e-14);
            assert_abs_diff_eq!(design[[row, 3]], 2.5 * x.powi(3) - 1.5 * x, epsilon = 1e-14);
        }
    }

    #[test]
    fn values_applies_coefficients_in_index_order() {
        let indices = IndexSet::from_indices(
            2,
            vec![
                MultiIndex::new(vec![0, 0]),
                MultiIndex::new(vec![1, 0]),
                MultiIndex::new(vec![0, 2]),
            ],
        )
        .unwrap();
        let samples = array![[0.5, -1.0]];
        let coefficients = array![1.0, 2.0, 3.0];
        let values = PolynomialBasis::Monomial
            .values(&indices, samples.view(), coefficients.view())
            .unwrap();
        // 1 + 2*0.5 + 3*(-1)^2
        assert_abs_diff_eq!(values[0], 5.0, epsilon = 1e-14);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let indices = hyperbolic_indices(2, 1, 1.0).unwrap();
        let samples = array![[0.5, -1.0, 0.25]];
        assert!(matches!(
            PolynomialBasis::Monomial.design_matrix(&indices, samples.view()),
            Err(BasisError::SampleDimensionMismatch {
                expected: 2,
                found: 3
            })
        ));
    }
}
