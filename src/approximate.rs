//! Caller-facing approximation drivers and per-QoI basis reconciliation.
//!
//! Each quantity of interest (one column of the training values) is searched
//! independently; searches share no mutable state, so they run on the rayon
//! pool. The per-QoI bases are then merged into one shared index set with a
//! zero-filled coefficient matrix. Merging changes storage only, never the
//! value any QoI's expansion takes at a sample.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use thiserror::Error;

use crate::basis::{BasisError, PolynomialBasis};
use crate::indices::{IndexError, IndexSet};
use crate::search::{
    Basis, DegreeSweepOptions, ExpandRestrictOptions, QoiFit, SearchError, degree_search,
    expand_restrict_search,
};
use crate::solver::{
    LinearSolverConfig, RegularizationParam, SolverError, fit_linear_model, k_fold_assignments,
};

#[derive(Error, Debug)]
pub enum ApproximateError {
    #[error("Training values carry no quantities of interest (zero columns).")]
    NoQuantitiesOfInterest,

    #[error("Samples have {samples} rows but the training values have {values} rows.")]
    SampleValueMismatch { samples: usize, values: usize },

    #[error("{expected} quantities of interest but {found} index sets were supplied.")]
    IndexSetCountMismatch { expected: usize, found: usize },

    #[error("{expected} quantities of interest but {found} solver configurations were supplied.")]
    SolverCountMismatch { expected: usize, found: usize },

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error(transparent)]
    Basis(#[from] BasisError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Index sets for a fixed-basis fit: one set shared by every QoI, or one per
/// QoI.
#[derive(Debug, Clone)]
pub enum FixedIndices {
    Shared(IndexSet),
    PerQoi(Vec<IndexSet>),
}

/// Solver configurations for a fixed-basis fit, shared or per QoI.
#[derive(Debug, Clone)]
pub enum FixedSolvers {
    Shared(LinearSolverConfig),
    PerQoi(Vec<LinearSolverConfig>),
}

/// Options for the non-adaptive fixed-basis mode: externally supplied
/// indices, one plain fit per QoI, no search.
#[derive(Debug, Clone)]
pub struct FixedBasisOptions {
    pub basis: PolynomialBasis,
    pub indices: FixedIndices,
    pub solvers: FixedSolvers,
}

/// Basis-selection strategy applied independently to every QoI column.
#[derive(Debug, Clone)]
pub enum PceStrategy {
    DegreeSweep(DegreeSweepOptions),
    ExpandingBasis(ExpandRestrictOptions),
    FixedBasis(FixedBasisOptions),
}

impl PceStrategy {
    fn basis_kind(&self) -> PolynomialBasis {
        match self {
            Self::DegreeSweep(options) => options.basis,
            Self::ExpandingBasis(options) => options.basis,
            Self::FixedBasis(options) => options.basis,
        }
    }
}

/// A multi-QoI expansion over one shared index set.
///
/// `coefficients` has one row per union index and one column per QoI; rows a
/// QoI's own basis never contained hold exact zeros for that column.
#[derive(Debug, Clone)]
pub struct PceModel {
    pub basis: PolynomialBasis,
    pub indices: IndexSet,
    pub coefficients: Array2<f64>,
    pub cv_scores: Vec<Option<f64>>,
    pub regularization: Vec<Option<RegularizationParam>>,
    pub selected_degrees: Vec<Option<u32>>,
}

impl PceModel {
    pub fn num_terms(&self) -> usize {
        self.indices.len()
    }

    pub fn num_qoi(&self) -> usize {
        self.coefficients.ncols()
    }

    /// Evaluate every QoI's expansion at the given samples; rows = samples,
    /// columns = QoIs.
    pub fn values(&self, samples: ArrayView2<'_, f64>) -> Result<Array2<f64>, BasisError> {
        self.basis
            .values_multi(&self.indices, samples, self.coefficients.view())
    }
}

/// Union the per-QoI index sets in first-seen order and scatter each QoI's
/// coefficients into the matching rows of a zero-initialized matrix.
pub fn merge_qoi_fits(
    basis: PolynomialBasis,
    fits: Vec<QoiFit>,
) -> Result<PceModel, ApproximateError> {
    let nqoi = fits.len();
    if nqoi == 0 {
        return Err(ApproximateError::NoQuantitiesOfInterest);
    }
    let nvars = fits[0].basis.indices.nvars();
    let mut union = IndexSet::new(nvars);
    for fit in &fits {
        for index in fit.basis.indices.iter() {
            union.insert(index.clone())?;
        }
    }
    let mut coefficients = Array2::<f64>::zeros((union.len(), nqoi));
    let mut cv_scores = Vec::with_capacity(nqoi);
    let mut regularization = Vec::with_capacity(nqoi);
    let mut selected_degrees = Vec::with_capacity(nqoi);
    for (qoi, fit) in fits.iter().enumerate() {
        for (slot, index) in fit.basis.indices.iter().enumerate() {
            let row = union
                .position(index)
                .expect("union holds every per-QoI index");
            coefficients[[row, qoi]] = fit.basis.coefficients[slot];
        }
        cv_scores.push(fit.cv_score);
        regularization.push(fit.regularization);
        selected_degrees.push(fit.selected_degree);
    }
    Ok(PceModel {
        basis,
        indices: union,
        coefficients,
        cv_scores,
        regularization,
        selected_degrees,
    })
}

fn validate_shapes(
    samples: ArrayView2<'_, f64>,
    values: ArrayView2<'_, f64>,
) -> Result<usize, ApproximateError> {
    let nqoi = values.ncols();
    if nqoi == 0 {
        return Err(ApproximateError::NoQuantitiesOfInterest);
    }
    if samples.nrows() != values.nrows() {
        return Err(ApproximateError::SampleValueMismatch {
            samples: samples.nrows(),
            values: values.nrows(),
        });
    }
    Ok(nqoi)
}

/// Approximate a (possibly vector-valued) function from scattered training
/// data: run the strategy once per QoI column and merge the selected bases.
pub fn approximate_polynomial_chaos(
    samples: ArrayView2<'_, f64>,
    values: ArrayView2<'_, f64>,
    strategy: &PceStrategy,
) -> Result<PceModel, ApproximateError> {
    let nqoi = validate_shapes(samples, values)?;
    let fits: Vec<QoiFit> = match strategy {
        PceStrategy::DegreeSweep(options) => (0..nqoi)
            .into_par_iter()
            .map(|qoi| {
                log::debug!("[PCE] degree sweep for QoI {qoi}");
                degree_search(samples, values.column(qoi), options)
            })
            .collect::<Result<_, _>>()?,
        PceStrategy::ExpandingBasis(options) => (0..nqoi)
            .into_par_iter()
            .map(|qoi| {
                log::debug!("[PCE] expanding-basis search for QoI {qoi}");
                expand_restrict_search(samples, values.column(qoi), options)
            })
            .collect::<Result<_, _>>()?,
        PceStrategy::FixedBasis(options) => return approximate_fixed_pce(samples, values, options),
    };
    merge_qoi_fits(strategy.basis_kind(), fits)
}

/// Fit pre-specified index sets with no search, one plain fit per QoI, then
/// reconcile exactly as the adaptive strategies do.
pub fn approximate_fixed_pce(
    samples: ArrayView2<'_, f64>,
    values: ArrayView2<'_, f64>,
    options: &FixedBasisOptions,
) -> Result<PceModel, ApproximateError> {
    let nqoi = validate_shapes(samples, values)?;
    let index_sets: Vec<&IndexSet> = match &options.indices {
        FixedIndices::Shared(shared) => vec![shared; nqoi],
        FixedIndices::PerQoi(sets) => {
            if sets.len() != nqoi {
                return Err(ApproximateError::IndexSetCountMismatch {
                    expected: nqoi,
                    found: sets.len(),
                });
            }
            sets.iter().collect()
        }
    };
    let solvers: Vec<&LinearSolverConfig> = match &options.solvers {
        FixedSolvers::Shared(shared) => vec![shared; nqoi],
        FixedSolvers::PerQoi(configs) => {
            if configs.len() != nqoi {
                return Err(ApproximateError::SolverCountMismatch {
                    expected: nqoi,
                    found: configs.len(),
                });
            }
            configs.iter().collect()
        }
    };
    let mut fits = Vec::with_capacity(nqoi);
    for qoi in 0..nqoi {
        let design = options.basis.design_matrix(index_sets[qoi], samples)?;
        let fitted = fit_linear_model(design.view(), values.column(qoi), solvers[qoi])?;
        fits.push(QoiFit {
            basis: Basis::new((*index_sets[qoi]).clone(), fitted.coefficients)?,
            cv_score: fitted.cv_score,
            regularization: Some(fitted.regularization),
            selected_degree: None,
        });
    }
    merge_qoi_fits(options.basis, fits)
}

/// Per-fold refits of an entire approximation strategy.
#[derive(Debug)]
pub struct ApproximationCrossValidation {
    pub fold_models: Vec<PceModel>,
    /// Held-out residuals per fold, rows = the fold's samples, columns = QoIs.
    pub fold_residuals: Vec<Array2<f64>>,
    /// Held-out RMSE per QoI aggregated over all folds.
    pub scores: Array1<f64>,
}

/// Cross-validate the whole pipeline: refit the strategy on each fold's
/// training portion and score its held-out predictions.
pub fn cross_validate_approximation(
    samples: ArrayView2<'_, f64>,
    values: ArrayView2<'_, f64>,
    strategy: &PceStrategy,
    nfolds: usize,
    seed: u64,
) -> Result<ApproximationCrossValidation, ApproximateError> {
    let nqoi = validate_shapes(samples, values)?;
    let nsamples = samples.nrows();
    let folds = k_fold_assignments(nsamples, nfolds, seed)?;
    let mut fold_models = Vec::with_capacity(folds.len());
    let mut fold_residuals = Vec::with_capacity(folds.len());
    let mut squared_error = Array1::<f64>::zeros(nqoi);
    for test_rows in &folds {
        let mut in_test = vec![false; nsamples];
        for &row in test_rows {
            in_test[row] = true;
        }
        let train_rows: Vec<usize> = (0..nsamples).filter(|&row| !in_test[row]).collect();
        let model = approximate_polynomial_chaos(
            samples.select(Axis(0), &train_rows).view(),
            values.select(Axis(0), &train_rows).view(),
            strategy,
        )?;
        let predicted = model.values(samples.select(Axis(0), test_rows).view())?;
        let residuals = predicted - values.select(Axis(0), test_rows);
        for (qoi, column) in residuals.axis_iter(Axis(1)).enumerate() {
            squared_error[qoi] += column.mapv(|r| r * r).sum();
        }
        fold_models.push(model);
        fold_residuals.push(residuals);
    }
    let scores = squared_error.mapv(|total| (total / nsamples as f64).sqrt());
    Ok(ApproximationCrossValidation {
        fold_models,
        fold_residuals,
        scores,
    })
}
