//! Adaptive basis-selection drivers for a single quantity of interest.
//!
//! Two strategies are provided: a fixed-degree sweep that cross-validates
//! successive hyperbolic-cross bases, and an adaptive expand/restrict search
//! seeded from a degree basis. Both hold immutable candidate bases and only
//! ever replace the tracked best, never mutate it in place.

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::basis::{BasisError, PolynomialBasis};
use crate::indices::{IndexError, IndexSet, expand_basis, hyperbolic_indices, restrict_basis};
use crate::solver::{LinearSolverConfig, RegularizationParam, SolverError, fit_linear_model};

/// Candidate bases above this term count are never fitted.
const MAX_CANDIDATE_TERMS: usize = 100_000;
/// Degree-sweep early stop: give up once the sweep is this far past the best
/// degree without improvement.
const DEGREE_STALL_GAP: u32 = 1;
/// Expand/restrict outer loop aborts after this many consecutive
/// non-improving iterations.
const OUTER_STALL_LIMIT: usize = 2;
/// Hard cap on expansion depth within one outer iteration, and the initial
/// bound carried into the first iteration.
const MAX_EXPANSION_DEPTH: usize = 3;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Empty degree range: min_degree ({min_degree}) exceeds max_degree ({max_degree}).")]
    EmptyDegreeRange { min_degree: u32, max_degree: u32 },

    #[error("Training data is empty.")]
    EmptyTrainingSet,

    #[error("Samples have {samples} rows but {values} target values were supplied.")]
    SampleValueMismatch { samples: usize, values: usize },

    #[error("max_num_terms must be at least 1.")]
    ZeroTermBudget,

    #[error(
        "Basis search compares candidate bases by cross-validation score; the solver options \
         must enable cross-validation."
    )]
    CrossValidationRequired,

    #[error("No degree in the sweep produced a finite cross-validation score.")]
    NoFiniteScore,

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Basis(#[from] BasisError),

    #[error(transparent)]
    Solver(#[from] SolverError),
}

/// An index set paired with its fitted coefficients, one per index, in
/// matching order.
#[derive(Debug, Clone)]
pub struct Basis {
    pub indices: IndexSet,
    pub coefficients: Array1<f64>,
}

impl Basis {
    pub fn new(indices: IndexSet, coefficients: Array1<f64>) -> Result<Self, IndexError> {
        if coefficients.len() != indices.len() {
            return Err(IndexError::CoefficientLengthMismatch {
                indices: indices.len(),
                coefficients: coefficients.len(),
            });
        }
        Ok(Self {
            indices,
            coefficients,
        })
    }

    pub fn num_terms(&self) -> usize {
        self.indices.len()
    }
}

/// Selected basis and fit diagnostics for one output dimension.
#[derive(Debug, Clone)]
pub struct QoiFit {
    pub basis: Basis,
    /// Held-out RMSE of the selected basis; absent for CV-less fixed fits.
    pub cv_score: Option<f64>,
    pub regularization: Option<RegularizationParam>,
    /// Degree chosen by the sweep; absent for the other strategies.
    pub selected_degree: Option<u32>,
}

/// Options for the fixed-degree sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegreeSweepOptions {
    pub min_degree: u32,
    pub max_degree: u32,
    /// Hyperbolic-cross strength in (0, 1]; 1 gives total-degree bases.
    pub hcross_strength: f64,
    pub basis: PolynomialBasis,
    pub solver: LinearSolverConfig,
}

impl Default for DegreeSweepOptions {
    fn default() -> Self {
        Self {
            min_degree: 1,
            max_degree: 3,
            hcross_strength: 1.0,
            basis: PolynomialBasis::default(),
            solver: LinearSolverConfig::Lasso(Default::default()),
        }
    }
}

/// Options for the adaptive expand/restrict search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandRestrictOptions {
    /// Hyperbolic-cross strength in (0, 1] used for the seed basis.
    pub hcross_strength: f64,
    /// Working-set size at which expansion stops; also sizes the seed basis.
    pub max_num_terms: usize,
    /// Coefficients at or below this magnitude are pruned before expanding.
    pub restriction_tol: f64,
    pub basis: PolynomialBasis,
    pub solver: LinearSolverConfig,
}

impl Default for ExpandRestrictOptions {
    fn default() -> Self {
        Self {
            hcross_strength: 1.0,
            max_num_terms: 100,
            restriction_tol: f64::EPSILON * 2.0,
            basis: PolynomialBasis::default(),
            solver: LinearSolverConfig::Lasso(Default::default()),
        }
    }
}

fn validate_training_data(
    samples: ArrayView2<'_, f64>,
    values: ArrayView1<'_, f64>,
) -> Result<(), SearchError> {
    if samples.nrows() == 0 || samples.ncols() == 0 {
        return Err(SearchError::EmptyTrainingSet);
    }
    if samples.nrows() != values.len() {
        return Err(SearchError::SampleValueMismatch {
            samples: samples.nrows(),
            values: values.len(),
        });
    }
    Ok(())
}

fn require_cross_validation(solver: &LinearSolverConfig) -> Result<(), SearchError> {
    if solver.cross_validation().is_none() {
        return Err(SearchError::CrossValidationRequired);
    }
    Ok(())
}

/// Sweep total/hyperbolic degrees for one QoI, cross-validating each degree
/// against the identical fold partition, and keep the best-scoring basis.
///
/// Fit failures abort the sweep rather than skipping the offending degree:
/// a backend that cannot fit one degree level makes neighboring levels
/// incomparable.
pub fn degree_search(
    samples: ArrayView2<'_, f64>,
    values: ArrayView1<'_, f64>,
    options: &DegreeSweepOptions,
) -> Result<QoiFit, SearchError> {
    validate_training_data(samples, values)?;
    require_cross_validation(&options.solver)?;
    if options.min_degree > options.max_degree {
        return Err(SearchError::EmptyDegreeRange {
            min_degree: options.min_degree,
            max_degree: options.max_degree,
        });
    }
    let nvars = samples.ncols();

    let mut best_score = f64::MAX;
    let mut best_coefficients: Option<Array1<f64>> = None;
    let mut best_regularization = None;
    let mut best_degree = options.min_degree;
    let mut prev_num_terms = 0usize;

    for degree in options.min_degree..=options.max_degree {
        let indices = hyperbolic_indices(nvars, degree, options.hcross_strength)?;
        let num_terms = indices.len();
        // Refuse to fit once the overshoot past the cap exceeds the previous
        // degree's undershoot; one more degree would only grow the gap. The
        // undershoot is signed: a previous degree already past the cap makes
        // it negative and stops the sweep unconditionally.
        if num_terms > MAX_CANDIDATE_TERMS
            && (MAX_CANDIDATE_TERMS as i64 - prev_num_terms as i64)
                < (num_terms - MAX_CANDIDATE_TERMS) as i64
        {
            break;
        }
        let design = options.basis.design_matrix(&indices, samples)?;
        let fitted = fit_linear_model(design.view(), values, &options.solver)?;
        let score = fitted
            .cv_score
            .ok_or(SearchError::CrossValidationRequired)?;
        log::debug!(
            "[PCE DEGREE] degree={degree} terms={num_terms} cv_score={score:.6e}"
        );
        if score >= best_score && degree - best_degree > DEGREE_STALL_GAP {
            break;
        }
        if score < best_score {
            best_score = score;
            best_coefficients = Some(fitted.coefficients);
            best_regularization = Some(fitted.regularization);
            best_degree = degree;
        }
        prev_num_terms = num_terms;
    }

    let coefficients = best_coefficients.ok_or(SearchError::NoFiniteScore)?;
    let indices = hyperbolic_indices(nvars, best_degree, options.hcross_strength)?;
    log::debug!("[PCE DEGREE] selected degree={best_degree} cv_score={best_score:.6e}");
    Ok(QoiFit {
        basis: Basis::new(indices, coefficients)?,
        cv_score: Some(best_score),
        regularization: best_regularization,
        selected_degree: Some(best_degree),
    })
}

/// Smallest degree whose hyperbolic-cross term count lands closest to the
/// term budget, scanning upward from degree 2 like the seed heuristic of the
/// expanding-basis method.
fn seed_degree(
    nvars: usize,
    strength: f64,
    max_num_terms: usize,
) -> Result<IndexSet, SearchError> {
    let mut degree = 2u32;
    let mut prev_num_terms = 0usize;
    let mut num_terms;
    loop {
        num_terms = hyperbolic_indices(nvars, degree, strength)?.len();
        if num_terms > max_num_terms {
            break;
        }
        degree += 1;
        prev_num_terms = num_terms;
    }
    if num_terms.abs_diff(max_num_terms) > prev_num_terms.abs_diff(max_num_terms) && degree > 1 {
        degree -= 1;
    }
    Ok(hyperbolic_indices(nvars, degree, strength)?)
}

struct Candidate {
    indices: IndexSet,
    coefficients: Array1<f64>,
    score: f64,
    regularization: RegularizationParam,
    expansion_steps: usize,
}

/// Adaptive expand/restrict search for one QoI.
///
/// Starting from a degree seed sized to `max_num_terms`, each outer
/// iteration restricts the best basis, expands it one to three admissible
/// steps, re-fits, and adopts the result when its cross-validation score
/// improves on the best seen. Two consecutive non-improving outer
/// iterations end the search. Bounding the depth and restricting before
/// every expansion keeps the candidate set from exploding combinatorially
/// while deeper expansions can still escape local optima.
///
/// As in the degree sweep, a failed fit aborts the search instead of
/// silently skipping the candidate.
pub fn expand_restrict_search(
    samples: ArrayView2<'_, f64>,
    values: ArrayView1<'_, f64>,
    options: &ExpandRestrictOptions,
) -> Result<QoiFit, SearchError> {
    validate_training_data(samples, values)?;
    require_cross_validation(&options.solver)?;
    if options.max_num_terms == 0 {
        return Err(SearchError::ZeroTermBudget);
    }
    let nvars = samples.ncols();

    let seed_indices = seed_degree(nvars, options.hcross_strength, options.max_num_terms)?;
    log::debug!(
        "[PCE EXPAND] seed basis: {} terms, strength {}",
        seed_indices.len(),
        options.hcross_strength
    );
    let design = options.basis.design_matrix(&seed_indices, samples)?;
    let fitted = fit_linear_model(design.view(), values, &options.solver)?;
    let mut best = Candidate {
        indices: seed_indices,
        coefficients: fitted.coefficients,
        score: fitted
            .cv_score
            .ok_or(SearchError::CrossValidationRequired)?,
        regularization: fitted.regularization,
        expansion_steps: MAX_EXPANSION_DEPTH,
    };
    log::debug!(
        "[PCE EXPAND] seed fit: {} terms cv_score={:.6e}",
        best.indices.len(),
        best.score
    );

    let mut stalled_iterations = 0usize;
    while stalled_iterations < OUTER_STALL_LIMIT {
        let mut iteration_best: Option<Candidate> = None;
        for depth in 1..=MAX_EXPANSION_DEPTH {
            let steps = depth.min(best.expansion_steps);
            let mut working = restrict_basis(
                &best.indices,
                best.coefficients.view(),
                options.restriction_tol,
            )?;
            for _ in 0..steps {
                let new_indices = expand_basis(&working);
                working.extend(new_indices)?;
            }
            let num_terms = working.len();
            let design = options.basis.design_matrix(&working, samples)?;
            let fitted = fit_linear_model(design.view(), values, &options.solver)?;
            let score = fitted
                .cv_score
                .ok_or(SearchError::CrossValidationRequired)?;
            log::debug!(
                "[PCE EXPAND] depth={steps} terms={num_terms} nnz={} cv_score={score:.6e}",
                fitted.coefficients.iter().filter(|&&c| c != 0.0).count()
            );
            let improves = iteration_best
                .as_ref()
                .is_none_or(|candidate| score < candidate.score);
            if improves {
                iteration_best = Some(Candidate {
                    indices: working,
                    coefficients: fitted.coefficients,
                    score,
                    regularization: fitted.regularization,
                    expansion_steps: steps,
                });
            }
            if num_terms >= options.max_num_terms {
                break;
            }
        }
        match iteration_best {
            Some(candidate) if candidate.score < best.score => {
                best = candidate;
                stalled_iterations = 0;
            }
            _ => stalled_iterations += 1,
        }
    }

    // Sparsity cleanup: exact zeros contribute nothing to the expansion.
    let mut final_indices = IndexSet::new(nvars);
    let mut final_coefficients = Vec::new();
    for (index, &coefficient) in best.indices.iter().zip(best.coefficients.iter()) {
        if coefficient != 0.0 {
            final_indices.insert(index.clone())?;
            final_coefficients.push(coefficient);
        }
    }
    log::debug!(
        "[PCE EXPAND] final basis: {} of {} terms, cv_score={:.6e}",
        final_indices.len(),
        best.indices.len(),
        best.score
    );
    Ok(QoiFit {
        basis: Basis::new(final_indices, Array1::from(final_coefficients))?,
        cv_score: Some(best.score),
        regularization: Some(best.regularization),
        selected_degree: None,
    })
}
