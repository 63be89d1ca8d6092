//! Cross-validated linear regression backends for basis selection.
//!
//! Every solver consumes a design matrix whose columns follow the index-set
//! order and returns a dense coefficient vector aligned one-to-one with those
//! columns, plus a held-out RMSE (lower is better) and the regularization
//! value its internal cross-validation chose.
//!
//! Fold assignment is a pure function of `(nsamples, nfolds, seed)`: the seed
//! lives in [`KFoldSpec`] and is threaded into every fit, so two fits with
//! the same spec are scored against the identical fold partition. Search
//! drivers rely on this for cross-candidate comparability.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::faer_ndarray::{FaerLinalgError, solve_ridge_normal_equations, solve_symmetric};

#[derive(Error, Debug)]
pub enum SolverError {
    #[error(
        "The 'lars' solver is recognized but unsupported: its regularization path is not \
         monotone under cross-validation, which corrupts fold-score aggregation."
    )]
    LarsUnsupported,

    #[error("Invalid solver options: {0}")]
    InvalidOptions(String),

    #[error(
        "Cross-validation requires between 2 and nsamples folds, got {nfolds} folds for {nsamples} samples."
    )]
    InvalidFoldCount { nfolds: usize, nsamples: usize },

    #[error("Design matrix has {rows} rows but {targets} target values were supplied.")]
    TargetLengthMismatch { rows: usize, targets: usize },

    #[error("No candidate regularization value produced a finite cross-validation score.")]
    NoFiniteCandidate,

    #[error("Linear algebra failure inside the regression backend: {0}")]
    Linalg(#[from] FaerLinalgError),
}

/// K-fold cross-validation settings. The seed fully determines the fold
/// partition for a given sample count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KFoldSpec {
    pub nfolds: usize,
    pub seed: u64,
}

impl Default for KFoldSpec {
    fn default() -> Self {
        Self {
            nfolds: 10,
            seed: 0,
        }
    }
}

/// Ridge-path least squares. With cross-validation enabled the alpha grid is
/// scored fold-wise and the best value refit on the full data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeastSquaresOptions {
    pub alphas: Vec<f64>,
    pub cv: Option<KFoldSpec>,
}

impl Default for LeastSquaresOptions {
    fn default() -> Self {
        Self {
            alphas: vec![0.0],
            cv: Some(KFoldSpec::default()),
        }
    }
}

/// Cyclic coordinate-descent lasso over a descending alpha path with warm
/// starts. When `alphas` is `None` the path is log-spaced from
/// `max|X^T y| / n` down by `alpha_min_ratio`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LassoOptions {
    pub alphas: Option<Vec<f64>>,
    pub num_alphas: usize,
    pub alpha_min_ratio: f64,
    pub max_iter: usize,
    pub tol: f64,
    pub cv: Option<KFoldSpec>,
}

impl Default for LassoOptions {
    fn default() -> Self {
        Self {
            alphas: None,
            num_alphas: 100,
            alpha_min_ratio: 1e-3,
            max_iter: 1000,
            tol: 1e-6,
            cv: Some(KFoldSpec::default()),
        }
    }
}

/// Orthogonal matching pursuit. Cross-validation selects the nonzero count;
/// without it `max_nonzero` must be given explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmpOptions {
    pub max_nonzero: Option<usize>,
    pub cv: Option<KFoldSpec>,
}

impl Default for OmpOptions {
    fn default() -> Self {
        Self {
            max_nonzero: None,
            cv: Some(KFoldSpec::default()),
        }
    }
}

/// Closed set of recognized solver configurations, validated before
/// dispatch. Each variant carries exactly the options its backend accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LinearSolverConfig {
    LeastSquares(LeastSquaresOptions),
    Lasso(LassoOptions),
    Omp(OmpOptions),
    /// Recognized for parity with the historical solver roster, but any fit
    /// request fails with [`SolverError::LarsUnsupported`].
    Lars,
}

impl LinearSolverConfig {
    /// The cross-validation spec shared by every fit under this config, if
    /// cross-validation is enabled.
    pub fn cross_validation(&self) -> Option<KFoldSpec> {
        match self {
            Self::LeastSquares(options) => options.cv,
            Self::Lasso(options) => options.cv,
            Self::Omp(options) => options.cv,
            Self::Lars => None,
        }
    }
}

/// Regularization value chosen by a backend, tagged by payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RegularizationParam {
    /// Penalty strength (ridge or lasso alpha).
    Alpha(f64),
    /// Number of nonzero coefficients retained (matching pursuit).
    NonzeroCount(usize),
}

/// Result of one linear-model fit. `coefficients` is dense, one entry per
/// design-matrix column. `cv_score` is absent when cross-validation was
/// disabled in the options.
#[derive(Debug, Clone)]
pub struct FitOutput {
    pub coefficients: Array1<f64>,
    pub cv_score: Option<f64>,
    pub regularization: RegularizationParam,
}

/// Shuffle `0..nsamples` with a seeded generator and split into `nfolds`
/// contiguous chunks whose sizes differ by at most one.
pub fn k_fold_assignments(
    nsamples: usize,
    nfolds: usize,
    seed: u64,
) -> Result<Vec<Vec<usize>>, SolverError> {
    if nfolds < 2 || nfolds > nsamples {
        return Err(SolverError::InvalidFoldCount { nfolds, nsamples });
    }
    let mut order: Vec<usize> = (0..nsamples).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let base = nsamples / nfolds;
    let remainder = nsamples % nfolds;
    let mut folds = Vec::with_capacity(nfolds);
    let mut start = 0;
    for fold in 0..nfolds {
        let size = base + usize::from(fold < remainder);
        folds.push(order[start..start + size].to_vec());
        start += size;
    }
    Ok(folds)
}

/// Fit a linear model under `config`.
pub fn fit_linear_model(
    design: ArrayView2<'_, f64>,
    targets: ArrayView1<'_, f64>,
    config: &LinearSolverConfig,
) -> Result<FitOutput, SolverError> {
    if design.nrows() != targets.len() {
        return Err(SolverError::TargetLengthMismatch {
            rows: design.nrows(),
            targets: targets.len(),
        });
    }
    match config {
        LinearSolverConfig::LeastSquares(options) => fit_least_squares(design, targets, options),
        LinearSolverConfig::Lasso(options) => fit_lasso(design, targets, options),
        LinearSolverConfig::Omp(options) => fit_omp(design, targets, options),
        LinearSolverConfig::Lars => Err(SolverError::LarsUnsupported),
    }
}

fn split_fold(
    design: ArrayView2<'_, f64>,
    targets: ArrayView1<'_, f64>,
    test_rows: &[usize],
) -> (Array2<f64>, Array1<f64>, Array2<f64>, Array1<f64>) {
    let mut in_test = vec![false; design.nrows()];
    for &row in test_rows {
        in_test[row] = true;
    }
    let train_rows: Vec<usize> = (0..design.nrows()).filter(|&row| !in_test[row]).collect();
    (
        design.select(Axis(0), &train_rows),
        targets.select(Axis(0), &train_rows),
        design.select(Axis(0), test_rows),
        targets.select(Axis(0), test_rows),
    )
}

fn held_out_mse(
    test_design: &Array2<f64>,
    test_targets: &Array1<f64>,
    coefficients: &Array1<f64>,
) -> f64 {
    let residuals = test_design.dot(coefficients) - test_targets;
    residuals.mapv(|r| r * r).mean().unwrap_or(f64::NAN)
}

/// Pick the candidate with the lowest finite RMSE; per-fold MSE is averaged
/// over folds and square-rooted, so the score is a held-out RMSE.
fn best_candidate(scores: &[f64]) -> Result<(usize, f64), SolverError> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_finite() && best.is_none_or(|(_, s)| score < s) {
            best = Some((i, score));
        }
    }
    best.ok_or(SolverError::NoFiniteCandidate)
}

// ---------------------------------------------------------------------------
// Ridge-path least squares
// ---------------------------------------------------------------------------

fn fit_least_squares(
    design: ArrayView2<'_, f64>,
    targets: ArrayView1<'_, f64>,
    options: &LeastSquaresOptions,
) -> Result<FitOutput, SolverError> {
    if options.alphas.is_empty() {
        return Err(SolverError::InvalidOptions(
            "least-squares options need at least one alpha".into(),
        ));
    }
    let Some(cv) = options.cv else {
        if options.alphas.len() > 1 {
            return Err(SolverError::InvalidOptions(
                "multiple alphas without cross-validation leave the choice undetermined".into(),
            ));
        }
        let alpha = options.alphas[0];
        let coefficients = solve_ridge_normal_equations(design, targets, alpha)?;
        return Ok(FitOutput {
            coefficients,
            cv_score: None,
            regularization: RegularizationParam::Alpha(alpha),
        });
    };

    let folds = k_fold_assignments(design.nrows(), cv.nfolds, cv.seed)?;
    let mut scores = Vec::with_capacity(options.alphas.len());
    for &alpha in &options.alphas {
        let mut mse_sum = 0.0;
        for test_rows in &folds {
            let (train_x, train_y, test_x, test_y) = split_fold(design, targets, test_rows);
            let beta = solve_ridge_normal_equations(train_x.view(), train_y.view(), alpha)?;
            mse_sum += held_out_mse(&test_x, &test_y, &beta);
        }
        scores.push((mse_sum / folds.len() as f64).sqrt());
    }
    let (best, cv_score) = best_candidate(&scores)?;
    let alpha = options.alphas[best];
    let coefficients = solve_ridge_normal_equations(design, targets, alpha)?;
    Ok(FitOutput {
        coefficients,
        cv_score: Some(cv_score),
        regularization: RegularizationParam::Alpha(alpha),
    })
}

// ---------------------------------------------------------------------------
// Coordinate-descent lasso
// ---------------------------------------------------------------------------

#[inline]
fn soft_threshold(z: f64, threshold: f64) -> f64 {
    if z > threshold {
        z - threshold
    } else if z < -threshold {
        z + threshold
    } else {
        0.0
    }
}

/// Alpha grid for the lasso path, shared across folds so fold scores can be
/// aggregated per alpha. Sorted descending for warm starts.
fn lasso_alpha_path(
    design: ArrayView2<'_, f64>,
    targets: ArrayView1<'_, f64>,
    options: &LassoOptions,
) -> Result<Vec<f64>, SolverError> {
    let mut alphas = match &options.alphas {
        Some(explicit) => {
            if explicit.is_empty() {
                return Err(SolverError::InvalidOptions(
                    "an explicit lasso alpha list must be non-empty".into(),
                ));
            }
            explicit.clone()
        }
        None => {
            if options.num_alphas == 0 {
                return Err(SolverError::InvalidOptions(
                    "num_alphas must be positive when the alpha path is derived".into(),
                ));
            }
            if !(options.alpha_min_ratio > 0.0 && options.alpha_min_ratio < 1.0) {
                return Err(SolverError::InvalidOptions(format!(
                    "alpha_min_ratio must lie in (0, 1), got {}",
                    options.alpha_min_ratio
                )));
            }
            let n = design.nrows() as f64;
            let alpha_max = design
                .t()
                .dot(&targets)
                .iter()
                .fold(0.0_f64, |acc, v| acc.max(v.abs()))
                / n;
            if alpha_max == 0.0 {
                vec![0.0]
            } else {
                let log_max = alpha_max.ln();
                let log_min = (alpha_max * options.alpha_min_ratio).ln();
                (0..options.num_alphas)
                    .map(|i| {
                        let t = if options.num_alphas == 1 {
                            0.0
                        } else {
                            i as f64 / (options.num_alphas - 1) as f64
                        };
                        (log_max + t * (log_min - log_max)).exp()
                    })
                    .collect()
            }
        }
    };
    alphas.sort_by(|a, b| b.total_cmp(a));
    Ok(alphas)
}

/// One lasso solve by cyclic coordinate descent, minimizing
/// `1/(2n) ||y - X b||^2 + alpha ||b||_1`.
fn lasso_coordinate_descent(
    design: ArrayView2<'_, f64>,
    targets: ArrayView1<'_, f64>,
    alpha: f64,
    options: &LassoOptions,
    warm_start: Option<&Array1<f64>>,
) -> Array1<f64> {
    let (nrows, ncols) = design.dim();
    let n = nrows as f64;
    let col_sq: Vec<f64> = (0..ncols)
        .map(|j| design.column(j).mapv(|v| v * v).sum() / n)
        .collect();
    let mut beta = match warm_start {
        Some(start) => start.clone(),
        None => Array1::zeros(ncols),
    };
    let mut residual = targets.to_owned() - design.dot(&beta);
    for _ in 0..options.max_iter {
        let mut max_delta = 0.0_f64;
        for j in 0..ncols {
            if col_sq[j] == 0.0 {
                continue;
            }
            let old = beta[j];
            let rho = design.column(j).dot(&residual) / n + col_sq[j] * old;
            let new = soft_threshold(rho, alpha) / col_sq[j];
            if new != old {
                let column = design.column(j);
                residual.zip_mut_with(&column, |r, &x| *r += x * (old - new));
                beta[j] = new;
            }
            max_delta = max_delta.max((new - old).abs());
        }
        if max_delta < options.tol {
            break;
        }
    }
    beta
}

/// Lasso path evaluated at each alpha (descending), warm-starting each solve
/// from the previous one.
fn lasso_path(
    design: ArrayView2<'_, f64>,
    targets: ArrayView1<'_, f64>,
    alphas: &[f64],
    options: &LassoOptions,
) -> Vec<Array1<f64>> {
    let mut path = Vec::with_capacity(alphas.len());
    let mut warm: Option<Array1<f64>> = None;
    for &alpha in alphas {
        let beta = lasso_coordinate_descent(design, targets, alpha, options, warm.as_ref());
        warm = Some(beta.clone());
        path.push(beta);
    }
    path
}

fn fit_lasso(
    design: ArrayView2<'_, f64>,
    targets: ArrayView1<'_, f64>,
    options: &LassoOptions,
) -> Result<FitOutput, SolverError> {
    let alphas = lasso_alpha_path(design, targets, options)?;
    let Some(cv) = options.cv else {
        if alphas.len() > 1 {
            return Err(SolverError::InvalidOptions(
                "a lasso fit without cross-validation needs a single explicit alpha".into(),
            ));
        }
        let coefficients = lasso_coordinate_descent(design, targets, alphas[0], options, None);
        return Ok(FitOutput {
            coefficients,
            cv_score: None,
            regularization: RegularizationParam::Alpha(alphas[0]),
        });
    };

    let folds = k_fold_assignments(design.nrows(), cv.nfolds, cv.seed)?;
    let mut mse_per_alpha = vec![0.0_f64; alphas.len()];
    for test_rows in &folds {
        let (train_x, train_y, test_x, test_y) = split_fold(design, targets, test_rows);
        let path = lasso_path(train_x.view(), train_y.view(), &alphas, options);
        for (i, beta) in path.iter().enumerate() {
            mse_per_alpha[i] += held_out_mse(&test_x, &test_y, beta);
        }
    }
    let scores: Vec<f64> = mse_per_alpha
        .iter()
        .map(|&mse| (mse / folds.len() as f64).sqrt())
        .collect();
    let (best, cv_score) = best_candidate(&scores)?;
    let full_path = lasso_path(design, targets, &alphas[..=best], options);
    let coefficients = full_path
        .into_iter()
        .next_back()
        .unwrap_or_else(|| Array1::zeros(design.ncols()));
    Ok(FitOutput {
        coefficients,
        cv_score: Some(cv_score),
        regularization: RegularizationParam::Alpha(alphas[best]),
    })
}

// ---------------------------------------------------------------------------
// Orthogonal matching pursuit
// ---------------------------------------------------------------------------

/// Greedy OMP path: dense coefficient vectors after 1, 2, ..., kmax
/// selections. Stops early when no informative column remains.
fn omp_path(
    design: ArrayView2<'_, f64>,
    targets: ArrayView1<'_, f64>,
    kmax: usize,
) -> Result<Vec<Array1<f64>>, SolverError> {
    let ncols = design.ncols();
    let col_norms: Vec<f64> = (0..ncols)
        .map(|j| design.column(j).mapv(|v| v * v).sum().sqrt())
        .collect();
    let mut residual = targets.to_owned();
    let mut active: Vec<usize> = Vec::new();
    let mut path = Vec::with_capacity(kmax);
    for _ in 0..kmax {
        let mut best: Option<(usize, f64)> = None;
        for j in 0..ncols {
            if col_norms[j] == 0.0 || active.contains(&j) {
                continue;
            }
            let correlation = design.column(j).dot(&residual).abs() / col_norms[j];
            if best.is_none_or(|(_, c)| correlation > c) {
                best = Some((j, correlation));
            }
        }
        let Some((chosen, _)) = best else {
            break;
        };
        active.push(chosen);
        // Re-solve on the active set from scratch each step; the sets stay
        // small enough that incremental Cholesky updates are not worth it.
        let active_design = design.select(Axis(1), &active);
        let gram = active_design.t().dot(&active_design);
        let rhs = active_design.t().dot(&targets);
        let beta_active = solve_symmetric(&gram, &rhs)?;
        residual = targets.to_owned() - active_design.dot(&beta_active);
        let mut dense = Array1::zeros(ncols);
        for (slot, &column) in active.iter().enumerate() {
            dense[column] = beta_active[slot];
        }
        path.push(dense);
    }
    Ok(path)
}

fn fit_omp(
    design: ArrayView2<'_, f64>,
    targets: ArrayView1<'_, f64>,
    options: &OmpOptions,
) -> Result<FitOutput, SolverError> {
    let ncols = design.ncols();
    // The nonzero budget can never exceed the column count.
    let kmax = options.max_nonzero.unwrap_or(ncols).min(ncols);
    if kmax == 0 {
        return Err(SolverError::InvalidOptions(
            "orthogonal matching pursuit needs a positive nonzero budget".into(),
        ));
    }
    let Some(cv) = options.cv else {
        if options.max_nonzero.is_none() {
            return Err(SolverError::InvalidOptions(
                "an OMP fit without cross-validation needs an explicit max_nonzero".into(),
            ));
        }
        let path = omp_path(design, targets, kmax)?;
        let coefficients = path
            .into_iter()
            .next_back()
            .ok_or(SolverError::NoFiniteCandidate)?;
        return Ok(FitOutput {
            coefficients,
            cv_score: None,
            regularization: RegularizationParam::NonzeroCount(kmax),
        });
    };

    let folds = k_fold_assignments(design.nrows(), cv.nfolds, cv.seed)?;
    let mut mse_per_k = vec![0.0_f64; kmax];
    let mut k_available = kmax;
    for test_rows in &folds {
        let (train_x, train_y, test_x, test_y) = split_fold(design, targets, test_rows);
        let fold_kmax = kmax.min(train_x.nrows());
        let path = omp_path(train_x.view(), train_y.view(), fold_kmax)?;
        k_available = k_available.min(path.len());
        for (i, beta) in path.iter().enumerate() {
            mse_per_k[i] += held_out_mse(&test_x, &test_y, beta);
        }
    }
    if k_available == 0 {
        return Err(SolverError::NoFiniteCandidate);
    }
    let scores: Vec<f64> = mse_per_k[..k_available]
        .iter()
        .map(|&mse| (mse / folds.len() as f64).sqrt())
        .collect();
    let (best, cv_score) = best_candidate(&scores)?;
    let nonzero = best + 1;
    let path = omp_path(design, targets, nonzero)?;
    let coefficients = path
        .into_iter()
        .next_back()
        .ok_or(SolverError::NoFiniteCandidate)?;
    Ok(FitOutput {
        coefficients,
        cv_score: Some(cv_score),
        regularization: RegularizationParam::NonzeroCount(nonzero),
    })
}
