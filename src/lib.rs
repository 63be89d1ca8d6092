#![deny(dead_code)]
#![deny(unused_imports)]

//! Adaptive sparse polynomial chaos expansions.
//!
//! The crate approximates a scalar- or vector-valued function from scattered
//! training data by selecting which multivariate polynomial terms to keep
//! (out of a combinatorially large index space) and fitting their weights
//! with cross-validated regression. Basis selection is driven either by a
//! fixed-degree sweep or by an adaptive expand/restrict search over
//! admissible index sets; independently selected per-QoI bases are merged
//! into one shared model at the end.

pub mod approximate;
pub mod basis;
pub mod faer_ndarray;
pub mod indices;
pub mod search;
pub mod solver;

pub use approximate::{
    ApproximateError, ApproximationCrossValidation, FixedBasisOptions, FixedIndices, FixedSolvers,
    PceModel, PceStrategy, approximate_fixed_pce, approximate_polynomial_chaos,
    cross_validate_approximation, merge_qoi_fits,
};
pub use basis::{BasisError, PolynomialBasis};
pub use indices::{
    IndexError, IndexSet, MultiIndex, expand_basis, hyperbolic_indices, restrict_basis,
};
pub use search::{
    Basis, DegreeSweepOptions, ExpandRestrictOptions, QoiFit, SearchError, degree_search,
    expand_restrict_search,
};
pub use solver::{
    FitOutput, KFoldSpec, LassoOptions, LeastSquaresOptions, LinearSolverConfig, OmpOptions,
    RegularizationParam, SolverError, fit_linear_model, k_fold_assignments,
};
