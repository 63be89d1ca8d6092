//! Multivariate index-set algebra for sparse polynomial bases.
//!
//! A basis term is identified by a [`MultiIndex`], one non-negative integer
//! per input variable. An [`IndexSet`] keeps the terms in stable insertion
//! order (the order defines design-matrix columns, so it must survive
//! end-to-end) while providing value-based membership tests.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

use ndarray::ArrayView1;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Multi-index has {found} components but the set holds {expected}-variate indices.")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Duplicate multi-index {0} supplied where a deduplicated set is required.")]
    DuplicateIndex(MultiIndex),

    #[error(
        "Coefficient vector length ({coefficients}) does not match the index set size ({indices})."
    )]
    CoefficientLengthMismatch {
        indices: usize,
        coefficients: usize,
    },

    #[error(
        "The constant (all-zero) multi-index is missing from the basis; every fitted basis must contain it."
    )]
    MissingConstantTerm,

    #[error("An index set must have at least one variable.")]
    ZeroVariables,

    #[error("Hyperbolic cross strength must lie in (0, 1], but was {0}.")]
    InvalidStrength(f64),
}

/// Ordered tuple of per-variable polynomial degrees. Immutable once created.
///
/// Equality and hashing are structural over the integer components (derived),
/// so a `MultiIndex` can back hash-map membership directly with no risk of
/// key collisions between distinct indices.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MultiIndex(Box<[u32]>);

impl MultiIndex {
    pub fn new(components: Vec<u32>) -> Self {
        Self(components.into_boxed_slice())
    }

    /// The constant-term index: zero in every variable.
    pub fn constant(nvars: usize) -> Self {
        Self(vec![0; nvars].into_boxed_slice())
    }

    pub fn nvars(&self) -> usize {
        self.0.len()
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// Total degree: sum of all components.
    pub fn degree(&self) -> u32 {
        self.0.iter().sum()
    }

    pub fn is_constant(&self) -> bool {
        self.0.iter().all(|&c| c == 0)
    }

    /// Dimensions with a non-zero entry.
    pub fn active_dims(&self) -> impl Iterator<Item = usize> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c > 0)
            .map(|(d, _)| d)
    }

    /// The index with component `dim` incremented by one.
    pub fn forward_neighbor(&self, dim: usize) -> Self {
        let mut components = self.0.to_vec();
        components[dim] += 1;
        Self(components.into_boxed_slice())
    }

    /// The index with component `dim` decremented by one, or `None` when the
    /// component is already zero.
    pub fn backward_neighbor(&self, dim: usize) -> Option<Self> {
        if self.0[dim] == 0 {
            return None;
        }
        let mut components = self.0.to_vec();
        components[dim] -= 1;
        Some(Self(components.into_boxed_slice()))
    }
}

impl fmt::Display for MultiIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, ")")
    }
}

/// Deduplicated set of multi-indices with stable insertion order.
///
/// Invariants: all members share the same `nvars`; no member appears twice
/// (membership is by value). The position of an index never changes once
/// inserted, so coefficient vectors stay aligned to their columns.
#[derive(Clone, Debug)]
pub struct IndexSet {
    nvars: usize,
    entries: Vec<MultiIndex>,
    positions: HashMap<MultiIndex, usize>,
}

impl IndexSet {
    pub fn new(nvars: usize) -> Self {
        Self {
            nvars,
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Build a set from a sequence of indices, rejecting duplicates and
    /// dimension mismatches.
    pub fn from_indices<I>(nvars: usize, indices: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = MultiIndex>,
    {
        let mut set = Self::new(nvars);
        for index in indices {
            if !set.insert(index.clone())? {
                return Err(IndexError::DuplicateIndex(index));
            }
        }
        Ok(set)
    }

    pub fn nvars(&self) -> usize {
        self.nvars
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Structural membership test.
    pub fn contains(&self, index: &MultiIndex) -> bool {
        self.positions.contains_key(index)
    }

    /// Column position of `index`, if present.
    pub fn position(&self, index: &MultiIndex) -> Option<usize> {
        self.positions.get(index).copied()
    }

    pub fn get(&self, position: usize) -> Option<&MultiIndex> {
        self.entries.get(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MultiIndex> {
        self.entries.iter()
    }

    /// Insert `index` at the next position. Returns `false` when the index
    /// was already a member (the set is unchanged).
    pub fn insert(&mut self, index: MultiIndex) -> Result<bool, IndexError> {
        if index.nvars() != self.nvars {
            return Err(IndexError::DimensionMismatch {
                expected: self.nvars,
                found: index.nvars(),
            });
        }
        if self.positions.contains_key(&index) {
            return Ok(false);
        }
        self.positions.insert(index.clone(), self.entries.len());
        self.entries.push(index);
        Ok(true)
    }

    /// Insert every index in `new_indices`, skipping members already present.
    /// Returns the number of indices actually added.
    pub fn extend<I>(&mut self, new_indices: I) -> Result<usize, IndexError>
    where
        I: IntoIterator<Item = MultiIndex>,
    {
        let mut added = 0;
        for index in new_indices {
            if self.insert(index)? {
                added += 1;
            }
        }
        Ok(added)
    }
}

/// All indices whose hyperbolic-cross norm with the given `strength` is at
/// most `degree`. `strength == 1` reduces to plain total-degree truncation;
/// smaller values favour low-interaction terms.
///
/// Enumeration order is lexicographic over components, so the constant index
/// always comes first.
pub fn hyperbolic_indices(
    nvars: usize,
    degree: u32,
    strength: f64,
) -> Result<IndexSet, IndexError> {
    if nvars == 0 {
        return Err(IndexError::ZeroVariables);
    }
    if !(strength > 0.0 && strength <= 1.0) {
        return Err(IndexError::InvalidStrength(strength));
    }
    let total_degree_only = (strength - 1.0).abs() < f64::EPSILON;
    // Small slack so that e.g. (2^p + 1^p)^(1/p) == 3 survives rounding.
    let budget = f64::from(degree).powf(strength) + 1e-10;
    let mut set = IndexSet::new(nvars);
    let mut components = vec![0u32; nvars];
    enumerate_hyperbolic(
        &mut set,
        &mut components,
        0,
        degree,
        strength,
        budget,
        total_degree_only,
    )?;
    Ok(set)
}

fn enumerate_hyperbolic(
    set: &mut IndexSet,
    components: &mut Vec<u32>,
    dim: usize,
    degree: u32,
    strength: f64,
    budget: f64,
    total_degree_only: bool,
) -> Result<(), IndexError> {
    if dim == components.len() {
        set.insert(MultiIndex::new(components.clone()))?;
        return Ok(());
    }
    for c in 0..=degree {
        components[dim] = c;
        let prefix: &[u32] = &components[..=dim];
        let admitted = if total_degree_only {
            prefix.iter().sum::<u32>() <= degree
        } else {
            prefix
                .iter()
                .map(|&v| f64::from(v).powf(strength))
                .sum::<f64>()
                <= budget
        };
        if !admitted {
            break;
        }
        enumerate_hyperbolic(
            set,
            components,
            dim + 1,
            degree,
            strength,
            budget,
            total_degree_only,
        )?;
    }
    components[dim] = 0;
    Ok(())
}

/// Candidate indices adjacent to `set`, filtered by downward-closure
/// admissibility.
///
/// For every member and every dimension, the forward neighbor is admitted iff
/// it is new and every backward neighbor along its active dimensions is
/// already a member of `set`. The backward check deliberately excludes
/// indices admitted earlier in the same call: each returned index must keep
/// the set admissible when inserted on its own. Discovery order (outer loop
/// over members, inner loop over dimensions) fixes the output order; no
/// index is returned twice.
///
/// The caller decides whether and when to merge the result into `set`.
pub fn expand_basis(set: &IndexSet) -> Vec<MultiIndex> {
    let nvars = set.nvars();
    let mut queued: HashSet<MultiIndex> = HashSet::new();
    let mut admitted = Vec::new();
    for index in set.iter() {
        for dim in 0..nvars {
            let forward = index.forward_neighbor(dim);
            if set.contains(&forward) || queued.contains(&forward) {
                continue;
            }
            let admissible = forward.active_dims().all(|k| {
                forward
                    .backward_neighbor(k)
                    .is_some_and(|backward| set.contains(&backward))
            });
            if admissible {
                queued.insert(forward.clone());
                admitted.push(forward);
            }
        }
    }
    admitted
}

/// Prune `set` down to the terms whose coefficient magnitude exceeds `tol`.
///
/// The constant term is always retained regardless of its coefficient; it
/// anchors every future expansion step. Relative order of the survivors is
/// preserved. Coefficients are not renumbered here: dropping columns changes
/// the regression problem, so the caller must re-fit afterwards.
pub fn restrict_basis(
    set: &IndexSet,
    coefficients: ArrayView1<'_, f64>,
    tol: f64,
) -> Result<IndexSet, IndexError> {
    if coefficients.len() != set.len() {
        return Err(IndexError::CoefficientLengthMismatch {
            indices: set.len(),
            coefficients: coefficients.len(),
        });
    }
    if !set.iter().any(|index| index.is_constant()) {
        return Err(IndexError::MissingConstantTerm);
    }
    let mut restricted = IndexSet::new(set.nvars());
    for (index, &coefficient) in set.iter().zip(coefficients.iter()) {
        if index.is_constant() || coefficient.abs() > tol {
            restricted.insert(index.clone())?;
        }
    }
    Ok(restricted)
}
