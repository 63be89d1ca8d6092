use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use sparse_pce::{
    DegreeSweepOptions, ExpandRestrictOptions, FixedBasisOptions, FixedIndices, FixedSolvers,
    IndexSet, KFoldSpec, LeastSquaresOptions, LinearSolverConfig, MultiIndex, OmpOptions,
    PceStrategy, PolynomialBasis, approximate_fixed_pce, approximate_polynomial_chaos,
    cross_validate_approximation,
};

fn uniform_samples(nsamples: usize, nvars: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((nsamples, nvars), |_| rng.random_range(-1.0..=1.0))
}

/// f(x, y) = 1 + 2x + 3y^2, optionally with Gaussian observation noise.
fn quadratic_values(samples: &Array2<f64>, noise_sd: f64, seed: u64) -> Array1<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, noise_sd).unwrap();
    samples.map_axis(Axis(1), |row| {
        let noise = if noise_sd > 0.0 {
            normal.sample(&mut rng)
        } else {
            0.0
        };
        1.0 + 2.0 * row[0] + 3.0 * row[1] * row[1] + noise
    })
}

fn omp_cv(max_nonzero: Option<usize>, seed: u64) -> LinearSolverConfig {
    LinearSolverConfig::Omp(OmpOptions {
        max_nonzero,
        cv: Some(KFoldSpec { nfolds: 5, seed }),
    })
}

fn plain_least_squares() -> LinearSolverConfig {
    LinearSolverConfig::LeastSquares(LeastSquaresOptions {
        alphas: vec![0.0],
        cv: None,
    })
}

fn index(components: &[u32]) -> MultiIndex {
    MultiIndex::new(components.to_vec())
}

#[test]
fn degree_sweep_recovers_the_generating_quadratic() {
    let samples = uniform_samples(50, 2, 101);
    let values = quadratic_values(&samples, 0.05, 202).insert_axis(Axis(1));
    let strategy = PceStrategy::DegreeSweep(DegreeSweepOptions {
        min_degree: 1,
        max_degree: 4,
        hcross_strength: 1.0,
        basis: PolynomialBasis::Monomial,
        solver: omp_cv(Some(3), 7),
    });
    let model = approximate_polynomial_chaos(samples.view(), values.view(), &strategy).unwrap();

    assert_eq!(model.selected_degrees[0], Some(2));
    let expected = [
        (index(&[0, 0]), 1.0),
        (index(&[1, 0]), 2.0),
        (index(&[0, 2]), 3.0),
    ];
    for (idx, coefficient) in &expected {
        let row = model
            .indices
            .position(idx)
            .unwrap_or_else(|| panic!("{idx} missing from the selected basis"));
        let got = model.coefficients[[row, 0]];
        assert!(
            (got - coefficient).abs() < 0.15,
            "coefficient of {idx}: got {got}, want {coefficient}"
        );
    }
    for (row, idx) in model.indices.iter().enumerate() {
        if expected.iter().any(|(e, _)| e == idx) {
            continue;
        }
        let got = model.coefficients[[row, 0]];
        assert!(got.abs() < 0.1, "spurious coefficient {got} at {idx}");
    }
}

#[test]
fn expand_restrict_finds_a_sparse_basis_under_a_tight_term_budget() {
    let samples = uniform_samples(50, 2, 303);
    let values = quadratic_values(&samples, 0.05, 404).insert_axis(Axis(1));
    // Budget below the 6-term full degree-2 basis.
    let strategy = PceStrategy::ExpandingBasis(ExpandRestrictOptions {
        hcross_strength: 1.0,
        max_num_terms: 5,
        restriction_tol: f64::EPSILON * 2.0,
        basis: PolynomialBasis::Monomial,
        solver: omp_cv(Some(3), 11),
    });
    let model = approximate_polynomial_chaos(samples.view(), values.view(), &strategy).unwrap();

    for idx in [index(&[0, 0]), index(&[1, 0]), index(&[0, 2])] {
        assert!(
            model.indices.contains(&idx),
            "{idx} missing from the adaptive basis"
        );
    }
    let holdout = uniform_samples(25, 2, 505);
    let truth = quadratic_values(&holdout, 0.0, 0);
    let predicted = model.values(holdout.view()).unwrap();
    for (p, t) in predicted.column(0).iter().zip(truth.iter()) {
        assert!((p - t).abs() < 0.15, "held-out prediction {p} vs truth {t}");
    }
}

#[test]
fn fixed_basis_reproduces_known_coefficients_without_cross_validation() {
    let samples = uniform_samples(50, 2, 606);
    let values = quadratic_values(&samples, 0.0, 0).insert_axis(Axis(1));
    let indices =
        IndexSet::from_indices(2, vec![index(&[0, 0]), index(&[1, 0]), index(&[0, 2])]).unwrap();
    let options = FixedBasisOptions {
        basis: PolynomialBasis::Monomial,
        indices: FixedIndices::Shared(indices),
        solvers: FixedSolvers::Shared(plain_least_squares()),
    };
    let model = approximate_fixed_pce(samples.view(), values.view(), &options).unwrap();

    assert!(model.cv_scores[0].is_none());
    assert_eq!(model.num_terms(), 3);
    for (idx, coefficient) in [
        (index(&[0, 0]), 1.0),
        (index(&[1, 0]), 2.0),
        (index(&[0, 2]), 3.0),
    ] {
        let row = model.indices.position(&idx).unwrap();
        assert!(
            (model.coefficients[[row, 0]] - coefficient).abs() < 1e-8,
            "coefficient of {idx}"
        );
    }
}

#[test]
fn per_qoi_bases_merge_into_one_zero_filled_model() {
    let samples = uniform_samples(40, 2, 707);
    let mut values = Array2::<f64>::zeros((40, 2));
    for (row, sample) in samples.outer_iter().enumerate() {
        values[[row, 0]] = 1.0 + 2.0 * sample[0];
        values[[row, 1]] = 3.0 * sample[1] * sample[1];
    }
    let first = IndexSet::from_indices(2, vec![index(&[0, 0]), index(&[1, 0])]).unwrap();
    let second = IndexSet::from_indices(2, vec![index(&[0, 0]), index(&[0, 2])]).unwrap();
    let options = FixedBasisOptions {
        basis: PolynomialBasis::Monomial,
        indices: FixedIndices::PerQoi(vec![first, second]),
        solvers: FixedSolvers::Shared(plain_least_squares()),
    };
    let model = approximate_fixed_pce(samples.view(), values.view(), &options).unwrap();

    // Union in first-seen order; each QoI keeps its own coefficients and
    // holds exact zeros in rows its basis never contained.
    assert_eq!(model.num_terms(), 3);
    assert_eq!(model.indices.position(&index(&[0, 0])), Some(0));
    assert_eq!(model.indices.position(&index(&[1, 0])), Some(1));
    assert_eq!(model.indices.position(&index(&[0, 2])), Some(2));
    let expected = [[1.0, 0.0], [2.0, 0.0], [0.0, 3.0]];
    for (row, want_row) in expected.iter().enumerate() {
        for (qoi, want) in want_row.iter().enumerate() {
            let got = model.coefficients[[row, qoi]];
            if *want == 0.0 {
                assert_eq!(got, 0.0, "row {row} qoi {qoi} must be structurally zero");
            } else {
                assert!((got - want).abs() < 1e-8, "row {row} qoi {qoi}: {got}");
            }
        }
    }
    let holdout = uniform_samples(10, 2, 808);
    let predicted = model.values(holdout.view()).unwrap();
    for (row, sample) in holdout.outer_iter().enumerate() {
        let linear = 1.0 + 2.0 * sample[0];
        let square = 3.0 * sample[1] * sample[1];
        assert!((predicted[[row, 0]] - linear).abs() < 1e-8);
        assert!((predicted[[row, 1]] - square).abs() < 1e-8);
    }
}

#[test]
fn adaptive_multi_qoi_search_stays_accurate_after_the_merge() {
    let samples = uniform_samples(60, 2, 909);
    let mut rng = StdRng::seed_from_u64(1010);
    let normal = Normal::new(0.0, 0.02).unwrap();
    let mut values = Array2::<f64>::zeros((60, 2));
    for (row, sample) in samples.outer_iter().enumerate() {
        values[[row, 0]] = 1.0 + 2.0 * sample[0] + normal.sample(&mut rng);
        values[[row, 1]] = 3.0 * sample[1] * sample[1] + normal.sample(&mut rng);
    }
    let strategy = PceStrategy::DegreeSweep(DegreeSweepOptions {
        min_degree: 1,
        max_degree: 3,
        hcross_strength: 1.0,
        basis: PolynomialBasis::Monomial,
        solver: omp_cv(Some(3), 23),
    });
    let model = approximate_polynomial_chaos(samples.view(), values.view(), &strategy).unwrap();

    assert_eq!(model.num_qoi(), 2);
    let y_squared = model
        .indices
        .position(&index(&[0, 2]))
        .expect("the quadratic QoI pulls y^2 into the union");
    assert!((model.coefficients[[y_squared, 1]] - 3.0).abs() < 0.15);
    // The linear QoI never selects the y^2 term with any weight to speak of.
    assert!(model.coefficients[[y_squared, 0]].abs() < 0.05);

    let holdout = uniform_samples(20, 2, 1111);
    let predicted = model.values(holdout.view()).unwrap();
    for (row, sample) in holdout.outer_iter().enumerate() {
        let linear = 1.0 + 2.0 * sample[0];
        let square = 3.0 * sample[1] * sample[1];
        assert!((predicted[[row, 0]] - linear).abs() < 0.15);
        assert!((predicted[[row, 1]] - square).abs() < 0.15);
    }
}

#[test]
fn pipeline_cross_validation_scores_sit_at_the_noise_floor() {
    let samples = uniform_samples(60, 2, 111);
    let values = quadratic_values(&samples, 0.05, 222).insert_axis(Axis(1));
    let indices =
        IndexSet::from_indices(2, vec![index(&[0, 0]), index(&[1, 0]), index(&[0, 2])]).unwrap();
    let strategy = PceStrategy::FixedBasis(FixedBasisOptions {
        basis: PolynomialBasis::Monomial,
        indices: FixedIndices::Shared(indices),
        solvers: FixedSolvers::Shared(plain_least_squares()),
    });
    let result =
        cross_validate_approximation(samples.view(), values.view(), &strategy, 5, 42).unwrap();

    assert_eq!(result.fold_models.len(), 5);
    assert_eq!(result.fold_residuals.len(), 5);
    let total_rows: usize = result.fold_residuals.iter().map(|r| r.nrows()).sum();
    assert_eq!(total_rows, 60);
    // Correctly specified basis: held-out RMSE tracks the 0.05 noise level.
    assert!(result.scores[0] < 0.1, "cv score {}", result.scores[0]);
    assert!(result.scores[0] > 0.01, "cv score {}", result.scores[0]);
}
