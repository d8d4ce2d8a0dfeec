//! Finite-difference verification of every analytic gradient branch.

use ndarray::{Array2, ArrayView2};
use ppcov::{
    sparse_to_dense, CovarianceFunction, LengthScaleSpec, Ppcs2, Ppcs2Spec, PriorSpec,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const EPS: f64 = 1e-6;
const TOL: f64 = 1e-7;

fn scattered_inputs(n: usize, dim: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut x = Array2::<f64>::zeros((n, dim));
    for i in 0..n {
        for d in 0..dim {
            x[[i, d]] = rng.random_range(-1.0..1.0);
        }
    }
    x
}

/// Copy of `kernel` with one encoded component nudged by `delta`.
fn perturbed(kernel: &Ppcs2, component: usize, delta: f64) -> Ppcs2 {
    let (mut values, _) = kernel.encode();
    values[component] += delta;
    let mut out = kernel.clone();
    out.decode(&values).expect("decode of perturbed vector should succeed");
    out
}

fn dense_trcov(kernel: &Ppcs2, x: ArrayView2<f64>) -> Array2<f64> {
    sparse_to_dense(&kernel.trcov(x).expect("trcov should succeed"))
}

fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    (a - b).iter().fold(0.0_f64, |m, &v| m.max(v.abs()))
}

fn check_training_gradient(kernel: &Ppcs2, x: ArrayView2<f64>) {
    let (encoded, names) = kernel.encode();
    let grads = kernel
        .training_gradient(x)
        .expect("training gradient should succeed");
    assert_eq!(
        grads.len(),
        encoded.len(),
        "one gradient matrix per encoded component"
    );

    for (c, grad) in grads.iter().enumerate() {
        let up = dense_trcov(&perturbed(kernel, c, EPS), x);
        let down = dense_trcov(&perturbed(kernel, c, -EPS), x);
        let fd = (&up - &down) / (2.0 * EPS);
        let analytic = sparse_to_dense(grad);
        let err = max_abs_diff(&fd, &analytic);
        assert!(
            err < TOL,
            "component {c} ({}) disagrees with finite differences by {err:.3e}",
            names[c]
        );
    }
}

#[test]
fn training_gradient_matches_finite_differences_isotropic() {
    let kernel = Ppcs2::new(Ppcs2Spec {
        input_dim: Some(2),
        magnitude: Some(0.6),
        length_scale: Some(LengthScaleSpec::Scalar(0.9)),
        ..Default::default()
    })
    .expect("construction should succeed");
    check_training_gradient(&kernel, scattered_inputs(25, 2, 17).view());
}

#[test]
fn training_gradient_matches_finite_differences_ard() {
    let kernel = Ppcs2::new(Ppcs2Spec {
        input_dim: Some(3),
        magnitude: Some(0.35),
        length_scale: Some(LengthScaleSpec::Vector(ndarray::array![0.7, 1.1, 1.6])),
        ..Default::default()
    })
    .expect("construction should succeed");
    check_training_gradient(&kernel, scattered_inputs(20, 3, 23).view());
}

#[test]
fn training_gradient_matches_finite_differences_with_selected_subset() {
    let kernel = Ppcs2::new(Ppcs2Spec {
        input_dim: Some(3),
        magnitude: Some(0.5),
        length_scale: Some(LengthScaleSpec::Vector(ndarray::array![0.8, 1.3])),
        selected_variables: Some(vec![0, 2]),
        ..Default::default()
    })
    .expect("construction should succeed");
    check_training_gradient(&kernel, scattered_inputs(18, 3, 31).view());
}

#[test]
fn cross_gradient_matches_finite_differences() {
    let kernel = Ppcs2::new(Ppcs2Spec {
        input_dim: Some(2),
        magnitude: Some(0.45),
        length_scale: Some(LengthScaleSpec::Vector(ndarray::array![1.2, 0.8])),
        ..Default::default()
    })
    .expect("construction should succeed");

    let x = scattered_inputs(15, 2, 41);
    let x2 = scattered_inputs(12, 2, 43);
    let grads = kernel
        .cross_gradient(x.view(), x2.view())
        .expect("cross gradient should succeed");
    let (encoded, _) = kernel.encode();
    assert_eq!(grads.len(), encoded.len());

    for (c, grad) in grads.iter().enumerate() {
        let up = sparse_to_dense(
            &perturbed(&kernel, c, EPS)
                .cov(x.view(), x2.view())
                .expect("cov should succeed"),
        );
        let down = sparse_to_dense(
            &perturbed(&kernel, c, -EPS)
                .cov(x.view(), x2.view())
                .expect("cov should succeed"),
        );
        let fd = (&up - &down) / (2.0 * EPS);
        let err = max_abs_diff(&fd, &sparse_to_dense(grad));
        assert!(err < TOL, "cross component {c} off by {err:.3e}");
    }
}

#[test]
fn diagonal_gradient_has_magnitude_term_and_zero_scale_terms() {
    let kernel = Ppcs2::new(Ppcs2Spec {
        input_dim: Some(2),
        magnitude: Some(0.9),
        length_scale: Some(LengthScaleSpec::Vector(ndarray::array![1.0, 2.0])),
        ..Default::default()
    })
    .expect("construction should succeed");

    let x = scattered_inputs(14, 2, 53);
    let grads = kernel
        .diagonal_gradient(x.view())
        .expect("diagonal gradient should succeed");
    assert_eq!(grads.len(), 3);
    let trvar = kernel.trvar(x.view()).expect("trvar should succeed");
    assert_eq!(grads[0], trvar);
    assert!(grads[1].iter().all(|&g| g == 0.0));
    assert!(grads[2].iter().all(|&g| g == 0.0));
}

#[test]
fn input_gradient_matches_finite_differences() {
    let kernel = Ppcs2::new(Ppcs2Spec {
        input_dim: Some(2),
        magnitude: Some(0.7),
        length_scale: Some(LengthScaleSpec::Scalar(1.1)),
        ..Default::default()
    })
    .expect("construction should succeed");

    let x = scattered_inputs(12, 2, 61);
    let grads = kernel
        .input_gradient_training(x.view())
        .expect("input gradient should succeed");
    assert_eq!(grads.len(), 12 * 2);

    for i in 0..12 {
        for d in 0..2 {
            let mut up = x.clone();
            let mut down = x.clone();
            up[[i, d]] += EPS;
            down[[i, d]] -= EPS;
            let fd = (&dense_trcov(&kernel, up.view()) - &dense_trcov(&kernel, down.view()))
                / (2.0 * EPS);
            let err = max_abs_diff(&fd, &sparse_to_dense(&grads[i * 2 + d]));
            assert!(err < TOL, "input gradient ({i}, {d}) off by {err:.3e}");
        }
    }
}

#[test]
fn input_gradient_cross_matches_finite_differences() {
    let kernel = Ppcs2::new(Ppcs2Spec {
        input_dim: Some(2),
        magnitude: Some(0.3),
        length_scale: Some(LengthScaleSpec::Vector(ndarray::array![0.9, 1.4])),
        ..Default::default()
    })
    .expect("construction should succeed");

    let x = scattered_inputs(10, 2, 71);
    let x2 = scattered_inputs(8, 2, 73);
    let grads = kernel
        .input_gradient_cross(x.view(), x2.view())
        .expect("input gradient should succeed");
    assert_eq!(grads.len(), 10 * 2);

    for i in 0..10 {
        for d in 0..2 {
            let mut up = x.clone();
            let mut down = x.clone();
            up[[i, d]] += EPS;
            down[[i, d]] -= EPS;
            let c_up = sparse_to_dense(
                &kernel.cov(up.view(), x2.view()).expect("cov should succeed"),
            );
            let c_down = sparse_to_dense(
                &kernel.cov(down.view(), x2.view()).expect("cov should succeed"),
            );
            let fd = (&c_up - &c_down) / (2.0 * EPS);
            let err = max_abs_diff(&fd, &sparse_to_dense(&grads[i * 2 + d]));
            assert!(err < TOL, "cross input gradient ({i}, {d}) off by {err:.3e}");
        }
    }
}

#[test]
fn zero_distance_pairs_contribute_zero_gradient() {
    let kernel = Ppcs2::new(Ppcs2Spec {
        input_dim: Some(2),
        magnitude: Some(0.5),
        length_scale: Some(LengthScaleSpec::Vector(ndarray::array![1.0, 1.0])),
        ..Default::default()
    })
    .expect("construction should succeed");

    // Two coincident points plus one neighbor.
    let x = ndarray::array![[0.0, 0.0], [0.0, 0.0], [0.4, 0.1]];
    let grads = kernel
        .training_gradient(x.view())
        .expect("training gradient should succeed");
    // Components 1 and 2 are the ARD length scales; the coincident pair
    // (0, 1) must carry no structural contribution.
    for grad in &grads[1..] {
        let dense = sparse_to_dense(grad);
        assert_eq!(dense[[0, 1]], 0.0);
        assert_eq!(dense[[1, 0]], 0.0);
    }
    let input_grads = kernel
        .input_gradient_training(x.view())
        .expect("input gradient should succeed");
    for grad in &input_grads {
        let dense = sparse_to_dense(grad);
        assert_eq!(dense[[0, 1]], 0.0, "coincident pair must not produce NaN or Inf");
        assert!(dense.iter().all(|v| v.is_finite()));
    }
}

#[test]
fn frozen_magnitude_is_excluded_from_gradients() {
    let kernel = Ppcs2::new(Ppcs2Spec {
        input_dim: Some(2),
        magnitude_prior: PriorSpec::Freeze,
        ..Default::default()
    })
    .expect("construction should succeed");

    let x = scattered_inputs(10, 2, 83);
    let grads = kernel
        .training_gradient(x.view())
        .expect("training gradient should succeed");
    // Only the isotropic length scale remains.
    assert_eq!(grads.len(), 1);
    let (encoded, names) = kernel.encode();
    assert_eq!(encoded.len(), 1);
    assert_eq!(names[0], "log(length_scale)");
}
