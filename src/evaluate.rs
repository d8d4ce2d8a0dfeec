//! Sparse kernel evaluator: `cov`, `trcov`, and `trvar`.
//!
//! The kernel has compact support (it vanishes once the scaled distance
//! reaches 1), so covariance matrices are assembled directly in sparse
//! form: every candidate pair is scanned, but only pairs with `r < 1` are
//! stored. Working memory is bounded by the retained-pair count, never by
//! a dense n×n buffer. The training form exploits symmetry by scanning the
//! strict lower triangle and mirroring, with the magnitude-valued diagonal
//! added explicitly (the self-pair is outside the neighbor scan).

use faer::sparse::SparseColMat;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::covfn::CovarianceError;
use crate::descriptor::{LengthMode, Ppcs2};
use crate::sparse::{dense_to_sparse, TripletAccumulator};

/// Optional accelerated dense training-covariance routine.
///
/// `None` means the accelerator cannot handle this kernel/input; the
/// caller falls back to the sparse path, and the two must agree modulo
/// floating-point association order. Absence is never an error.
pub trait DenseTrainingCov: Send + Sync {
    fn try_trcov(&self, kernel: &Ppcs2, x: ArrayView2<f64>) -> Option<Array2<f64>>;
}

impl Ppcs2 {
    /// Kernel value at scaled distance `r`; exactly zero for `r >= 1`.
    pub(crate) fn kernel_value(&self, r: f64) -> f64 {
        if r >= 1.0 {
            return 0.0;
        }
        let l = self.order as f64;
        let cs = 1.0 - r;
        self.magnitude() * cs.powi(self.order as i32 + 2)
            * ((l * l + 4.0 * l + 3.0) * r * r + (3.0 * l + 6.0) * r + 3.0)
            / 3.0
    }

    /// ∂k/∂r, the outer chain-rule factor shared by both gradient engines:
    ///
    /// ```text
    /// dk/dr = -(magnitude/3) (l+3)(l+4) cs^(l+1) r ((l+1) r + 1)
    /// ```
    pub(crate) fn radial_derivative(&self, r: f64) -> f64 {
        if r >= 1.0 {
            return 0.0;
        }
        let l = self.order as f64;
        let cs = 1.0 - r;
        -(self.magnitude() / 3.0)
            * (l + 3.0)
            * (l + 4.0)
            * cs.powi(self.order as i32 + 1)
            * r
            * ((l + 1.0) * r + 1.0)
    }

    /// Scaled distance between one pair of rows. `dims` is the
    /// used-coordinate list (ignored in metric mode, where the metric owns
    /// the distance entirely).
    pub(crate) fn pair_distance(
        &self,
        dims: &[usize],
        a: ArrayView1<f64>,
        b: ArrayView1<f64>,
    ) -> f64 {
        match self.length_mode() {
            LengthMode::ExternalMetric(metric) => metric.distance(a, b),
            _ => {
                let mut r2 = 0.0;
                for (pos, &d) in dims.iter().enumerate() {
                    let diff = (a[d] - b[d]) / self.scale_at(pos);
                    r2 += diff * diff;
                }
                r2.sqrt()
            }
        }
    }

    pub(crate) fn validate_input(&self, x: ArrayView2<f64>) -> Result<(), CovarianceError> {
        let expected = self.expected_input_dim();
        if x.ncols() != expected {
            return Err(CovarianceError::InputWidthMismatch {
                expected,
                found: x.ncols(),
            });
        }
        Ok(())
    }

    /// Sparse cross-covariance between two input sets.
    pub fn cov(
        &self,
        x1: ArrayView2<f64>,
        x2: ArrayView2<f64>,
    ) -> Result<SparseColMat<usize, f64>, CovarianceError> {
        if x1.ncols() != x2.ncols() {
            return Err(CovarianceError::InputDimensionMismatch {
                left: x1.ncols(),
                right: x2.ncols(),
            });
        }
        self.validate_input(x1)?;

        let dims = self.used_dims();
        let mut acc = TripletAccumulator::new(x1.nrows(), x2.nrows());
        for i in 0..x1.nrows() {
            for j in 0..x2.nrows() {
                let r = self.pair_distance(&dims, x1.row(i), x2.row(j));
                if r < 1.0 {
                    acc.push(i, j, self.kernel_value(r));
                }
            }
        }
        acc.build()
    }

    /// Sparse symmetric training covariance of `x` with itself.
    ///
    /// Tries the accelerated dense routine first (scaled modes only); on
    /// `None` falls back to the lower-triangle sparse scan.
    pub fn trcov(&self, x: ArrayView2<f64>) -> Result<SparseColMat<usize, f64>, CovarianceError> {
        self.validate_input(x)?;

        if !matches!(self.length_mode(), LengthMode::ExternalMetric(_)) {
            if let Some(accel) = &self.accel {
                if let Some(dense) = accel.try_trcov(self, x) {
                    return dense_to_sparse(&dense);
                }
            }
        }

        let n = x.nrows();
        let dims = self.used_dims();
        let mut acc = TripletAccumulator::new(n, n);
        for i in 1..n {
            for j in 0..i {
                let r = self.pair_distance(&dims, x.row(i), x.row(j));
                if r < 1.0 {
                    acc.push_symmetric(i, j, self.kernel_value(r));
                }
            }
        }
        for i in 0..n {
            acc.push(i, i, self.magnitude());
        }
        acc.build()
    }

    /// Training variance vector: `magnitude` for every row, snapped to
    /// exactly zero below machine epsilon.
    pub fn trvar(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, CovarianceError> {
        self.validate_input(x)?;
        let mut variance = self.magnitude();
        if variance < f64::EPSILON {
            variance = 0.0;
        }
        Ok(Array1::from_elem(x.nrows(), variance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Ppcs2Spec;
    use approx::assert_abs_diff_eq;

    fn kernel_1d(magnitude: f64) -> Ppcs2 {
        Ppcs2::new(Ppcs2Spec {
            input_dim: Some(1),
            magnitude: Some(magnitude),
            ..Default::default()
        })
        .expect("construction should succeed")
    }

    #[test]
    fn kernel_value_at_zero_distance_is_magnitude() {
        let kernel = kernel_1d(0.37);
        assert_abs_diff_eq!(kernel.kernel_value(0.0), 0.37, epsilon = 1e-15);
    }

    #[test]
    fn kernel_vanishes_at_and_beyond_support_boundary() {
        let kernel = kernel_1d(1.0);
        assert_eq!(kernel.kernel_value(1.0), 0.0);
        assert_eq!(kernel.kernel_value(1.5), 0.0);
        assert_eq!(kernel.radial_derivative(1.0), 0.0);
        // Approaching the boundary from below the value decays to zero.
        assert!(kernel.kernel_value(1.0 - 1e-9) < 1e-12);
    }

    #[test]
    fn radial_derivative_matches_finite_difference() {
        let kernel = kernel_1d(0.8);
        let eps = 1e-7;
        for &r in &[0.05, 0.3, 0.62, 0.9] {
            let fd = (kernel.kernel_value(r + eps) - kernel.kernel_value(r - eps)) / (2.0 * eps);
            assert_abs_diff_eq!(kernel.radial_derivative(r), fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn radial_derivative_is_zero_at_zero_distance() {
        let kernel = kernel_1d(0.8);
        assert_eq!(kernel.radial_derivative(0.0), 0.0);
    }
}
