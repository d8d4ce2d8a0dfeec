//! Input gradient engine: exact analytic ∂K/∂x.
//!
//! One sparse matrix per input coordinate, ordered point-major: component
//! `i * input_dim + d` differentiates with respect to coordinate `d` of
//! point `i` of the first input set. Unselected coordinates get empty
//! (all-zero) matrices so callers can index positionally.
//!
//! Without a metric the per-pair entry is
//!
//! ```text
//! dK_ij/dx_{i,d} = (dk/dr) · Δ_d / (ℓ_d² r),   Δ_d = x_{i,d} − x_{j,d}
//! ```
//!
//! with the division by `r` guarded: a zero-distance pair contributes
//! exactly zero for every coordinate. With a metric the outer factor
//! `dk/dr` multiplies the metric's reported ∂r/∂x. In the training case
//! the symmetric matrix picks up the same value at `(i, j)` and `(j, i)`,
//! since moving point `i` perturbs both its row and its column.

use faer::sparse::SparseColMat;
use ndarray::ArrayView2;

use crate::covfn::CovarianceError;
use crate::descriptor::{LengthMode, Ppcs2};
use crate::sparse::TripletAccumulator;

impl Ppcs2 {
    /// Gradient of `trcov(x)` with respect to every coordinate of every
    /// point of `x`.
    pub fn input_gradient_training(
        &self,
        x: ArrayView2<f64>,
    ) -> Result<Vec<SparseColMat<usize, f64>>, CovarianceError> {
        self.validate_input(x)?;

        let n = x.nrows();
        let dim = self.expected_input_dim();
        let dims = self.used_dims();
        // One small matrix per (point, coordinate); each holds only the
        // neighbors of that point, so seed capacities stay modest.
        let mut accs: Vec<TripletAccumulator> = (0..n * dim)
            .map(|_| TripletAccumulator::with_capacity(n, n, 8))
            .collect();

        for i in 1..n {
            for j in 0..i {
                let r = self.pair_distance(&dims, x.row(i), x.row(j));
                if r >= 1.0 || r == 0.0 {
                    continue;
                }
                let dkdr = self.radial_derivative(r);
                match self.length_mode() {
                    LengthMode::ExternalMetric(metric) => {
                        let gi = metric.input_gradient(x.row(i), x.row(j));
                        let gj = metric.input_gradient(x.row(j), x.row(i));
                        for d in 0..dim {
                            accs[i * dim + d].push_symmetric(i, j, dkdr * gi[d]);
                            accs[j * dim + d].push_symmetric(i, j, dkdr * gj[d]);
                        }
                    }
                    _ => {
                        for (pos, &d) in dims.iter().enumerate() {
                            let scale = self.scale_at(pos);
                            let diff = x[[i, d]] - x[[j, d]];
                            let value = dkdr * diff / (scale * scale * r);
                            accs[i * dim + d].push_symmetric(i, j, value);
                            // Moving point j flips the sign of Δ_d.
                            accs[j * dim + d].push_symmetric(i, j, -value);
                        }
                    }
                }
            }
        }

        accs.into_iter().map(TripletAccumulator::build).collect()
    }

    /// Gradient of `cov(x, x2)` with respect to the coordinates of `x`'s
    /// rows; each matrix carries entries in one row only.
    pub fn input_gradient_cross(
        &self,
        x: ArrayView2<f64>,
        x2: ArrayView2<f64>,
    ) -> Result<Vec<SparseColMat<usize, f64>>, CovarianceError> {
        if x.ncols() != x2.ncols() {
            return Err(CovarianceError::InputDimensionMismatch {
                left: x.ncols(),
                right: x2.ncols(),
            });
        }
        self.validate_input(x)?;

        let n1 = x.nrows();
        let n2 = x2.nrows();
        let dim = self.expected_input_dim();
        let dims = self.used_dims();
        let mut accs: Vec<TripletAccumulator> = (0..n1 * dim)
            .map(|_| TripletAccumulator::with_capacity(n1, n2, 8))
            .collect();

        for i in 0..n1 {
            for j in 0..n2 {
                let r = self.pair_distance(&dims, x.row(i), x2.row(j));
                if r >= 1.0 || r == 0.0 {
                    continue;
                }
                let dkdr = self.radial_derivative(r);
                match self.length_mode() {
                    LengthMode::ExternalMetric(metric) => {
                        let gi = metric.input_gradient(x.row(i), x2.row(j));
                        for d in 0..dim {
                            accs[i * dim + d].push(i, j, dkdr * gi[d]);
                        }
                    }
                    _ => {
                        for (pos, &d) in dims.iter().enumerate() {
                            let scale = self.scale_at(pos);
                            let diff = x[[i, d]] - x2[[j, d]];
                            accs[i * dim + d].push(i, j, dkdr * diff / (scale * scale * r));
                        }
                    }
                }
            }
        }

        accs.into_iter().map(TripletAccumulator::build).collect()
    }
}
