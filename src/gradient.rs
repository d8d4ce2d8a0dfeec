//! Hyperparameter gradient engine: exact analytic ∂K/∂θ.
//!
//! Every component is reported in the transformed (log) coordinate, in the
//! order the parameter codec emits components (priors' own parameters
//! excluded — those belong to the prior's gradient). The magnitude term is
//! the covariance itself, since `k` is linear in `magnitude` and
//! θ = log(magnitude). Length-scale and metric terms re-derive the same
//! sparse support mask as the evaluator: gradients only exist where the
//! kernel is nonzero.
//!
//! Closed forms, with `cs = 1 - r` and `l` the polynomial order:
//!
//! ```text
//! dk/d log(ℓ)     = (m/3)(l+3)(l+4) cs^(l+1) ((l+1)r + 1) · r²          (isotropic)
//! dk/d log(ℓ_d)   = (m/3)(l+3)(l+4) cs^(l+1) ((l+1)r + 1) · Δ_d²/ℓ_d²   (ARD)
//! dk/d θ_metric   = (dk/dr) · (∂r/∂θ_metric reported by the metric)
//! ```
//!
//! The `1/r` from the chain through `∂r/∂log ℓ_d` cancels against one
//! power of `r` in `dk/dr`; zero-distance pairs contribute exactly zero by
//! the guarded skip below.

use faer::sparse::SparseColMat;
use ndarray::{Array1, ArrayView2};

use crate::covfn::CovarianceError;
use crate::descriptor::{LengthMode, Ppcs2};
use crate::sparse::TripletAccumulator;

impl Ppcs2 {
    /// Shared prefactor of the length-scale gradients:
    /// `(magnitude/3)(l+3)(l+4) cs^(l+1) ((l+1)r + 1)`, zero outside the
    /// support.
    fn scale_gradient_factor(&self, r: f64) -> f64 {
        if r >= 1.0 {
            return 0.0;
        }
        let l = self.order as f64;
        let cs = 1.0 - r;
        (self.magnitude() / 3.0)
            * (l + 3.0)
            * (l + 4.0)
            * cs.powi(self.order as i32 + 1)
            * ((l + 1.0) * r + 1.0)
    }

    /// Number of length-scale/metric gradient components this kernel
    /// reports (the encode order minus the magnitude term and minus every
    /// prior's own parameters).
    fn scale_component_count(&self) -> usize {
        match self.length_mode() {
            LengthMode::Isotropic(hp) => usize::from(hp.is_active()),
            LengthMode::Ard(hp) => {
                if hp.is_active() {
                    hp.value().len()
                } else {
                    0
                }
            }
            LengthMode::ExternalMetric(metric) => metric.n_params(),
        }
    }

    /// Gradient of `trcov(x)` per active hyperparameter: one symmetric
    /// sparse matrix per component, in encode order.
    pub fn training_gradient(
        &self,
        x: ArrayView2<f64>,
    ) -> Result<Vec<SparseColMat<usize, f64>>, CovarianceError> {
        self.validate_input(x)?;

        let mut out = Vec::new();
        if self.magnitude.is_active() {
            // k is linear in magnitude, so dK/d log(magnitude) = K.
            out.push(self.trcov(x)?);
        }

        let n_scale = self.scale_component_count();
        if n_scale == 0 {
            return Ok(out);
        }

        let n = x.nrows();
        let dims = self.used_dims();
        let mut accs: Vec<TripletAccumulator> =
            (0..n_scale).map(|_| TripletAccumulator::new(n, n)).collect();

        for i in 1..n {
            for j in 0..i {
                let r = self.pair_distance(&dims, x.row(i), x.row(j));
                if r >= 1.0 || r == 0.0 {
                    continue;
                }
                self.push_scale_components(&mut accs, i, j, r, x, x, &dims, true);
            }
        }

        for acc in accs {
            out.push(acc.build()?);
        }
        Ok(out)
    }

    /// Gradient of `cov(x, x2)` per active hyperparameter, over the
    /// asymmetric pair set.
    pub fn cross_gradient(
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

        let mut out = Vec::new();
        if self.magnitude.is_active() {
            out.push(self.cov(x, x2)?);
        }

        let n_scale = self.scale_component_count();
        if n_scale == 0 {
            return Ok(out);
        }

        let dims = self.used_dims();
        let mut accs: Vec<TripletAccumulator> = (0..n_scale)
            .map(|_| TripletAccumulator::new(x.nrows(), x2.nrows()))
            .collect();

        for i in 0..x.nrows() {
            for j in 0..x2.nrows() {
                let r = self.pair_distance(&dims, x.row(i), x2.row(j));
                if r >= 1.0 || r == 0.0 {
                    continue;
                }
                self.push_scale_components(&mut accs, i, j, r, x, x2, &dims, false);
            }
        }

        for acc in accs {
            out.push(acc.build()?);
        }
        Ok(out)
    }

    /// Gradient of the diagonal alone. The magnitude term is `trvar(x)`;
    /// every length-scale/metric component is identically zero because the
    /// diagonal does not depend on length scales. The metric case reports
    /// `n_params` zero vectors so component counts always match the codec.
    pub fn diagonal_gradient(
        &self,
        x: ArrayView2<f64>,
    ) -> Result<Vec<Array1<f64>>, CovarianceError> {
        self.validate_input(x)?;

        let mut out = Vec::new();
        if self.magnitude.is_active() {
            out.push(self.trvar(x)?);
        }
        for _ in 0..self.scale_component_count() {
            out.push(Array1::zeros(x.nrows()));
        }
        Ok(out)
    }

    /// Evaluate every length-scale/metric component for one retained pair
    /// and append it to the per-component accumulators. `r` is nonzero and
    /// inside the support.
    #[allow(clippy::too_many_arguments)]
    fn push_scale_components(
        &self,
        accs: &mut [TripletAccumulator],
        i: usize,
        j: usize,
        r: f64,
        x1: ArrayView2<f64>,
        x2: ArrayView2<f64>,
        dims: &[usize],
        symmetric: bool,
    ) {
        let push = |acc: &mut TripletAccumulator, value: f64| {
            if symmetric {
                acc.push_symmetric(i, j, value);
            } else {
                acc.push(i, j, value);
            }
        };

        match self.length_mode() {
            LengthMode::Isotropic(_) => {
                push(&mut accs[0], self.scale_gradient_factor(r) * r * r);
            }
            LengthMode::Ard(_) => {
                let factor = self.scale_gradient_factor(r);
                for (pos, &d) in dims.iter().enumerate() {
                    let scale = self.scale_at(pos);
                    let diff = x1[[i, d]] - x2[[j, d]];
                    push(&mut accs[pos], factor * diff * diff / (scale * scale));
                }
            }
            LengthMode::ExternalMetric(metric) => {
                let dkdr = self.radial_derivative(r);
                let dr = metric.distance_gradient(x1.row(i), x2.row(j));
                for (p, &g) in dr.iter().enumerate() {
                    push(&mut accs[p], dkdr * g);
                }
            }
        }
    }
}
