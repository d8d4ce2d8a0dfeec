//! Prior-distribution contract consumed by kernel hyperparameters.
//!
//! Priors are immutable values shared by reference (`Arc<dyn Prior>`):
//! several descriptors may hold the same prior, and `decode` produces a
//! fresh handle instead of mutating in place. A hyperparameter with no
//! prior attached is frozen — excluded from the packed vector and from
//! every gradient.
//!
//! The crate ships two stock implementations so a kernel is usable
//! standalone: [`FlatPrior`] (improper uniform) and [`GaussianPrior`].
//! Frameworks plug richer priors in through the same trait.

use std::sync::Arc;

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::covfn::{CovarianceError, PriorTrace};

/// Capability contract for a hyperparameter prior.
///
/// `log_density` and `log_density_gradient` are evaluated at the
/// *untransformed* hyperparameter value; the kernel applies the
/// log-transform Jacobian and chain rule itself.
pub trait Prior: Send + Sync {
    /// Log density at `value`, summed over elements for vector parameters.
    fn log_density(&self, value: ArrayView1<f64>) -> f64;

    /// Elementwise gradient of the log density with respect to `value`.
    fn log_density_gradient(&self, value: ArrayView1<f64>) -> Array1<f64>;

    /// Gradient of the log density with respect to the prior's *own*
    /// encoded parameters, in the order [`Self::encode`] emits them.
    /// Priors with no free parameters return an empty vector.
    fn own_parameter_gradient(&self, _value: ArrayView1<f64>) -> Vec<f64> {
        Vec::new()
    }

    /// The prior's own free parameters as a transformed vector plus labels.
    fn encode(&self) -> (Vec<f64>, Vec<String>) {
        (Vec::new(), Vec::new())
    }

    /// Rebuild the prior from a strict prefix of `params`, returning the
    /// new handle and the number of entries consumed.
    fn decode(&self, params: &[f64]) -> Result<(Arc<dyn Prior>, usize), CovarianceError>;

    /// Record the prior's own current parameters as one trace row.
    fn append_history(&self, trace: &mut PriorTrace);
}

/// Improper uniform prior: density contributes nothing, freezes nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatPrior;

impl Prior for FlatPrior {
    fn log_density(&self, _value: ArrayView1<f64>) -> f64 {
        0.0
    }

    fn log_density_gradient(&self, value: ArrayView1<f64>) -> Array1<f64> {
        Array1::zeros(value.len())
    }

    fn decode(&self, _params: &[f64]) -> Result<(Arc<dyn Prior>, usize), CovarianceError> {
        Ok((Arc::new(*self), 0))
    }

    fn append_history(&self, trace: &mut PriorTrace) {
        trace.push(Vec::new());
    }
}

/// Gaussian prior with fixed mean and standard deviation.
///
/// Both parameters are fixed (not part of the encoded vector); this is the
/// common case for weakly-informative hyperpriors on log-scale parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaussianPrior {
    pub mean: f64,
    pub sigma: f64,
}

impl GaussianPrior {
    pub fn new(mean: f64, sigma: f64) -> Self {
        Self { mean, sigma }
    }
}

impl Prior for GaussianPrior {
    fn log_density(&self, value: ArrayView1<f64>) -> f64 {
        let var = self.sigma * self.sigma;
        let norm = -0.5 * (2.0 * std::f64::consts::PI * var).ln();
        value
            .iter()
            .map(|&v| {
                let d = v - self.mean;
                norm - d * d / (2.0 * var)
            })
            .sum()
    }

    fn log_density_gradient(&self, value: ArrayView1<f64>) -> Array1<f64> {
        let var = self.sigma * self.sigma;
        value.mapv(|v| -(v - self.mean) / var)
    }

    fn decode(&self, _params: &[f64]) -> Result<(Arc<dyn Prior>, usize), CovarianceError> {
        Ok((Arc::new(*self), 0))
    }

    fn append_history(&self, trace: &mut PriorTrace) {
        trace.push(Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn gaussian_log_density_matches_closed_form() {
        let prior = GaussianPrior::new(0.0, 2.0);
        let value = array![1.0];
        let expected = -0.5 * (2.0 * std::f64::consts::PI * 4.0).ln() - 1.0 / 8.0;
        assert_abs_diff_eq!(prior.log_density(value.view()), expected, epsilon = 1e-14);
    }

    #[test]
    fn gaussian_gradient_matches_finite_difference() {
        let prior = GaussianPrior::new(0.5, 1.5);
        let value = array![1.2, -0.3];
        let grad = prior.log_density_gradient(value.view());
        let eps = 1e-6;
        for i in 0..value.len() {
            let mut up = value.clone();
            let mut down = value.clone();
            up[i] += eps;
            down[i] -= eps;
            let fd = (prior.log_density(up.view()) - prior.log_density(down.view())) / (2.0 * eps);
            assert_abs_diff_eq!(grad[i], fd, epsilon = 1e-8);
        }
    }

    #[test]
    fn flat_prior_contributes_nothing() {
        let prior = FlatPrior;
        let value = array![3.0, 4.0];
        assert_eq!(prior.log_density(value.view()), 0.0);
        assert_eq!(prior.log_density_gradient(value.view()), array![0.0, 0.0]);
        assert!(prior.encode().0.is_empty());
    }
}
