//! Distance-metric contract for kernels that delegate their length-scale
//! handling to an external metric object.
//!
//! The contract is per-pair rather than per-matrix so that a
//! compactly-supported kernel can keep its sparse neighbor scan: the
//! kernel asks for one distance at a time and only retains pairs inside
//! the support radius. A metric owns its own parameters, priors, and
//! trace; the kernel only supplies the outer chain-rule factor ∂k/∂r.

use std::sync::Arc;

use ndarray::{Array1, ArrayView1};

use crate::covfn::{CovarianceError, MetricTrace};
use crate::prior::Prior;

/// Capability contract for an external distance metric.
///
/// Metrics are immutable shared values (`Arc<dyn Metric>`); `decode`
/// returns a fresh handle. `distance_gradient` is expressed with respect
/// to the metric's *transformed* parameters, in the order `encode` emits
/// them, so the kernel can multiply it directly by ∂k/∂r.
pub trait Metric: Send + Sync {
    /// Number of input coordinates the metric consumes.
    fn input_dim(&self) -> usize;

    /// Number of active (encoded) distance parameters, excluding any
    /// prior's own parameters.
    fn n_params(&self) -> usize;

    /// Scaled distance between one pair of points.
    fn distance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64;

    /// ∂r/∂θ for each active metric parameter θ (transformed coordinates),
    /// length [`Self::n_params`]. Zero-distance pairs must yield zeros.
    fn distance_gradient(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> Array1<f64>;

    /// ∂r/∂a_d for each coordinate of the first point, length
    /// [`Self::input_dim`]. Zero-distance pairs must yield zeros.
    fn input_gradient(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> Array1<f64>;

    /// Flatten the metric's active parameters (and its priors' own
    /// parameters) into a transformed vector plus labels.
    fn encode(&self) -> (Vec<f64>, Vec<String>);

    /// Rebuild the metric from a strict prefix of `params`, returning the
    /// new handle and the number of entries consumed.
    fn decode(&self, params: &[f64]) -> Result<(Arc<dyn Metric>, usize), CovarianceError>;

    /// Log prior density over the metric's active parameters, in the
    /// transformed coordinate (Jacobian included).
    fn log_prior(&self) -> f64;

    /// Gradient of [`Self::log_prior`] in encode order.
    fn log_prior_gradient(&self) -> Vec<f64>;

    /// Record the metric's current parameter state as one trace row.
    fn append_history(&self, trace: &mut MetricTrace);
}

/// Euclidean distance with one positive scale per coordinate.
///
/// Equivalent to a kernel's built-in ARD mode, which makes it the natural
/// vehicle for migrating length-scale state into a metric without losing
/// values: build it from the kernel's current scales, then attach it.
#[derive(Clone)]
pub struct ScaledEuclidean {
    scales: Array1<f64>,
    prior: Option<Arc<dyn Prior>>,
}

impl ScaledEuclidean {
    /// Build from per-coordinate scales; `prior` of `None` freezes them.
    pub fn new(
        scales: Array1<f64>,
        prior: Option<Arc<dyn Prior>>,
    ) -> Result<Self, CovarianceError> {
        for &s in scales.iter() {
            if !(s > 0.0) {
                return Err(CovarianceError::NonPositiveHyperparameter {
                    name: "metric.scale",
                    value: s,
                });
            }
        }
        Ok(Self { scales, prior })
    }

    pub fn scales(&self) -> &Array1<f64> {
        &self.scales
    }
}

impl Metric for ScaledEuclidean {
    fn input_dim(&self) -> usize {
        self.scales.len()
    }

    fn n_params(&self) -> usize {
        if self.prior.is_some() {
            self.scales.len()
        } else {
            0
        }
    }

    fn distance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        let mut r2 = 0.0;
        for d in 0..self.scales.len() {
            let diff = (a[d] - b[d]) / self.scales[d];
            r2 += diff * diff;
        }
        r2.sqrt()
    }

    fn distance_gradient(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> Array1<f64> {
        let n = self.n_params();
        let r = self.distance(a, b);
        let mut grad = Array1::zeros(n);
        if r == 0.0 || n == 0 {
            return grad;
        }
        // θ_d = log(scale_d): ∂r/∂θ_d = -Δ_d² / (scale_d² r)
        for d in 0..n {
            let diff = a[d] - b[d];
            grad[d] = -diff * diff / (self.scales[d] * self.scales[d] * r);
        }
        grad
    }

    fn input_gradient(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> Array1<f64> {
        let dim = self.scales.len();
        let r = self.distance(a, b);
        let mut grad = Array1::zeros(dim);
        if r == 0.0 {
            return grad;
        }
        for d in 0..dim {
            grad[d] = (a[d] - b[d]) / (self.scales[d] * self.scales[d] * r);
        }
        grad
    }

    fn encode(&self) -> (Vec<f64>, Vec<String>) {
        let mut values = Vec::new();
        let mut names = Vec::new();
        if let Some(prior) = &self.prior {
            for (d, &s) in self.scales.iter().enumerate() {
                values.push(s.ln());
                names.push(format!("log(metric.scale[{d}])"));
            }
            let (pv, pn) = prior.encode();
            values.extend(pv);
            names.extend(pn);
        }
        (values, names)
    }

    fn decode(&self, params: &[f64]) -> Result<(Arc<dyn Metric>, usize), CovarianceError> {
        let mut out = self.clone();
        let mut used = 0usize;
        if let Some(prior) = &self.prior {
            let n = self.scales.len();
            if params.len() < n {
                return Err(CovarianceError::ParameterVectorTooShort {
                    name: "metric.scale",
                    needed: n,
                    remaining: params.len(),
                });
            }
            for d in 0..n {
                out.scales[d] = params[d].exp();
            }
            used += n;
            let (new_prior, prior_used) = prior.decode(&params[used..])?;
            out.prior = Some(new_prior);
            used += prior_used;
        }
        Ok((Arc::new(out), used))
    }

    fn log_prior(&self) -> f64 {
        match &self.prior {
            Some(prior) => {
                prior.log_density(self.scales.view()) + self.scales.mapv(f64::ln).sum()
            }
            None => 0.0,
        }
    }

    fn log_prior_gradient(&self) -> Vec<f64> {
        let Some(prior) = &self.prior else {
            return Vec::new();
        };
        let dlp = prior.log_density_gradient(self.scales.view());
        let mut grad: Vec<f64> = self
            .scales
            .iter()
            .zip(dlp.iter())
            .map(|(&s, &g)| s * g + 1.0)
            .collect();
        grad.extend(prior.own_parameter_gradient(self.scales.view()));
        grad
    }

    fn append_history(&self, trace: &mut MetricTrace) {
        trace.push(self.scales.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prior::FlatPrior;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn distance_matches_scaled_euclidean_formula() {
        let metric = ScaledEuclidean::new(array![2.0, 0.5], None).expect("valid scales");
        let a = array![1.0, 1.0];
        let b = array![0.0, 0.0];
        let expected = (0.25_f64 + 4.0).sqrt();
        assert_abs_diff_eq!(
            metric.distance(a.view(), b.view()),
            expected,
            epsilon = 1e-14
        );
    }

    #[test]
    fn distance_gradient_matches_finite_difference() {
        let metric = ScaledEuclidean::new(array![1.3, 0.7], Some(Arc::new(FlatPrior)))
            .expect("valid scales");
        let a = array![0.4, -0.2];
        let b = array![0.1, 0.3];
        let grad = metric.distance_gradient(a.view(), b.view());
        let (encoded, _) = metric.encode();
        let eps = 1e-6;
        for d in 0..2 {
            let mut up = encoded.clone();
            let mut down = encoded.clone();
            up[d] += eps;
            down[d] -= eps;
            let (m_up, _) = metric.decode(&up).expect("decode");
            let (m_down, _) = metric.decode(&down).expect("decode");
            let fd = (m_up.distance(a.view(), b.view()) - m_down.distance(a.view(), b.view()))
                / (2.0 * eps);
            assert_abs_diff_eq!(grad[d], fd, epsilon = 1e-8);
        }
    }

    #[test]
    fn zero_distance_pair_has_zero_gradients() {
        let metric = ScaledEuclidean::new(array![1.0, 1.0], Some(Arc::new(FlatPrior)))
            .expect("valid scales");
        let a = array![0.5, 0.5];
        assert_eq!(metric.distance(a.view(), a.view()), 0.0);
        assert!(metric
            .distance_gradient(a.view(), a.view())
            .iter()
            .all(|&g| g == 0.0));
        assert!(metric
            .input_gradient(a.view(), a.view())
            .iter()
            .all(|&g| g == 0.0));
    }

    #[test]
    fn frozen_metric_encodes_nothing() {
        let metric = ScaledEuclidean::new(array![1.0, 2.0], None).expect("valid scales");
        assert_eq!(metric.n_params(), 0);
        assert!(metric.encode().0.is_empty());
        assert_eq!(metric.log_prior(), 0.0);
        assert!(metric.log_prior_gradient().is_empty());
    }
}
