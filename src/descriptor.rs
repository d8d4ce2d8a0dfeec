//! Kernel descriptor: state, construction, parameter codec, prior
//! evaluation, and the sampling-history recorder.
//!
//! [`Ppcs2`] is the compactly-supported piecewise-polynomial covariance
//! function of smoothness order q=2. Its state is resolved once at
//! construction into explicit tagged variants ([`Hyperparameter`],
//! [`LengthMode`]); evaluation entry points treat the descriptor as
//! read-only, and `decode` is the only operation that rewrites
//! hyperparameter values afterwards.

use std::fmt;
use std::sync::Arc;

use ndarray::{array, Array1};

use crate::covfn::{CovarianceError, CovarianceFunction, ParameterTrace};
use crate::evaluate::DenseTrainingCov;
use crate::metric::Metric;
use crate::prior::{FlatPrior, Prior};

/// A hyperparameter is either active (sampled/optimized, with a prior) or
/// frozen at its current value (excluded from the packed vector and from
/// every gradient).
#[derive(Clone)]
pub enum Hyperparameter<T> {
    Active { value: T, prior: Arc<dyn Prior> },
    Frozen(T),
}

impl<T> Hyperparameter<T> {
    pub fn value(&self) -> &T {
        match self {
            Hyperparameter::Active { value, .. } => value,
            Hyperparameter::Frozen(value) => value,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Hyperparameter::Active { .. })
    }

    pub fn prior(&self) -> Option<&Arc<dyn Prior>> {
        match self {
            Hyperparameter::Active { prior, .. } => Some(prior),
            Hyperparameter::Frozen(_) => None,
        }
    }
}

/// How the kernel turns coordinate differences into a scaled distance.
///
/// Exactly one variant is populated for the descriptor's whole lifetime
/// (until an explicit reconfiguration switches it): the kernel either owns
/// its length scale(s) or delegates distance entirely to an external
/// metric.
#[derive(Clone)]
pub enum LengthMode {
    /// One shared positive length scale for every used coordinate.
    Isotropic(Hyperparameter<f64>),
    /// One positive length scale per used coordinate (ARD).
    Ard(Hyperparameter<Array1<f64>>),
    /// An external metric owns distance computation and its parameters.
    ExternalMetric(Arc<dyn Metric>),
}

/// Length-scale initialization for construction and reconfiguration.
#[derive(Clone, Debug)]
pub enum LengthScaleSpec {
    Scalar(f64),
    Vector(Array1<f64>),
}

/// Prior assignment for one hyperparameter in a [`Ppcs2Spec`].
#[derive(Clone, Default)]
pub enum PriorSpec {
    /// Keep the current prior (or the default on fresh construction).
    #[default]
    Keep,
    /// Freeze the hyperparameter: no prior, excluded from the codec.
    Freeze,
    /// Attach the given prior, activating the hyperparameter.
    Use(Arc<dyn Prior>),
}

impl PriorSpec {
    fn apply<T>(&self, current: Hyperparameter<T>) -> Hyperparameter<T> {
        match self {
            PriorSpec::Keep => current,
            PriorSpec::Freeze => Hyperparameter::Frozen(take_value(current)),
            PriorSpec::Use(prior) => Hyperparameter::Active {
                value: take_value(current),
                prior: Arc::clone(prior),
            },
        }
    }
}

fn take_value<T>(hp: Hyperparameter<T>) -> T {
    match hp {
        Hyperparameter::Active { value, .. } => value,
        Hyperparameter::Frozen(value) => value,
    }
}

/// Named options driving both fresh construction ([`Ppcs2::new`]) and
/// modification ([`Ppcs2::reconfigure`]). Unset fields keep their current
/// (or default) values.
#[derive(Clone, Default)]
pub struct Ppcs2Spec {
    /// Number of input coordinates. Required on fresh construction.
    pub input_dim: Option<usize>,
    /// Polynomial smoothness order l; must satisfy `l >= input_dim`.
    /// Defaults to `input_dim / 2 + 3`.
    pub order: Option<usize>,
    /// Overall variance scale, strictly positive. Defaults to 0.1.
    pub magnitude: Option<f64>,
    /// Length-scale initialization. Attaching this while a metric is
    /// configured in the same spec is an error; given alone on a
    /// metric-attached kernel it detaches the metric.
    pub length_scale: Option<LengthScaleSpec>,
    pub magnitude_prior: PriorSpec,
    pub length_scale_prior: PriorSpec,
    /// Attach an external metric; drops the kernel's own length-scale
    /// state (migrate values by building the metric from
    /// [`Ppcs2::ard_scales`] first).
    pub metric: Option<Arc<dyn Metric>>,
    /// Restrict distance computation to this subset of coordinate indices.
    pub selected_variables: Option<Vec<usize>>,
    /// Optional accelerated dense training-covariance routine.
    pub dense_accel: Option<Arc<dyn DenseTrainingCov>>,
}

/// Compactly-supported piecewise-polynomial covariance function, q=2.
///
/// For scaled distance `r < 1` and `cs = 1 - r`:
///
/// ```text
/// k(r) = magnitude * cs^(l+2) * ((l^2+4l+3) r^2 + (3l+6) r + 3) / 3
/// ```
///
/// and exactly zero for `r >= 1`.
#[derive(Clone)]
pub struct Ppcs2 {
    pub(crate) input_dim: usize,
    pub(crate) order: usize,
    pub(crate) magnitude: Hyperparameter<f64>,
    pub(crate) length: LengthMode,
    pub(crate) selected: Option<Vec<usize>>,
    pub(crate) accel: Option<Arc<dyn DenseTrainingCov>>,
}

impl fmt::Debug for Ppcs2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match &self.length {
            LengthMode::Isotropic(hp) => format!("isotropic({})", hp.value()),
            LengthMode::Ard(hp) => format!("ard({:?})", hp.value().to_vec()),
            LengthMode::ExternalMetric(m) => format!("metric(dim={})", m.input_dim()),
        };
        f.debug_struct("Ppcs2")
            .field("input_dim", &self.input_dim)
            .field("order", &self.order)
            .field("magnitude", self.magnitude.value())
            .field("length", &mode)
            .field("selected", &self.selected)
            .finish()
    }
}

impl Ppcs2 {
    /// Build a fresh descriptor from named options.
    pub fn new(spec: Ppcs2Spec) -> Result<Self, CovarianceError> {
        let input_dim = match spec.input_dim {
            Some(dim) if dim > 0 => dim,
            _ => return Err(CovarianceError::MissingInputDimension),
        };

        let selected = validate_selected(spec.selected_variables.clone(), input_dim)?;
        let used = selected.as_ref().map_or(input_dim, Vec::len);

        let order = spec.order.unwrap_or(input_dim / 2 + 3);
        if order < input_dim {
            return Err(CovarianceError::OrderBelowInputDimension { order, input_dim });
        }

        let magnitude_value = spec.magnitude.unwrap_or(0.1);
        check_positive("magnitude", magnitude_value)?;
        let magnitude = spec.magnitude_prior.apply(Hyperparameter::Active {
            value: magnitude_value,
            prior: Arc::new(FlatPrior),
        });

        let length = if let Some(metric) = spec.metric {
            if spec.length_scale.is_some() {
                return Err(CovarianceError::ConflictingLengthConfiguration);
            }
            LengthMode::ExternalMetric(metric)
        } else {
            build_scaled_mode(
                spec.length_scale.unwrap_or(LengthScaleSpec::Scalar(1.0)),
                &spec.length_scale_prior,
                used,
                None,
            )?
        };

        Ok(Self {
            input_dim,
            order,
            magnitude,
            length,
            selected,
            accel: spec.dense_accel,
        })
    }

    /// Apply named overrides to an existing descriptor, re-validating the
    /// result. The original is untouched; the returned descriptor is the
    /// modified kernel.
    pub fn reconfigure(&self, spec: Ppcs2Spec) -> Result<Self, CovarianceError> {
        let input_dim = match spec.input_dim {
            None => self.input_dim,
            Some(dim) if dim > 0 => dim,
            Some(_) => return Err(CovarianceError::MissingInputDimension),
        };

        let selected = match spec.selected_variables {
            Some(indices) => validate_selected(Some(indices), input_dim)?,
            None => {
                let kept = self.selected.clone();
                validate_selected(kept, input_dim)?
            }
        };
        let used = selected.as_ref().map_or(input_dim, Vec::len);

        let order = spec.order.unwrap_or(self.order);
        if order < input_dim {
            return Err(CovarianceError::OrderBelowInputDimension { order, input_dim });
        }

        let magnitude_value = spec.magnitude.unwrap_or(*self.magnitude.value());
        check_positive("magnitude", magnitude_value)?;
        let magnitude = spec.magnitude_prior.apply(match &self.magnitude {
            Hyperparameter::Active { prior, .. } => Hyperparameter::Active {
                value: magnitude_value,
                prior: Arc::clone(prior),
            },
            Hyperparameter::Frozen(_) => Hyperparameter::Frozen(magnitude_value),
        });

        let length = match (spec.metric, spec.length_scale) {
            (Some(_), Some(_)) => return Err(CovarianceError::ConflictingLengthConfiguration),
            // Attach: the metric owns length-scale state from here on.
            (Some(metric), None) => LengthMode::ExternalMetric(metric),
            // Detach or re-initialize from an explicit length scale.
            (None, Some(ls)) => {
                let carried = match &self.length {
                    LengthMode::Isotropic(hp) => hp.prior().cloned(),
                    LengthMode::Ard(hp) => hp.prior().cloned(),
                    LengthMode::ExternalMetric(_) => None,
                };
                build_scaled_mode(ls, &spec.length_scale_prior, used, carried)?
            }
            (None, None) => match &self.length {
                LengthMode::ExternalMetric(metric) => {
                    LengthMode::ExternalMetric(Arc::clone(metric))
                }
                LengthMode::Isotropic(hp) => {
                    LengthMode::Isotropic(spec.length_scale_prior.apply(hp.clone()))
                }
                LengthMode::Ard(hp) => {
                    let hp = spec.length_scale_prior.apply(hp.clone());
                    if hp.value().len() != used {
                        return Err(CovarianceError::LengthScaleDimensionMismatch {
                            expected: used,
                            found: hp.value().len(),
                        });
                    }
                    LengthMode::Ard(hp)
                }
            },
        };

        Ok(Self {
            input_dim,
            order,
            magnitude,
            length,
            selected,
            accel: spec.dense_accel.or_else(|| self.accel.clone()),
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn magnitude(&self) -> f64 {
        *self.magnitude.value()
    }

    pub fn length_mode(&self) -> &LengthMode {
        &self.length
    }

    pub fn selected_variables(&self) -> Option<&[usize]> {
        self.selected.as_deref()
    }

    /// The current length scales as a per-used-coordinate vector, or
    /// `None` when a metric owns them. Handy for migrating values into a
    /// metric before attaching it.
    pub fn ard_scales(&self) -> Option<Array1<f64>> {
        match &self.length {
            LengthMode::Isotropic(hp) => {
                Some(Array1::from_elem(self.used_dims().len(), *hp.value()))
            }
            LengthMode::Ard(hp) => Some(hp.value().clone()),
            LengthMode::ExternalMetric(_) => None,
        }
    }

    /// Column count evaluation inputs must have.
    pub(crate) fn expected_input_dim(&self) -> usize {
        match &self.length {
            LengthMode::ExternalMetric(metric) => metric.input_dim(),
            _ => self.input_dim,
        }
    }

    /// Coordinate indices that participate in distance computation.
    pub(crate) fn used_dims(&self) -> Vec<usize> {
        match &self.selected {
            Some(indices) => indices.clone(),
            None => (0..self.input_dim).collect(),
        }
    }

    /// Length scale for the used coordinate at position `pos` (positions
    /// index the `used_dims` list). Only meaningful in the scaled modes.
    pub(crate) fn scale_at(&self, pos: usize) -> f64 {
        match &self.length {
            LengthMode::Isotropic(hp) => *hp.value(),
            LengthMode::Ard(hp) => hp.value()[pos],
            LengthMode::ExternalMetric(_) => unreachable!("metric mode has no kernel-owned scales"),
        }
    }
}

fn check_positive(name: &'static str, value: f64) -> Result<(), CovarianceError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(CovarianceError::NonPositiveHyperparameter { name, value })
    }
}

fn validate_selected(
    selected: Option<Vec<usize>>,
    input_dim: usize,
) -> Result<Option<Vec<usize>>, CovarianceError> {
    if let Some(indices) = &selected {
        for &index in indices {
            if index >= input_dim {
                return Err(CovarianceError::SelectedVariableOutOfRange { index, input_dim });
            }
        }
    }
    Ok(selected)
}

fn build_scaled_mode(
    ls: LengthScaleSpec,
    prior_spec: &PriorSpec,
    used: usize,
    carried_prior: Option<Arc<dyn Prior>>,
) -> Result<LengthMode, CovarianceError> {
    let default_prior = || carried_prior.clone().unwrap_or_else(|| Arc::new(FlatPrior));
    match ls {
        LengthScaleSpec::Scalar(value) => {
            check_positive("length_scale", value)?;
            Ok(LengthMode::Isotropic(prior_spec.apply(
                Hyperparameter::Active {
                    value,
                    prior: default_prior(),
                },
            )))
        }
        LengthScaleSpec::Vector(values) => {
            if values.len() != used {
                return Err(CovarianceError::LengthScaleDimensionMismatch {
                    expected: used,
                    found: values.len(),
                });
            }
            for &value in values.iter() {
                check_positive("length_scale", value)?;
            }
            Ok(LengthMode::Ard(prior_spec.apply(Hyperparameter::Active {
                value: values,
                prior: default_prior(),
            })))
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter codec, prior evaluation, history recording
// ---------------------------------------------------------------------------

impl Ppcs2 {
    fn encode_into(&self, values: &mut Vec<f64>, names: &mut Vec<String>) {
        if let Hyperparameter::Active { value, prior } = &self.magnitude {
            values.push(value.ln());
            names.push("log(magnitude)".to_string());
            let (pv, pn) = prior.encode();
            values.extend(pv);
            names.extend(pn);
        }
        match &self.length {
            LengthMode::ExternalMetric(metric) => {
                let (mv, mn) = metric.encode();
                values.extend(mv);
                names.extend(mn);
            }
            LengthMode::Isotropic(Hyperparameter::Active { value, prior }) => {
                values.push(value.ln());
                names.push("log(length_scale)".to_string());
                let (pv, pn) = prior.encode();
                values.extend(pv);
                names.extend(pn);
            }
            LengthMode::Ard(Hyperparameter::Active { value, prior }) => {
                for (d, &scale) in value.iter().enumerate() {
                    values.push(scale.ln());
                    names.push(format!("log(length_scale[{d}])"));
                }
                let (pv, pn) = prior.encode();
                values.extend(pv);
                names.extend(pn);
            }
            LengthMode::Isotropic(Hyperparameter::Frozen(_))
            | LengthMode::Ard(Hyperparameter::Frozen(_)) => {}
        }
    }

    fn decode_in_place(&mut self, params: &[f64]) -> Result<usize, CovarianceError> {
        let mut offset = 0usize;

        if let Hyperparameter::Active { value, prior } = &mut self.magnitude {
            let slot = params.get(offset).copied().ok_or(
                CovarianceError::ParameterVectorTooShort {
                    name: "magnitude",
                    needed: 1,
                    remaining: params.len() - offset,
                },
            )?;
            *value = slot.exp();
            offset += 1;
            let (new_prior, used) = prior.decode(&params[offset..])?;
            *prior = new_prior;
            offset += used;
        }

        match &mut self.length {
            LengthMode::ExternalMetric(metric) => {
                let (new_metric, used) = metric.decode(&params[offset..])?;
                *metric = new_metric;
                offset += used;
            }
            LengthMode::Isotropic(Hyperparameter::Active { value, prior }) => {
                let slot = params.get(offset).copied().ok_or(
                    CovarianceError::ParameterVectorTooShort {
                        name: "length_scale",
                        needed: 1,
                        remaining: params.len() - offset,
                    },
                )?;
                *value = slot.exp();
                offset += 1;
                let (new_prior, used) = prior.decode(&params[offset..])?;
                *prior = new_prior;
                offset += used;
            }
            LengthMode::Ard(Hyperparameter::Active { value, prior }) => {
                let n = value.len();
                if params.len() - offset < n {
                    return Err(CovarianceError::ParameterVectorTooShort {
                        name: "length_scale",
                        needed: n,
                        remaining: params.len() - offset,
                    });
                }
                for d in 0..n {
                    value[d] = params[offset + d].exp();
                }
                offset += n;
                let (new_prior, used) = prior.decode(&params[offset..])?;
                *prior = new_prior;
                offset += used;
            }
            LengthMode::Isotropic(Hyperparameter::Frozen(_))
            | LengthMode::Ard(Hyperparameter::Frozen(_)) => {}
        }

        Ok(offset)
    }

    fn log_prior_value(&self) -> f64 {
        let mut lp = 0.0;
        if let Hyperparameter::Active { value, prior } = &self.magnitude {
            // Density in the log coordinate: add the Jacobian ln(value).
            lp += prior.log_density(array![*value].view()) + value.ln();
        }
        match &self.length {
            LengthMode::ExternalMetric(metric) => lp += metric.log_prior(),
            LengthMode::Isotropic(Hyperparameter::Active { value, prior }) => {
                lp += prior.log_density(array![*value].view()) + value.ln();
            }
            LengthMode::Ard(Hyperparameter::Active { value, prior }) => {
                lp += prior.log_density(value.view()) + value.mapv(f64::ln).sum();
            }
            LengthMode::Isotropic(Hyperparameter::Frozen(_))
            | LengthMode::Ard(Hyperparameter::Frozen(_)) => {}
        }
        lp
    }

    fn log_prior_gradient_vec(&self) -> Vec<f64> {
        let mut grad = Vec::new();
        if let Hyperparameter::Active { value, prior } = &self.magnitude {
            let v = array![*value];
            let dlp = prior.log_density_gradient(v.view());
            // Chain rule for θ = log(v): d/dθ = v * dlogp/dv + 1.
            grad.push(value * dlp[0] + 1.0);
            grad.extend(prior.own_parameter_gradient(v.view()));
        }
        match &self.length {
            LengthMode::ExternalMetric(metric) => grad.extend(metric.log_prior_gradient()),
            LengthMode::Isotropic(Hyperparameter::Active { value, prior }) => {
                let v = array![*value];
                let dlp = prior.log_density_gradient(v.view());
                grad.push(value * dlp[0] + 1.0);
                grad.extend(prior.own_parameter_gradient(v.view()));
            }
            LengthMode::Ard(Hyperparameter::Active { value, prior }) => {
                let dlp = prior.log_density_gradient(value.view());
                for (v, g) in value.iter().zip(dlp.iter()) {
                    grad.push(v * g + 1.0);
                }
                grad.extend(prior.own_parameter_gradient(value.view()));
            }
            LengthMode::Isotropic(Hyperparameter::Frozen(_))
            | LengthMode::Ard(Hyperparameter::Frozen(_)) => {}
        }
        grad
    }

    fn init_trace_for(&self) -> ParameterTrace {
        let metric_owned = matches!(self.length, LengthMode::ExternalMetric(_));
        ParameterTrace {
            magnitude: Vec::new(),
            length_scale: if metric_owned { None } else { Some(Vec::new()) },
            magnitude_prior: Default::default(),
            length_scale_prior: Default::default(),
            metric: if metric_owned {
                Some(Default::default())
            } else {
                None
            },
        }
    }

    fn append_history_row(
        &self,
        trace: &mut ParameterTrace,
        iter: usize,
    ) -> Result<(), CovarianceError> {
        if iter != trace.len() {
            return Err(CovarianceError::TraceIndexMismatch {
                expected: trace.len(),
                got: iter,
            });
        }

        trace.magnitude.push(*self.magnitude.value());
        match self.magnitude.prior() {
            Some(prior) => prior.append_history(&mut trace.magnitude_prior),
            None => trace.magnitude_prior.push(Vec::new()),
        }

        match &self.length {
            LengthMode::ExternalMetric(metric) => {
                if let Some(metric_trace) = trace.metric.as_mut() {
                    metric.append_history(metric_trace);
                }
                trace.length_scale_prior.push(Vec::new());
            }
            LengthMode::Isotropic(hp) => {
                if let Some(rows) = trace.length_scale.as_mut() {
                    rows.push(array![*hp.value()]);
                }
                match hp.prior() {
                    Some(prior) => prior.append_history(&mut trace.length_scale_prior),
                    None => trace.length_scale_prior.push(Vec::new()),
                }
            }
            LengthMode::Ard(hp) => {
                if let Some(rows) = trace.length_scale.as_mut() {
                    rows.push(hp.value().clone());
                }
                match hp.prior() {
                    Some(prior) => prior.append_history(&mut trace.length_scale_prior),
                    None => trace.length_scale_prior.push(Vec::new()),
                }
            }
        }
        Ok(())
    }
}

impl CovarianceFunction for Ppcs2 {
    fn encode(&self) -> (Vec<f64>, Vec<String>) {
        let mut values = Vec::new();
        let mut names = Vec::new();
        self.encode_into(&mut values, &mut names);
        (values, names)
    }

    fn decode(&mut self, params: &[f64]) -> Result<usize, CovarianceError> {
        self.decode_in_place(params)
    }

    fn log_prior(&self) -> f64 {
        self.log_prior_value()
    }

    fn log_prior_gradient(&self) -> Vec<f64> {
        self.log_prior_gradient_vec()
    }

    fn cov(
        &self,
        x1: ndarray::ArrayView2<f64>,
        x2: ndarray::ArrayView2<f64>,
    ) -> Result<faer::sparse::SparseColMat<usize, f64>, CovarianceError> {
        Ppcs2::cov(self, x1, x2)
    }

    fn trcov(
        &self,
        x: ndarray::ArrayView2<f64>,
    ) -> Result<faer::sparse::SparseColMat<usize, f64>, CovarianceError> {
        Ppcs2::trcov(self, x)
    }

    fn trvar(&self, x: ndarray::ArrayView2<f64>) -> Result<Array1<f64>, CovarianceError> {
        Ppcs2::trvar(self, x)
    }

    fn training_gradient(
        &self,
        x: ndarray::ArrayView2<f64>,
    ) -> Result<Vec<faer::sparse::SparseColMat<usize, f64>>, CovarianceError> {
        Ppcs2::training_gradient(self, x)
    }

    fn cross_gradient(
        &self,
        x: ndarray::ArrayView2<f64>,
        x2: ndarray::ArrayView2<f64>,
    ) -> Result<Vec<faer::sparse::SparseColMat<usize, f64>>, CovarianceError> {
        Ppcs2::cross_gradient(self, x, x2)
    }

    fn diagonal_gradient(
        &self,
        x: ndarray::ArrayView2<f64>,
    ) -> Result<Vec<Array1<f64>>, CovarianceError> {
        Ppcs2::diagonal_gradient(self, x)
    }

    fn input_gradient_training(
        &self,
        x: ndarray::ArrayView2<f64>,
    ) -> Result<Vec<faer::sparse::SparseColMat<usize, f64>>, CovarianceError> {
        Ppcs2::input_gradient_training(self, x)
    }

    fn input_gradient_cross(
        &self,
        x: ndarray::ArrayView2<f64>,
        x2: ndarray::ArrayView2<f64>,
    ) -> Result<Vec<faer::sparse::SparseColMat<usize, f64>>, CovarianceError> {
        Ppcs2::input_gradient_cross(self, x, x2)
    }

    fn init_trace(&self) -> ParameterTrace {
        self.init_trace_for()
    }

    fn append_history(
        &self,
        trace: &mut ParameterTrace,
        iter: usize,
    ) -> Result<(), CovarianceError> {
        self.append_history_row(trace, iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn basic_spec(input_dim: usize) -> Ppcs2Spec {
        Ppcs2Spec {
            input_dim: Some(input_dim),
            ..Default::default()
        }
    }

    #[test]
    fn default_order_is_half_dim_plus_three() {
        let kernel = Ppcs2::new(basic_spec(2)).expect("construction should succeed");
        assert_eq!(kernel.order(), 4);
        let kernel = Ppcs2::new(basic_spec(5)).expect("construction should succeed");
        assert_eq!(kernel.order(), 5);
    }

    #[test]
    fn missing_input_dim_is_fatal() {
        let err = Ppcs2::new(Ppcs2Spec::default()).unwrap_err();
        assert!(matches!(err, CovarianceError::MissingInputDimension));
    }

    #[test]
    fn order_below_input_dim_is_fatal() {
        let spec = Ppcs2Spec {
            input_dim: Some(3),
            order: Some(2),
            ..Default::default()
        };
        let err = Ppcs2::new(spec).unwrap_err();
        assert!(matches!(
            err,
            CovarianceError::OrderBelowInputDimension {
                order: 2,
                input_dim: 3
            }
        ));
    }

    #[test]
    fn ard_length_scale_must_match_used_dims() {
        let spec = Ppcs2Spec {
            input_dim: Some(3),
            length_scale: Some(LengthScaleSpec::Vector(array![1.0, 2.0])),
            ..Default::default()
        };
        let err = Ppcs2::new(spec).unwrap_err();
        assert!(matches!(
            err,
            CovarianceError::LengthScaleDimensionMismatch {
                expected: 3,
                found: 2
            }
        ));

        // With a selected subset the vector is sized to the subset.
        let spec = Ppcs2Spec {
            input_dim: Some(3),
            length_scale: Some(LengthScaleSpec::Vector(array![1.0, 2.0])),
            selected_variables: Some(vec![0, 2]),
            ..Default::default()
        };
        Ppcs2::new(spec).expect("subset-sized ARD vector should validate");
    }

    #[test]
    fn selected_variable_out_of_range_is_fatal() {
        let spec = Ppcs2Spec {
            input_dim: Some(2),
            selected_variables: Some(vec![0, 2]),
            ..Default::default()
        };
        let err = Ppcs2::new(spec).unwrap_err();
        assert!(matches!(
            err,
            CovarianceError::SelectedVariableOutOfRange {
                index: 2,
                input_dim: 2
            }
        ));
    }

    #[test]
    fn reconfigure_preserves_untouched_fields() {
        let kernel = Ppcs2::new(Ppcs2Spec {
            input_dim: Some(2),
            magnitude: Some(0.7),
            length_scale: Some(LengthScaleSpec::Vector(array![1.0, 2.0])),
            ..Default::default()
        })
        .expect("construction should succeed");

        let modified = kernel
            .reconfigure(Ppcs2Spec {
                magnitude: Some(1.4),
                ..Default::default()
            })
            .expect("reconfigure should succeed");

        assert_abs_diff_eq!(modified.magnitude(), 1.4);
        assert_eq!(modified.ard_scales().expect("scaled mode"), array![1.0, 2.0]);
        assert_eq!(modified.order(), kernel.order());
    }

    #[test]
    fn freezing_removes_parameters_from_codec() {
        let kernel = Ppcs2::new(Ppcs2Spec {
            input_dim: Some(1),
            magnitude_prior: PriorSpec::Freeze,
            ..Default::default()
        })
        .expect("construction should succeed");
        let (values, names) = kernel.encode();
        assert_eq!(names, vec!["log(length_scale)".to_string()]);
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn decode_round_trips_and_reports_consumption() {
        let mut kernel = Ppcs2::new(Ppcs2Spec {
            input_dim: Some(2),
            magnitude: Some(0.25),
            length_scale: Some(LengthScaleSpec::Vector(array![0.5, 3.0])),
            ..Default::default()
        })
        .expect("construction should succeed");

        let (mut values, _) = kernel.encode();
        assert_eq!(values.len(), 3);
        // Extra trailing entries belong to the next kernel in a chain.
        values.push(99.0);
        let used = kernel.decode(&values).expect("decode should succeed");
        assert_eq!(used, 3);
        assert_abs_diff_eq!(kernel.magnitude(), 0.25, epsilon = 1e-14);
        let scales = kernel.ard_scales().expect("scaled mode");
        assert_abs_diff_eq!(scales[0], 0.5, epsilon = 1e-14);
        assert_abs_diff_eq!(scales[1], 3.0, epsilon = 1e-14);
    }

    #[test]
    fn decode_rejects_short_vector() {
        let mut kernel = Ppcs2::new(basic_spec(2)).expect("construction should succeed");
        let err = kernel.decode(&[0.0]).unwrap_err();
        assert!(matches!(
            err,
            CovarianceError::ParameterVectorTooShort { name: "length_scale", .. }
        ));
    }
}
