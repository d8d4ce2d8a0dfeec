//! Covariance-function capability contract shared by every kernel family.
//!
//! A Gaussian-process framework treats kernels as interchangeable: anything
//! implementing [`CovarianceFunction`] can be packed into a flat parameter
//! vector, differentiated, evaluated over input sets, and recorded during
//! sampling. The concrete kernel family is selected once at construction
//! time; callers dispatch through this trait and never inspect fields.

use faer::sparse::SparseColMat;
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for covariance construction, evaluation, and codec operations.
#[derive(Error, Debug)]
pub enum CovarianceError {
    #[error("input dimension must be specified and positive for a fresh kernel")]
    MissingInputDimension,

    #[error(
        "piecewise-polynomial order ({order}) must be at least the input dimension ({input_dim})"
    )]
    OrderBelowInputDimension { order: usize, input_dim: usize },

    #[error("hyperparameter '{name}' must be strictly positive, but was {value}")]
    NonPositiveHyperparameter { name: &'static str, value: f64 },

    #[error(
        "length-scale vector has {found} entries but the kernel uses {expected} coordinate(s)"
    )]
    LengthScaleDimensionMismatch { expected: usize, found: usize },

    #[error("selected variable index {index} is out of range for {input_dim}-dimensional inputs")]
    SelectedVariableOutOfRange { index: usize, input_dim: usize },

    #[error("a length scale and an external metric cannot both be configured on one kernel")]
    ConflictingLengthConfiguration,

    #[error("input matrix has {found} column(s) but the kernel expects {expected}")]
    InputWidthMismatch { expected: usize, found: usize },

    #[error("input sets have mismatched column counts: {left} vs {right}")]
    InputDimensionMismatch { left: usize, right: usize },

    #[error(
        "parameter vector is too short: {needed} more entr(ies) needed for '{name}', {remaining} remaining"
    )]
    ParameterVectorTooShort {
        name: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("failed to assemble sparse covariance matrix: {0}")]
    SparseCreation(String),

    #[error("trace append expects iteration {expected} next, but was given {got}")]
    TraceIndexMismatch { expected: usize, got: usize },
}

/// Append-only trace of one prior's own parameters, one row per iteration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorTrace {
    pub rows: Vec<Vec<f64>>,
}

impl PriorTrace {
    pub fn push(&mut self, row: Vec<f64>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Append-only trace of an external metric's parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricTrace {
    pub rows: Vec<Vec<f64>>,
}

impl MetricTrace {
    pub fn push(&mut self, row: Vec<f64>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Per-iteration record of a kernel's sampled hyperparameter state.
///
/// Grows by exactly one row per [`CovarianceFunction::append_history`] call.
/// `length_scale` is `None` when an external metric owns the length-scale
/// parameters; the metric's own trace is kept in `metric` instead.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParameterTrace {
    pub magnitude: Vec<f64>,
    pub length_scale: Option<Vec<Array1<f64>>>,
    pub magnitude_prior: PriorTrace,
    pub length_scale_prior: PriorTrace,
    pub metric: Option<MetricTrace>,
}

impl ParameterTrace {
    /// Number of recorded iterations.
    pub fn len(&self) -> usize {
        self.magnitude.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitude.is_empty()
    }
}

/// The capability set a kernel family exposes to the GP framework.
///
/// All evaluation methods treat the kernel as read-only; `decode` is the
/// single entry point that rewrites hyperparameter values in place during
/// optimization or sampling. Structural fields never change after
/// construction.
pub trait CovarianceFunction: Send + Sync {
    /// Flatten the active (non-frozen) hyperparameters into a transformed
    /// vector, together with one label per component.
    fn encode(&self) -> (Vec<f64>, Vec<String>);

    /// Restore hyperparameter values from a strict prefix of `params`,
    /// undoing the encode transform. Returns the number of entries
    /// consumed so callers can chain several kernels' vectors.
    fn decode(&mut self, params: &[f64]) -> Result<usize, CovarianceError>;

    /// Log prior density over the active hyperparameters, expressed in the
    /// transformed (log) coordinate, i.e. including the Jacobian term.
    fn log_prior(&self) -> f64;

    /// Gradient of [`Self::log_prior`] in the same component order as
    /// [`Self::encode`].
    fn log_prior_gradient(&self) -> Vec<f64>;

    /// Sparse cross-covariance between two input sets.
    fn cov(
        &self,
        x1: ArrayView2<f64>,
        x2: ArrayView2<f64>,
    ) -> Result<SparseColMat<usize, f64>, CovarianceError>;

    /// Sparse symmetric training covariance of one input set with itself.
    fn trcov(&self, x: ArrayView2<f64>) -> Result<SparseColMat<usize, f64>, CovarianceError>;

    /// Training variance vector (the diagonal of `trcov`).
    fn trvar(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, CovarianceError>;

    /// Gradient of `trcov(x)` with respect to each active hyperparameter,
    /// one symmetric sparse matrix per component, in encode order
    /// (priors' own parameters excluded).
    fn training_gradient(
        &self,
        x: ArrayView2<f64>,
    ) -> Result<Vec<SparseColMat<usize, f64>>, CovarianceError>;

    /// Gradient of `cov(x, x2)` with respect to each active hyperparameter.
    fn cross_gradient(
        &self,
        x: ArrayView2<f64>,
        x2: ArrayView2<f64>,
    ) -> Result<Vec<SparseColMat<usize, f64>>, CovarianceError>;

    /// Gradient of `trvar(x)` with respect to each active hyperparameter,
    /// one vector per component.
    fn diagonal_gradient(&self, x: ArrayView2<f64>) -> Result<Vec<Array1<f64>>, CovarianceError>;

    /// Gradient of `trcov(x)` with respect to every input coordinate,
    /// ordered point-major: component `i * input_dim + d` differentiates
    /// with respect to coordinate `d` of point `i`.
    fn input_gradient_training(
        &self,
        x: ArrayView2<f64>,
    ) -> Result<Vec<SparseColMat<usize, f64>>, CovarianceError>;

    /// Gradient of `cov(x, x2)` with respect to the coordinates of `x`'s
    /// rows, same ordering as [`Self::input_gradient_training`].
    fn input_gradient_cross(
        &self,
        x: ArrayView2<f64>,
        x2: ArrayView2<f64>,
    ) -> Result<Vec<SparseColMat<usize, f64>>, CovarianceError>;

    /// Allocate an empty trace shaped to this kernel's hyperparameters.
    fn init_trace(&self) -> ParameterTrace;

    /// Record the current hyperparameter state as iteration `iter`.
    /// `iter` must equal the trace's current length (append-only).
    fn append_history(
        &self,
        trace: &mut ParameterTrace,
        iter: usize,
    ) -> Result<(), CovarianceError>;
}
