//! `ppcov` — compactly-supported piecewise-polynomial (q=2) covariance
//! function for Gaussian-process frameworks.
//!
//! The kernel vanishes once the scaled distance between two inputs
//! reaches 1, so covariance matrices are assembled directly in sparse
//! form from a neighbor scan, never through a dense n×n intermediate.
//! Alongside evaluation ([`Ppcs2::cov`], [`Ppcs2::trcov`],
//! [`Ppcs2::trvar`]) the crate provides exact analytic gradients of the
//! sparse covariance with respect to every free hyperparameter
//! (magnitude, length scales or an injected metric) and with respect to
//! the raw input coordinates, plus the parameter codec, prior evaluation,
//! and sampling-history surfaces a GP framework drives during
//! optimization and MCMC.
//!
//! External collaborators (priors, distance metrics, an optional dense
//! acceleration routine) plug in through the capability traits in
//! [`prior`], [`metric`], and [`evaluate`]; kernels themselves are
//! interchangeable behind [`covfn::CovarianceFunction`].

pub mod covfn;
pub mod descriptor;
pub mod evaluate;
pub mod gradient;
pub mod input_gradient;
pub mod metric;
pub mod prior;
pub mod sparse;

pub use covfn::{CovarianceError, CovarianceFunction, MetricTrace, ParameterTrace, PriorTrace};
pub use descriptor::{Hyperparameter, LengthMode, LengthScaleSpec, Ppcs2, Ppcs2Spec, PriorSpec};
pub use evaluate::DenseTrainingCov;
pub use metric::{Metric, ScaledEuclidean};
pub use prior::{FlatPrior, GaussianPrior, Prior};
pub use sparse::{dense_to_sparse, sparse_to_dense, TripletAccumulator};
