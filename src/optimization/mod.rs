//! Bounded parameter estimation and the loss functions it minimizes.
//!
//! The [`ParameterEstimator`] is loss-agnostic: it sees a flat parameter vector,
//! per-dimension bounds and a [`LossFunction`]. Each calibration mode supplies its
//! own loss:
//!
//! * [`ReprojectionLoss`] - matched feature points between two images.
//! * [`CalibrationTargetLoss`] - a projected calibration grid against observed points.
//! * [`PixelDifferenceLoss`] - rendered frames against reference images.

pub mod estimator;
pub mod pixel;
pub mod reprojection;
pub mod target;

pub use estimator::{BoxTransform, Estimate, EstimatorConfig, ParameterEstimator, ProgressFn};
pub use pixel::PixelDifferenceLoss;
pub use reprojection::ReprojectionLoss;
pub use target::CalibrationTargetLoss;

/// Loss assigned to parameter vectors whose evaluation is not finite.
///
/// It dominates any real loss in this crate (mean pixel distances are bounded by
/// the image diagonal and 8-bit MSE by 65025) while staying finite, so finite
/// differences across it never produce NaN.
pub const REJECTED_LOSS: f64 = 1e12;

pub fn is_rejected(loss: f64) -> bool {
    !loss.is_finite() || loss >= REJECTED_LOSS
}

/// An objective over a flat parameter vector.
///
/// Implementations return [`REJECTED_LOSS`] (or any non-finite value) for
/// parameters they cannot evaluate instead of failing.
pub trait LossFunction: Send + Sync {
    fn loss(&self, params: &[f64]) -> f64;
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum OptimizationError {
    #[error("Every evaluated parameter vector produced a non-finite projection")]
    DegenerateProjection,
    #[error("Optimizer did not converge: {0}")]
    NonConvergence(String),
    #[error("Estimation was cancelled")]
    Cancelled,
    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),
    #[error("Numerical error: {0}")]
    NumericalError(String),
    #[error("Solver error: {0}")]
    Solver(String),
}

impl From<argmin::core::Error> for OptimizationError {
    fn from(err: argmin::core::Error) -> Self {
        OptimizationError::Solver(err.to_string())
    }
}
