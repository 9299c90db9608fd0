//! Reprojection loss over matched feature points.
//!
//! Parameters are `[focal_length, k1, cx, cy]` with square pixels. A base point is
//! normalized by the candidate camera, pushed through one radial term and mapped
//! back to pixels; the loss is the mean smoothed distance to its matched target
//! point.
//!
//! Each distance `d` contributes `sqrt(d² + δ²) - δ`. With `δ = 0` this is the
//! plain mean Euclidean error. A positive `δ` makes residuals well below `δ`
//! count quadratically, so sub-pixel keypoint jitter weighs less than real
//! misalignment and the gradient stays defined at a perfect fit.

use super::{LossFunction, REJECTED_LOSS};
use crate::camera::Resolution;
use crate::features::FeatureCorrespondence;
use nalgebra::Vector2;

pub const PARAMETER_NAMES: [&str; 4] = ["focal_length", "k1", "cx", "cy"];
/// Width of the quadratic region around a zero residual, in pixels.
pub const DEFAULT_SMOOTHING: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct ReprojectionLoss {
    correspondences: FeatureCorrespondence,
    smoothing: f64,
}

impl ReprojectionLoss {
    pub fn new(correspondences: FeatureCorrespondence) -> Self {
        Self {
            correspondences,
            smoothing: DEFAULT_SMOOTHING,
        }
    }

    /// Sets `δ` in pixels. Negative values are treated as zero.
    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing.max(0.0);
        self
    }

    pub fn correspondences(&self) -> &FeatureCorrespondence {
        &self.correspondences
    }

    /// `[(0.2w, 2w), (-0.5, 0.5), (0.25w, 0.75w), (0.25h, 0.75h)]`
    pub fn bounds(resolution: &Resolution) -> [(f64, f64); 4] {
        let w = resolution.width as f64;
        let h = resolution.height as f64;
        [
            (0.2 * w, 2.0 * w),
            (-0.5, 0.5),
            (0.25 * w, 0.75 * w),
            (0.25 * h, 0.75 * h),
        ]
    }

    /// Starting point used for parameters without a default.
    pub fn initial_guess(resolution: &Resolution) -> [f64; 4] {
        let center = resolution.center();
        [resolution.half_diagonal(), 0.0, center.x, center.y]
    }

    /// Per-correspondence Euclidean distances for `params`.
    pub fn distances(&self, params: &[f64]) -> Vec<f64> {
        self.correspondences
            .iter()
            .map(|(base, target)| (project(params, base) - target).norm())
            .collect()
    }
}

/// Applies the single-coefficient radial model to a pixel position.
pub fn project(params: &[f64], point: &Vector2<f64>) -> Vector2<f64> {
    let (f, k1, cx, cy) = (params[0], params[1], params[2], params[3]);
    let center = Vector2::new(cx, cy);
    let normalized = (point - center) / f;
    let radial = 1.0 + k1 * normalized.norm_squared();
    normalized * radial * f + center
}

impl LossFunction for ReprojectionLoss {
    fn loss(&self, params: &[f64]) -> f64 {
        if params.len() != PARAMETER_NAMES.len() || !(params[0] > 0.0) {
            return REJECTED_LOSS;
        }
        if self.correspondences.is_empty() {
            return REJECTED_LOSS;
        }
        let delta = self.smoothing;
        let total: f64 = self
            .distances(params)
            .into_iter()
            .map(|d| (d * d + delta * delta).sqrt() - delta)
            .sum();
        let mean = total / self.correspondences.len() as f64;
        if mean.is_finite() {
            mean
        } else {
            REJECTED_LOSS
        }
    }
}
