//! Calibration-target loss: the synthetic grid projected through a candidate lens
//! against an observed grid of the same cardinality.
//!
//! Parameters are `[focal_length, k1, k2]` with the focal length in millimetres;
//! the sensor size is fixed.

use super::{LossFunction, OptimizationError, REJECTED_LOSS};
use crate::camera::CameraIntrinsics;
use crate::target::TargetGenerator;
use nalgebra::{DMatrix, DVector, Vector2};

pub const PARAMETER_NAMES: [&str; 3] = ["focal_length", "k1", "k2"];

#[derive(Debug, Clone)]
pub struct CalibrationTargetLoss {
    generator: TargetGenerator,
    observed: Vec<Vector2<f64>>,
    sensor_width: f64,
    sensor_height: f64,
}

impl CalibrationTargetLoss {
    pub fn new(
        generator: TargetGenerator,
        observed: Vec<Vector2<f64>>,
        sensor_width: f64,
        sensor_height: f64,
    ) -> Self {
        Self {
            generator,
            observed,
            sensor_width,
            sensor_height,
        }
    }

    /// `[(0.25 f0, 4 f0), (-1, 1), (-1, 1)]` around the starting focal length `f0`.
    pub fn bounds(focal_length: f64) -> [(f64, f64); 3] {
        [
            (0.25 * focal_length, 4.0 * focal_length),
            (-1.0, 1.0),
            (-1.0, 1.0),
        ]
    }

    /// The lens described by `[focal_length, k1, k2]`.
    pub fn lens(&self, params: &[f64]) -> CameraIntrinsics {
        let resolution = self.generator.resolution();
        CameraIntrinsics::centered(
            &resolution,
            params[0],
            self.sensor_width,
            self.sensor_height,
            vec![params[1], params[2]],
        )
    }

    pub fn generator(&self) -> &TargetGenerator {
        &self.generator
    }
}

impl LossFunction for CalibrationTargetLoss {
    fn loss(&self, params: &[f64]) -> f64 {
        if params.len() != PARAMETER_NAMES.len() {
            return REJECTED_LOSS;
        }
        let Some(projected) = self.generator.project(&self.lens(params)) else {
            return REJECTED_LOSS;
        };
        if projected.len() != self.observed.len() || projected.is_empty() {
            return REJECTED_LOSS;
        }
        let sum: f64 = projected
            .iter()
            .zip(&self.observed)
            .map(|(p, o)| (p - o).norm_squared())
            .sum();
        let mse = sum / (2 * projected.len()) as f64;
        if mse.is_finite() {
            mse
        } else {
            REJECTED_LOSS
        }
    }
}

/// Linear least-squares estimate of `k1` and `k2` for a known focal length.
///
/// With `x'` the ideal normalized coordinate and `x_d` the observed one, each
/// coordinate contributes `x' r^2 k1 + x' r^4 k2 = x_d - x'`; the system is solved
/// with an SVD.
///
/// # Errors
///
/// * [`OptimizationError::InvalidBounds`] if `observed` does not match the world points.
/// * [`OptimizationError::NumericalError`] if the system cannot be solved.
pub fn estimate_distortion(
    generator: &TargetGenerator,
    lens: &CameraIntrinsics,
    observed: &[Vector2<f64>],
) -> Result<(f64, f64), OptimizationError> {
    let world = generator.world_points().points();
    if world.len() != observed.len() {
        return Err(OptimizationError::InvalidBounds(format!(
            "{} observed points for {} world points",
            observed.len(),
            world.len()
        )));
    }

    let camera = generator.camera(lens);
    let k = camera.intrinsics;
    let n = world.len();
    let mut a = DMatrix::zeros(n * 2, 2);
    let mut b = DVector::zeros(n * 2);

    for (i, (point, pixel)) in world.iter().zip(observed).enumerate() {
        let x_prime = point.x / point.z;
        let y_prime = point.y / point.z;
        let r2 = x_prime * x_prime + y_prime * y_prime;
        let r4 = r2 * r2;

        a[(i * 2, 0)] = x_prime * r2;
        a[(i * 2, 1)] = x_prime * r4;
        a[(i * 2 + 1, 0)] = y_prime * r2;
        a[(i * 2 + 1, 1)] = y_prime * r4;

        b[i * 2] = (pixel.x - k.cx) / k.fx - x_prime;
        b[i * 2 + 1] = (pixel.y - k.cy) / k.fy - y_prime;
    }

    if !a.iter().chain(b.iter()).all(|v| v.is_finite()) {
        return Err(OptimizationError::NumericalError(
            "non-finite entries in the distortion system".to_string(),
        ));
    }

    let svd = a.svd(true, true);
    let coeffs = svd
        .solve(&b, 1e-10)
        .map_err(|err| OptimizationError::NumericalError(err.to_string()))?;
    Ok((coeffs[0], coeffs[1]))
}
