//! Pinhole projection with radial-tangential lens distortion.
//!
//! This is the projection used by the synthetic calibration target and by the
//! calibration-target loss. Coefficients follow the common five-term ordering
//! `[k1, k2, p1, p2, k3]`.

use crate::camera::{validation, CameraModel, CameraModelError, Intrinsics, Resolution};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A pinhole camera with radial (`k1`, `k2`, `k3`) and tangential (`p1`, `p2`) distortion.
///
/// # Examples
///
/// ```rust
/// use camsim_tools::camera::{CameraModel, Intrinsics, RadTanModel, Resolution};
/// use nalgebra::Vector3;
///
/// let model = RadTanModel::new(
///     Intrinsics { fx: 500.0, fy: 500.0, cx: 320.0, cy: 240.0 },
///     Resolution::new(640, 480),
///     &[-0.1],
/// )
/// .unwrap();
/// let pixel = model.project(&Vector3::new(0.0, 0.0, 2.0)).unwrap();
/// assert_eq!(pixel.x, 320.0);
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RadTanModel {
    pub intrinsics: Intrinsics,
    pub resolution: Resolution,
    /// `[k1, k2, p1, p2, k3]`
    pub distortions: [f64; 5],
}

impl RadTanModel {
    /// Builds a model from up to five coefficients, zero-padding the missing ones.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::TooManyDistortionCoefficients`] for more than five coefficients.
    /// * Intrinsics validation errors from [`validation::validate_intrinsics`].
    pub fn new(
        intrinsics: Intrinsics,
        resolution: Resolution,
        coefficients: &[f64],
    ) -> Result<Self, CameraModelError> {
        if coefficients.len() > 5 {
            return Err(CameraModelError::TooManyDistortionCoefficients(
                coefficients.len(),
            ));
        }
        let mut distortions = [0.0; 5];
        distortions[..coefficients.len()].copy_from_slice(coefficients);

        let model = RadTanModel {
            intrinsics,
            resolution,
            distortions,
        };
        model.validate_params()?;
        Ok(model)
    }

    /// Applies the distortion polynomial to an undistorted normalized point.
    pub fn distort(&self, point: &Vector2<f64>) -> Vector2<f64> {
        let [k1, k2, p1, p2, k3] = self.distortions;
        let (x, y) = (point.x, point.y);

        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;

        Vector2::new(
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }

    /// Projects without depth or image-bounds checks.
    ///
    /// The result may be non-finite for degenerate inputs; callers that feed an
    /// optimizer are expected to test it with `is_finite`.
    pub fn project_unchecked(&self, point_3d: &Vector3<f64>) -> Vector2<f64> {
        let normalized = Vector2::new(point_3d.x / point_3d.z, point_3d.y / point_3d.z);
        let distorted = self.distort(&normalized);
        Vector2::new(
            self.intrinsics.fx * distorted.x + self.intrinsics.cx,
            self.intrinsics.fy * distorted.y + self.intrinsics.cy,
        )
    }
}

impl fmt::Debug for RadTanModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RadTanModel [fx: {} fy: {} cx: {} cy: {} distortions: {:?}]",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.distortions,
        )
    }
}

impl CameraModel for RadTanModel {
    /// # Errors
    ///
    /// * [`CameraModelError::PointAtCameraCenter`] when `z` is too close to zero.
    /// * [`CameraModelError::ProjectionOutSideImage`] when the pixel falls outside the resolution.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }

        let pixel = self.project_unchecked(point_3d);
        if !self.resolution.contains(&pixel) {
            return Err(CameraModelError::ProjectionOutSideImage);
        }
        Ok(pixel)
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        if self.distortions.iter().any(|d| !d.is_finite()) {
            return Err(CameraModelError::InvalidParams(
                "distortion coefficients must be finite".to_string(),
            ));
        }
        Ok(())
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics.clone()
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_distortion(&self) -> Vec<f64> {
        self.distortions.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_model() -> RadTanModel {
        RadTanModel::new(
            Intrinsics {
                fx: 461.629,
                fy: 460.152,
                cx: 362.680,
                cy: 246.049,
            },
            Resolution::new(752, 480),
            &[-0.28340811, 0.07395907, 0.00019359, 1.76187114e-05, 0.0],
        )
        .unwrap()
    }

    #[test]
    fn test_radtan_zero_distortion_is_pinhole() {
        let model = RadTanModel::new(
            Intrinsics {
                fx: 500.0,
                fy: 400.0,
                cx: 320.0,
                cy: 240.0,
            },
            Resolution::new(640, 480),
            &[],
        )
        .unwrap();

        let pixel = model.project(&Vector3::new(0.2, -0.1, 2.0)).unwrap();
        assert_relative_eq!(pixel.x, 320.0 + 500.0 * 0.1, epsilon = 1e-12);
        assert_relative_eq!(pixel.y, 240.0 - 400.0 * 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_radtan_rejects_bad_inputs() {
        let model = sample_model();
        assert!(matches!(
            model.project(&Vector3::new(0.1, 0.1, 0.0)),
            Err(CameraModelError::PointAtCameraCenter)
        ));
        assert!(matches!(
            model.project(&Vector3::new(50.0, 0.0, 1.0)),
            Err(CameraModelError::ProjectionOutSideImage)
        ));
        assert!(matches!(
            RadTanModel::new(model.intrinsics.clone(), model.resolution, &[0.0; 6]),
            Err(CameraModelError::TooManyDistortionCoefficients(6))
        ));
    }

    #[test]
    fn test_radtan_center_is_undistorted() {
        let model = sample_model();
        let distorted = model.distort(&Vector2::zeros());
        assert_relative_eq!(distorted.norm(), 0.0);
    }
}
