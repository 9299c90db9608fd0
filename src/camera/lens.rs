//! Physical camera description: focal length and sensor size in millimetres.

use crate::camera::{validation, CameraModelError, Intrinsics, RadTanModel, Resolution};
use serde::{Deserialize, Serialize};
use std::fs;

/// Camera intrinsics expressed the way a photographer would state them.
///
/// `principal_point` is in pixels; everything else is in millimetres except the
/// distortion coefficients, which follow `[k1, k2, p1, p2, k3]` and may be shorter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub focal_length: f64,
    pub principal_point: [f64; 2],
    pub sensor_width: f64,
    pub sensor_height: f64,
    #[serde(default)]
    pub distortion: Vec<f64>,
}

impl Default for CameraIntrinsics {
    /// A 35 mm lens on a full-frame sensor, centred on an 800x600 canvas.
    fn default() -> Self {
        Self {
            focal_length: 35.0,
            principal_point: [400.0, 300.0],
            sensor_width: 36.0,
            sensor_height: 24.0,
            distortion: Vec::new(),
        }
    }
}

impl CameraIntrinsics {
    /// Intrinsics with the principal point at the centre of `resolution`.
    pub fn centered(
        resolution: &Resolution,
        focal_length: f64,
        sensor_width: f64,
        sensor_height: f64,
        distortion: Vec<f64>,
    ) -> Self {
        let center = resolution.center();
        Self {
            focal_length,
            principal_point: [center.x, center.y],
            sensor_width,
            sensor_height,
            distortion,
        }
    }

    pub fn validate(&self, resolution: &Resolution) -> Result<(), CameraModelError> {
        if !(self.focal_length > 0.0) {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        if !(self.sensor_width > 0.0 && self.sensor_height > 0.0) {
            return Err(CameraModelError::InvalidParams(format!(
                "sensor size must be positive, got {} x {}",
                self.sensor_width, self.sensor_height
            )));
        }
        if self.distortion.len() > 5 {
            return Err(CameraModelError::TooManyDistortionCoefficients(
                self.distortion.len(),
            ));
        }
        let [cx, cy] = self.principal_point;
        validation::validate_principal_point(cx, cy, resolution)
    }

    /// Converts millimetre focal length to pixel focal lengths for `resolution`.
    ///
    /// `fx = f * W / sensor_width`, `fy = f * H / sensor_height`.
    pub fn pixel_intrinsics(&self, resolution: &Resolution) -> Intrinsics {
        Intrinsics {
            fx: self.focal_length * resolution.width as f64 / self.sensor_width,
            fy: self.focal_length * resolution.height as f64 / self.sensor_height,
            cx: self.principal_point[0],
            cy: self.principal_point[1],
        }
    }

    /// Average pixels per millimetre of sensor across both axes.
    pub fn pixels_per_mm(&self, resolution: &Resolution) -> f64 {
        (resolution.width as f64 / self.sensor_width
            + resolution.height as f64 / self.sensor_height)
            / 2.0
    }

    pub fn to_model(&self, resolution: &Resolution) -> Result<RadTanModel, CameraModelError> {
        self.validate(resolution)?;
        RadTanModel::new(
            self.pixel_intrinsics(resolution),
            *resolution,
            &self.distortion,
        )
    }

    pub fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let intrinsics: CameraIntrinsics = serde_yaml::from_str(&contents)?;
        if intrinsics.distortion.len() > 5 {
            return Err(CameraModelError::TooManyDistortionCoefficients(
                intrinsics.distortion.len(),
            ));
        }
        Ok(intrinsics)
    }

    pub fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;
        Ok(())
    }
}
