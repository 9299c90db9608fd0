//! Camera geometry shared by the synthetic target generator and the calibration losses.
//!
//! The [`CameraModel`] trait is the seam between pixel-space consumers and a concrete
//! projection. [`RadTanModel`] is the pinhole + radial/tangential implementation used
//! everywhere in the crate, while [`CameraIntrinsics`] carries the physical (millimetre)
//! description a user or the target generator starts from.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub mod lens;
pub mod rad_tan;

pub use lens::CameraIntrinsics;
pub use rad_tan::RadTanModel;

/// Pixel-space pinhole intrinsics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Geometric centre of the image plane, `(w/2, h/2)`.
    pub fn center(&self) -> Vector2<f64> {
        Vector2::new(self.width as f64 / 2.0, self.height as f64 / 2.0)
    }

    /// Distance from the centre to a corner.
    pub fn half_diagonal(&self) -> f64 {
        self.center().norm()
    }

    pub fn contains(&self, point: &Vector2<f64>) -> bool {
        point.x >= 0.0
            && point.x < self.width as f64
            && point.y >= 0.0
            && point.y < self.height as f64
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("Projection is outside the image")]
    ProjectionOutSideImage,
    #[error("z is close to zero, point is at camera center")]
    PointAtCameraCenter,
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Principal point ({0}, {1}) lies outside the image")]
    PrincipalPointOutsideImage(f64, f64),
    #[error("At most 5 distortion coefficients are supported, got {0}")]
    TooManyDistortionCoefficients(usize),
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CameraModelError {
    fn from(err: std::io::Error) -> Self {
        CameraModelError::IOError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CameraModelError {
    fn from(err: serde_yaml::Error) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

/// Trait defining the core functionality for camera models
pub trait CameraModel {
    /// Project a 3D point in camera coordinates to pixel coordinates.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError>;

    /// Validate camera parameters
    fn validate_params(&self) -> Result<(), CameraModelError>;

    fn get_intrinsics(&self) -> Intrinsics;

    fn get_resolution(&self) -> Resolution;

    fn get_distortion(&self) -> Vec<f64>;
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraModelError> {
        if !(intrinsics.fx > 0.0 && intrinsics.fy > 0.0) {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }

    /// Checks that `(cx, cy)` falls inside `[0, width] x [0, height]`.
    ///
    /// A zero-sized resolution means "not yet known" and is accepted.
    pub fn validate_principal_point(
        cx: f64,
        cy: f64,
        resolution: &Resolution,
    ) -> Result<(), CameraModelError> {
        if !cx.is_finite() || !cy.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        if resolution.width == 0 || resolution.height == 0 {
            return Ok(());
        }
        if cx < 0.0 || cx > resolution.width as f64 || cy < 0.0 || cy > resolution.height as f64 {
            return Err(CameraModelError::PrincipalPointOutsideImage(cx, cy));
        }
        Ok(())
    }
}
