//! Typed simulation parameters and the tunable pipeline constants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::str::FromStr;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("{name} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{0} must be finite")]
    NonFinite(&'static str),
    #[error("dynamic range low ({low}) must be below high ({high})")]
    InvalidDynamicRange { low: f64, high: f64 },
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("Invalid resolution '{0}', expected 'Unchanged' or 'W x H'")]
    InvalidResolution(String),
    #[error("Failed to parse YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<serde_yaml::Error> for ParameterError {
    fn from(err: serde_yaml::Error) -> Self {
        ParameterError::YamlError(err.to_string())
    }
}

impl From<std::io::Error> for ParameterError {
    fn from(err: std::io::Error) -> Self {
        ParameterError::IOError(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistortionType {
    #[default]
    None,
    Barrel,
    Pincushion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SensorType {
    #[default]
    #[serde(rename = "CMOS")]
    Cmos,
    #[serde(rename = "CCD")]
    Ccd,
    #[serde(rename = "sCMOS")]
    Scmos,
}

/// Output size requested from the sensor stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OutputResolution {
    #[default]
    Unchanged,
    Fixed { width: u32, height: u32 },
}

impl FromStr for OutputResolution {
    type Err = ParameterError;

    /// Accepts `"Unchanged"` or `"640 x 480"` (spaces and case are ignored).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("unchanged") {
            return Ok(OutputResolution::Unchanged);
        }
        let invalid = || ParameterError::InvalidResolution(s.to_string());
        let (w, h) = trimmed
            .split_once(|c: char| c == 'x' || c == 'X' || c == '×')
            .ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(OutputResolution::Fixed { width, height })
    }
}

impl TryFrom<String> for OutputResolution {
    type Error = ParameterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OutputResolution> for String {
    fn from(value: OutputResolution) -> Self {
        value.to_string()
    }
}

impl fmt::Display for OutputResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputResolution::Unchanged => write!(f, "Unchanged"),
            OutputResolution::Fixed { width, height } => write!(f, "{width} x {height}"),
        }
    }
}

/// Input window in 8-bit units that the sensor stretches to full range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DynamicRange {
    pub low: f64,
    pub high: f64,
}

impl Default for DynamicRange {
    fn default() -> Self {
        Self {
            low: 0.0,
            high: 255.0,
        }
    }
}

/// Every knob of the image-formation pipeline.
///
/// `brightness` is a signed offset around the neutral setting (0 keeps the
/// image as lit) and `exposure` is a plain multiplier (1 keeps it unchanged).
/// `seed` pins the sensor noise so renders are reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParameters {
    pub zoom: f64,
    pub field_of_view: f64,
    pub distortion_type: DistortionType,
    pub distortion_intensity: f64,
    pub vignetting: f64,
    pub chromatic_aberration: f64,
    pub defocus: f64,
    pub brightness: f64,
    pub light_direction: f64,
    pub shadows: f64,
    pub specular: f64,
    pub noise_level: f64,
    pub exposure: f64,
    pub dynamic_range: DynamicRange,
    pub sensor_type: SensorType,
    pub resolution: OutputResolution,
    pub cfa: bool,
    pub seed: Option<u64>,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            field_of_view: 60.0,
            distortion_type: DistortionType::None,
            distortion_intensity: 0.0,
            vignetting: 0.0,
            chromatic_aberration: 0.0,
            defocus: 0.0,
            brightness: 0.0,
            light_direction: 0.0,
            shadows: 0.0,
            specular: 0.0,
            noise_level: 0.0,
            exposure: 1.0,
            dynamic_range: DynamicRange::default(),
            sensor_type: SensorType::Cmos,
            resolution: OutputResolution::Unchanged,
            cfa: false,
            seed: None,
        }
    }
}

pub const FOV_RANGE: (f64, f64) = (30.0, 90.0);
pub const BRIGHTNESS_RANGE: (f64, f64) = (-50.0, 50.0);
pub const LIGHT_DIRECTION_RANGE: (f64, f64) = (0.0, 360.0);
pub const CHROMATIC_ABERRATION_RANGE: (f64, f64) = (0.0, 10.0);
pub const DEFOCUS_RANGE: (f64, f64) = (0.0, 10.0);
const UNBOUNDED: f64 = f64::INFINITY;

fn check(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ParameterError> {
    if !value.is_finite() {
        return Err(ParameterError::NonFinite(name));
    }
    if value < min || value > max {
        return Err(ParameterError::OutOfRange {
            name,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn check_positive(name: &'static str, value: f64) -> Result<(), ParameterError> {
    if !value.is_finite() {
        return Err(ParameterError::NonFinite(name));
    }
    if value <= 0.0 {
        return Err(ParameterError::OutOfRange {
            name,
            value,
            min: f64::MIN_POSITIVE,
            max: UNBOUNDED,
        });
    }
    Ok(())
}

impl SimulationParameters {
    /// Rejects any value outside its documented range.
    pub fn validate(&self) -> Result<(), ParameterError> {
        check_positive("zoom", self.zoom)?;
        check("field_of_view", self.field_of_view, FOV_RANGE.0, FOV_RANGE.1)?;
        check("distortion_intensity", self.distortion_intensity, 0.0, UNBOUNDED)?;
        check("vignetting", self.vignetting, 0.0, 1.0)?;
        check(
            "chromatic_aberration",
            self.chromatic_aberration,
            CHROMATIC_ABERRATION_RANGE.0,
            CHROMATIC_ABERRATION_RANGE.1,
        )?;
        check("defocus", self.defocus, DEFOCUS_RANGE.0, DEFOCUS_RANGE.1)?;
        check("brightness", self.brightness, BRIGHTNESS_RANGE.0, BRIGHTNESS_RANGE.1)?;
        check(
            "light_direction",
            self.light_direction,
            LIGHT_DIRECTION_RANGE.0,
            LIGHT_DIRECTION_RANGE.1,
        )?;
        check("shadows", self.shadows, 0.0, UNBOUNDED)?;
        check("specular", self.specular, 0.0, UNBOUNDED)?;
        check("noise_level", self.noise_level, 0.0, UNBOUNDED)?;
        check_positive("exposure", self.exposure)?;

        let DynamicRange { low, high } = self.dynamic_range;
        check("dynamic_range.low", low, 0.0, 255.0)?;
        check("dynamic_range.high", high, 0.0, 255.0)?;
        if low >= high {
            return Err(ParameterError::InvalidDynamicRange { low, high });
        }
        Ok(())
    }

    /// Pulls every field back into range instead of rejecting it.
    pub fn clamped(mut self) -> Self {
        fn finite_or(value: f64, fallback: f64) -> f64 {
            if value.is_finite() {
                value
            } else {
                fallback
            }
        }
        let defaults = SimulationParameters::default();

        self.zoom = finite_or(self.zoom, defaults.zoom).max(1e-6);
        self.field_of_view =
            finite_or(self.field_of_view, defaults.field_of_view).clamp(FOV_RANGE.0, FOV_RANGE.1);
        self.distortion_intensity = finite_or(self.distortion_intensity, 0.0).max(0.0);
        self.vignetting = finite_or(self.vignetting, 0.0).clamp(0.0, 1.0);
        self.chromatic_aberration = finite_or(self.chromatic_aberration, 0.0)
            .clamp(CHROMATIC_ABERRATION_RANGE.0, CHROMATIC_ABERRATION_RANGE.1);
        self.defocus = finite_or(self.defocus, 0.0).clamp(DEFOCUS_RANGE.0, DEFOCUS_RANGE.1);
        self.brightness =
            finite_or(self.brightness, 0.0).clamp(BRIGHTNESS_RANGE.0, BRIGHTNESS_RANGE.1);
        self.light_direction = finite_or(self.light_direction, 0.0)
            .clamp(LIGHT_DIRECTION_RANGE.0, LIGHT_DIRECTION_RANGE.1);
        self.shadows = finite_or(self.shadows, 0.0).max(0.0);
        self.specular = finite_or(self.specular, 0.0).max(0.0);
        self.noise_level = finite_or(self.noise_level, 0.0).max(0.0);
        self.exposure = finite_or(self.exposure, defaults.exposure).max(1e-6);

        let low = finite_or(self.dynamic_range.low, 0.0).clamp(0.0, 255.0);
        let high = finite_or(self.dynamic_range.high, 255.0).clamp(0.0, 255.0);
        let (low, high) = if low < high {
            (low, high)
        } else if high < low {
            (high, low)
        } else if high < 255.0 {
            (low, high + 1.0)
        } else {
            (low - 1.0, high)
        };
        self.dynamic_range = DynamicRange { low, high };
        self
    }

    /// Distortion as one signed coefficient: positive is barrel, negative pincushion.
    pub fn signed_distortion(&self) -> f64 {
        match self.distortion_type {
            DistortionType::None => 0.0,
            DistortionType::Barrel => self.distortion_intensity,
            DistortionType::Pincushion => -self.distortion_intensity,
        }
    }

    pub fn set_signed_distortion(&mut self, k: f64) {
        self.distortion_type = if k > 0.0 {
            DistortionType::Barrel
        } else if k < 0.0 {
            DistortionType::Pincushion
        } else {
            DistortionType::None
        };
        self.distortion_intensity = k.abs();
    }

    /// Reads a numeric field by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        Some(match name {
            "zoom" => self.zoom,
            "fov" | "field_of_view" => self.field_of_view,
            "distortion" => self.signed_distortion(),
            "distortion_intensity" => self.distortion_intensity,
            "vignetting" => self.vignetting,
            "chromatic_aberration" => self.chromatic_aberration,
            "defocus" => self.defocus,
            "brightness" => self.brightness,
            "light_direction" => self.light_direction,
            "shadows" => self.shadows,
            "specular" => self.specular,
            "noise" | "noise_level" => self.noise_level,
            "exposure" => self.exposure,
            "dynamic_range_low" => self.dynamic_range.low,
            "dynamic_range_high" => self.dynamic_range.high,
            "cfa" => f64::from(u8::from(self.cfa)),
            _ => return None,
        })
    }

    /// Updates one numeric field by name, leaving `self` untouched if the result
    /// would be invalid.
    pub fn set(&mut self, name: &str, value: f64) -> Result<(), ParameterError> {
        let mut next = self.clone();
        match name {
            "zoom" => next.zoom = value,
            "fov" | "field_of_view" => next.field_of_view = value,
            "distortion" => next.set_signed_distortion(value),
            "distortion_intensity" => next.distortion_intensity = value,
            "vignetting" => next.vignetting = value,
            "chromatic_aberration" => next.chromatic_aberration = value,
            "defocus" => next.defocus = value,
            "brightness" => next.brightness = value,
            "light_direction" => next.light_direction = value,
            "shadows" => next.shadows = value,
            "specular" => next.specular = value,
            "noise" | "noise_level" => next.noise_level = value,
            "exposure" => next.exposure = value,
            "dynamic_range_low" => next.dynamic_range.low = value,
            "dynamic_range_high" => next.dynamic_range.high = value,
            "cfa" => next.cfa = value != 0.0,
            other => return Err(ParameterError::UnknownParameter(other.to_string())),
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ParameterError> {
        let params: SimulationParameters = serde_yaml::from_str(yaml)?;
        params.validate()?;
        Ok(params)
    }

    pub fn load_from_yaml(path: &str) -> Result<Self, ParameterError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn save_to_yaml(&self, path: &str) -> Result<(), ParameterError> {
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }
}

/// Empirical constants of the pipeline.
///
/// None of these have a physical derivation; they reproduce the look the
/// simulator was tuned for and can be adjusted per deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConstants {
    /// Field of view (degrees) at which the FOV stage is a no-op.
    pub reference_fov: f64,
    /// Horizontal pixel shift per unit of chromatic aberration.
    pub chromatic_shift_per_unit: f64,
    /// Gaussian sigma per unit of defocus.
    pub defocus_sigma_per_unit: f64,
    pub ambient_light: f64,
    pub shadow_floor: f64,
    pub specular_exponent: i32,
    pub cmos_noise_scale: f64,
    pub ccd_noise_scale: f64,
    pub scmos_noise_scale: f64,
    /// Photon count per unit intensity used for CCD shot noise.
    pub shot_noise_scale: f64,
}

impl Default for PipelineConstants {
    fn default() -> Self {
        Self {
            reference_fov: 60.0,
            chromatic_shift_per_unit: 5.0,
            defocus_sigma_per_unit: 2.5,
            ambient_light: 0.7,
            shadow_floor: 0.1,
            specular_exponent: 32,
            cmos_noise_scale: 1.0,
            ccd_noise_scale: 0.8,
            scmos_noise_scale: 1.2,
            shot_noise_scale: 50.0,
        }
    }
}

impl PipelineConstants {
    pub fn noise_scale(&self, sensor: SensorType) -> f64 {
        match sensor {
            SensorType::Cmos => self.cmos_noise_scale,
            SensorType::Ccd => self.ccd_noise_scale,
            SensorType::Scmos => self.scmos_noise_scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SimulationParameters::default().validate().is_ok());
    }

    #[test]
    fn test_parse_resolution() {
        assert_eq!(
            "640 x 480".parse::<OutputResolution>().unwrap(),
            OutputResolution::Fixed {
                width: 640,
                height: 480
            }
        );
        assert_eq!(
            "1920x1080".parse::<OutputResolution>().unwrap(),
            OutputResolution::Fixed {
                width: 1920,
                height: 1080
            }
        );
        assert_eq!(
            "unchanged".parse::<OutputResolution>().unwrap(),
            OutputResolution::Unchanged
        );
        assert!("640 by 480".parse::<OutputResolution>().is_err());
        assert!("0 x 480".parse::<OutputResolution>().is_err());
        assert_eq!(
            OutputResolution::Fixed {
                width: 640,
                height: 480
            }
            .to_string(),
            "640 x 480"
        );
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut params = SimulationParameters {
            zoom: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ParameterError::OutOfRange { name: "zoom", .. })
        ));

        params.zoom = 1.0;
        params.dynamic_range = DynamicRange {
            low: 200.0,
            high: 100.0,
        };
        assert!(matches!(
            params.validate(),
            Err(ParameterError::InvalidDynamicRange { .. })
        ));

        params.dynamic_range = DynamicRange::default();
        params.field_of_view = 120.0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_chromatic_and_defocus_are_bounded() {
        let params = SimulationParameters {
            chromatic_aberration: 1e19,
            defocus: f64::MAX,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ParameterError::OutOfRange {
                name: "chromatic_aberration",
                ..
            })
        ));
        let clamped = params.clamped();
        assert_eq!(clamped.chromatic_aberration, CHROMATIC_ABERRATION_RANGE.1);
        assert_eq!(clamped.defocus, DEFOCUS_RANGE.1);
        assert!(clamped.validate().is_ok());
    }

    #[test]
    fn test_clamped_normalizes() {
        let params = SimulationParameters {
            zoom: -2.0,
            exposure: 0.0,
            field_of_view: 10.0,
            vignetting: 3.0,
            noise_level: f64::NAN,
            dynamic_range: DynamicRange {
                low: 255.0,
                high: 255.0,
            },
            ..Default::default()
        }
        .clamped();
        assert!(params.validate().is_ok());
        assert_eq!(params.field_of_view, 30.0);
        assert_eq!(params.vignetting, 1.0);
        assert_eq!(params.noise_level, 0.0);
        assert_eq!(params.dynamic_range.low, 254.0);
    }

    #[test]
    fn test_set_by_name() {
        let mut params = SimulationParameters::default();
        params.set("noise_level", 0.2).unwrap();
        params.set("fov", 75.0).unwrap();
        params.set("distortion", -0.3).unwrap();
        assert_eq!(params.noise_level, 0.2);
        assert_eq!(params.field_of_view, 75.0);
        assert_eq!(params.distortion_type, DistortionType::Pincushion);
        assert_eq!(params.distortion_intensity, 0.3);
        assert_eq!(params.get("distortion"), Some(-0.3));

        assert!(params.set("exposure", -1.0).is_err());
        assert_eq!(params.exposure, 1.0);
        assert!(matches!(
            params.set("warp", 1.0),
            Err(ParameterError::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_load_from_yaml() {
        let params = SimulationParameters::load_from_yaml("samples/simulation.yaml").unwrap();
        assert_eq!(params.distortion_type, DistortionType::Barrel);
        assert_eq!(params.distortion_intensity, 0.3);
        assert_eq!(params.sensor_type, SensorType::Ccd);
        assert_eq!(
            params.resolution,
            OutputResolution::Fixed {
                width: 640,
                height: 480
            }
        );
        // unspecified fields keep their defaults
        assert_eq!(params.zoom, 1.0);
        assert_eq!(params.seed, Some(7));
    }

    #[test]
    fn test_yaml_rejects_invalid_values() {
        let yaml = "dynamic_range: { low: 100, high: 50 }\n";
        assert!(SimulationParameters::from_yaml_str(yaml).is_err());
    }
}
