//! Mode selection and the canonical parameter vector of each calibration mode.

use super::{CalibrationInputs, LockMap, ParameterMap};
use crate::camera::{CameraIntrinsics, Resolution};
use crate::optimization::{pixel, reprojection, target, CalibrationTargetLoss, ReprojectionLoss};
use crate::simulation::SimulationParameters;
use log::debug;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationMode {
    /// Base and target image pair, matched with AKAZE features.
    Reprojection,
    /// Synthetic target and the grid observed for it.
    CalibrationTarget,
    /// Reference captures rendered through the image pipeline.
    PixelDifference,
}

impl fmt::Display for CalibrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CalibrationMode::Reprojection => "reprojection",
            CalibrationMode::CalibrationTarget => "calibration target",
            CalibrationMode::PixelDifference => "pixel difference",
        };
        write!(f, "{name}")
    }
}

/// Picks the mode for `inputs`: an image pair wins over a target, which wins over references.
pub fn select_mode(inputs: &CalibrationInputs) -> Option<CalibrationMode> {
    if inputs.image_pair.is_some() {
        Some(CalibrationMode::Reprojection)
    } else if inputs.target.is_some() {
        Some(CalibrationMode::CalibrationTarget)
    } else if inputs.references.is_some() {
        Some(CalibrationMode::PixelDifference)
    } else {
        None
    }
}

/// Named parameter vector with its box. A locked dimension has `lo == hi == initial`.
///
/// Locking pins the caller's requested value even when it lies outside the
/// search box; only free dimensions are clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpace {
    pub names: Vec<&'static str>,
    pub initial: Vec<f64>,
    pub bounds: Vec<(f64, f64)>,
    requested: Vec<f64>,
}

impl ParameterSpace {
    /// Starts every dimension at its default (or `fallback` when absent), clamped into the box.
    fn from_defaults(
        names: &[&'static str],
        bounds: &[(f64, f64)],
        fallback: &[f64],
        defaults: &ParameterMap,
    ) -> Self {
        let requested: Vec<f64> = names
            .iter()
            .zip(fallback)
            .map(|(name, &fallback)| {
                defaults
                    .get(*name)
                    .copied()
                    .filter(|v| v.is_finite())
                    .unwrap_or(fallback)
            })
            .collect();
        let initial = requested
            .iter()
            .zip(bounds)
            .map(|(value, &(lo, hi))| value.clamp(lo, hi))
            .collect();
        Self {
            names: names.to_vec(),
            initial,
            bounds: bounds.to_vec(),
            requested,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| *n == name)
    }

    /// Pins dimension `i` at the requested value, unclamped.
    pub fn lock(&mut self, i: usize) {
        let v = self.requested[i];
        self.initial[i] = v;
        self.bounds[i] = (v, v);
    }

    pub fn is_locked(&self, i: usize) -> bool {
        self.bounds[i].0 == self.bounds[i].1
    }

    /// Applies every enabled lock. `aliases` maps a lock key onto parameter names;
    /// keys without an alias lock the parameter of the same name.
    fn apply_locks(&mut self, locks: &LockMap, aliases: &[(&str, &[&str])]) {
        for (key, _) in locks.iter().filter(|(_, locked)| **locked) {
            let targets: Vec<&str> = match aliases.iter().find(|(alias, _)| alias == key) {
                Some((_, names)) => names.to_vec(),
                None => vec![key.as_str()],
            };
            for name in targets {
                match self.index_of(name) {
                    Some(i) => self.lock(i),
                    None => debug!("Lock '{key}' does not apply to this mode"),
                }
            }
        }
    }

    /// Pairs each name with its value from `params`.
    pub fn named(&self, params: &[f64]) -> ParameterMap {
        self.names
            .iter()
            .zip(params)
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }
}

/// `[focal_length, k1, cx, cy]` for a base image of size `resolution`.
pub fn reprojection_space(
    resolution: &Resolution,
    defaults: &ParameterMap,
    locks: &LockMap,
) -> ParameterSpace {
    let mut space = ParameterSpace::from_defaults(
        &reprojection::PARAMETER_NAMES,
        &ReprojectionLoss::bounds(resolution),
        &ReprojectionLoss::initial_guess(resolution),
        defaults,
    );
    space.apply_locks(
        locks,
        &[("distortion", &["k1"]), ("principal_point", &["cx", "cy"])],
    );
    space
}

/// Sensor size used by the calibration-target mode, taken from the defaults.
pub fn sensor_size(defaults: &ParameterMap) -> (f64, f64) {
    let fallback = CameraIntrinsics::default();
    let positive = |key: &str, fallback: f64| {
        defaults
            .get(key)
            .copied()
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(fallback)
    };
    (
        positive("sensor_width", fallback.sensor_width),
        positive("sensor_height", fallback.sensor_height),
    )
}

/// `[focal_length, k1, k2]` in millimetres. The box is centred on the starting focal length.
///
/// `linear_distortion` replaces the k1/k2 starting values unless distortion is locked.
pub fn target_space(
    defaults: &ParameterMap,
    locks: &LockMap,
    linear_distortion: Option<(f64, f64)>,
) -> ParameterSpace {
    let fallback = CameraIntrinsics::default();
    let f0 = defaults
        .get("focal_length")
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(fallback.focal_length);
    let mut space = ParameterSpace::from_defaults(
        &target::PARAMETER_NAMES,
        &CalibrationTargetLoss::bounds(f0),
        &[f0, 0.0, 0.0],
        defaults,
    );
    if let Some((k1, k2)) = linear_distortion {
        for (name, value) in [("k1", k1), ("k2", k2)] {
            if let Some(i) = space.index_of(name) {
                let (lo, hi) = space.bounds[i];
                if value.is_finite() && !distortion_locked(locks, name) {
                    space.initial[i] = value.clamp(lo, hi);
                }
            }
        }
    }
    space.apply_locks(locks, &[("distortion", &["k1", "k2"])]);
    space
}

fn distortion_locked(locks: &LockMap, name: &str) -> bool {
    let locked = |key: &str| locks.get(key).copied().unwrap_or(false);
    locked("distortion") || locked(name)
}

/// `[distortion, noise_level, zoom, fov]`, falling back to the values in `base`.
pub fn pixel_space(
    base: &SimulationParameters,
    defaults: &ParameterMap,
    locks: &LockMap,
) -> ParameterSpace {
    let mut space = ParameterSpace::from_defaults(
        &pixel::PARAMETER_NAMES,
        &pixel::BOUNDS,
        &pixel::PixelDifferenceLoss::parameters_of(base),
        defaults,
    );
    space.apply_locks(locks, &[("noise", &["noise_level"])]);
    space
}
