//! Calibration and auto-tuning: pick a loss from the available inputs, apply
//! parameter locks and drive the [`ParameterEstimator`](crate::optimization::ParameterEstimator).
//!
//! Failures never escape as errors. A job that cannot match features, that the
//! optimizer cannot finish or that is cancelled reports
//! [`EstimationStatus::Failed`] together with the caller's defaults.

pub mod modes;
pub mod orchestrator;

pub use modes::{select_mode, CalibrationMode, ParameterSpace};
pub use orchestrator::{
    run_calibration, CalibrationEvent, CalibrationOrchestrator, JobHandle, JobState,
};

use crate::features::{FeatureConfig, FeatureError};
use crate::frame::Frame;
use crate::optimization::{reprojection, EstimatorConfig, OptimizationError};
use crate::simulation::{ImagePipeline, SimulationParameters};
use crate::target::TargetGenerator;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ParameterMap = BTreeMap<String, f64>;
pub type LockMap = BTreeMap<String, bool>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("No calibration inputs were provided")]
    MissingInputs,
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Optimization(#[from] OptimizationError),
    #[error("Calibration was cancelled")]
    Cancelled,
    #[error("Calibration worker stopped unexpectedly: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub features: FeatureConfig,
    pub estimator: EstimatorConfig,
    pub reprojection_max_iterations: u64,
    /// `δ` of the reprojection loss in pixels. Zero gives the plain mean
    /// distance; larger values damp sub-pixel residuals.
    pub reprojection_smoothing: f64,
    pub target_max_iterations: u64,
    pub pixel_max_iterations: u64,
    /// Larger than the estimator default because rendered frames are quantized.
    pub pixel_finite_difference_step: f64,
    /// Sensor-noise seed used while rendering candidates in pixel mode.
    pub pixel_noise_seed: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            estimator: EstimatorConfig::default(),
            reprojection_max_iterations: 50,
            reprojection_smoothing: reprojection::DEFAULT_SMOOTHING,
            target_max_iterations: 50,
            pixel_max_iterations: 20,
            pixel_finite_difference_step: 1e-2,
            pixel_noise_seed: 0,
        }
    }
}

/// Everything a job may calibrate against. Which fields are set decides the mode.
#[derive(Debug, Clone, Default)]
pub struct CalibrationInputs {
    pub image_pair: Option<(Frame, Frame)>,
    pub target: Option<(TargetGenerator, Vec<Vector2<f64>>)>,
    pub references: Option<(Frame, Vec<Frame>, SimulationParameters)>,
    /// Renders candidates in pixel-difference mode.
    pub pipeline: ImagePipeline,
}

impl CalibrationInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clean base image and a distorted capture of the same scene.
    pub fn with_image_pair(mut self, base: Frame, target: Frame) -> Self {
        self.image_pair = Some((base, target));
        self
    }

    /// A synthetic target and the grid observed for it, one point per world point.
    pub fn with_target(mut self, generator: TargetGenerator, observed: Vec<Vector2<f64>>) -> Self {
        self.target = Some((generator, observed));
        self
    }

    /// An input frame, the captures it should be rendered to match, and the
    /// simulation parameters that stay fixed.
    pub fn with_references(
        mut self,
        input: Frame,
        references: Vec<Frame>,
        base: SimulationParameters,
    ) -> Self {
        self.references = Some((input, references, base));
        self
    }

    pub fn with_pipeline(mut self, pipeline: ImagePipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.image_pair.is_none() && self.target.is_none() && self.references.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EstimationStatus {
    Converged,
    Failed(String),
}

/// Final parameters of a job. A failed job carries the defaults it was started with.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimationResult {
    pub parameters: ParameterMap,
    pub status: EstimationStatus,
    pub final_loss: Option<f64>,
    pub iterations: u64,
}

impl EstimationResult {
    pub fn failed(defaults: &ParameterMap, reason: impl Into<String>) -> Self {
        Self {
            parameters: defaults.clone(),
            status: EstimationStatus::Failed(reason.into()),
            final_loss: None,
            iterations: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == EstimationStatus::Converged
    }
}
