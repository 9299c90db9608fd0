//! Camera Simulation Tools Library
//!
//! Simulates how a camera turns a scene into a picture and estimates camera
//! parameters back from images. The library provides:
//! - An image formation pipeline (optics, lighting and sensor stages)
//! - A synthetic calibration-target generator built on a radial-tangential camera
//! - AKAZE feature extraction and cross-checked matching
//! - A bounded L-BFGS parameter estimator with pluggable loss functions
//! - A calibration orchestrator that runs estimation jobs on a worker thread
//!
//! Image comparison metrics and correspondence export live in [`util`].

pub mod calibration;
pub mod camera;
pub mod config;
pub mod features;
pub mod frame;
pub mod geometry;
pub mod optimization;
pub mod simulation;
pub mod target;
pub mod util;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use camera::{
    CameraIntrinsics, CameraModel, CameraModelError, Intrinsics, RadTanModel, Resolution,
};

pub use frame::{Frame, FrameError, PixelLayout};

pub use simulation::{
    render, DistortionPreset, DistortionType, ImagePipeline, PipelineConstants, SensorType,
    SimulationParameters, Stage,
};

pub use target::{TargetConfig, TargetGenerator};

pub use features::{match_features, FeatureConfig, FeatureCorrespondence, FeatureError};

pub use optimization::{
    EstimatorConfig, LossFunction, OptimizationError, ParameterEstimator, REJECTED_LOSS,
};

pub use calibration::{
    run_calibration, CalibrationConfig, CalibrationError, CalibrationEvent, CalibrationInputs,
    CalibrationOrchestrator, EstimationResult, EstimationStatus, JobHandle, JobState,
};

pub use config::{ConfigError, ToolConfig};
