//! The image-formation pipeline: optics, lighting and sensor stages applied in
//! that fixed order.
//!
//! Every stage is a pure function of `(frame, params)` and returns a new frame.
//! Stages hand each other normalized float buffers; only the final render is
//! quantized to 8 bit. Degenerate input (an empty frame) never fails; it degrades
//! to an empty frame, or to a black frame of the requested size in the sensor stage.

pub mod lighting;
pub mod optics;
pub mod params;
pub mod presets;
pub mod sensor;

pub use lighting::LightingStage;
pub use optics::OpticsStage;
pub use params::{
    DistortionType, DynamicRange, OutputResolution, ParameterError, PipelineConstants,
    SensorType, SimulationParameters,
};
pub use presets::DistortionPreset;
pub use sensor::SensorStage;

use crate::frame::{FloatFrame, Frame};
use log::warn;

/// One step of the image-formation pipeline.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transforms a normalized buffer, keeping full float precision.
    fn process(&self, img: FloatFrame, params: &SimulationParameters) -> FloatFrame;

    /// Produces a new 8-bit frame without touching `frame`.
    fn apply(&self, frame: &Frame, params: &SimulationParameters) -> Frame {
        self.process(FloatFrame::from_frame(frame), params).to_frame()
    }
}

/// The three stages wired in order, sharing one set of constants.
#[derive(Debug, Clone, Default)]
pub struct ImagePipeline {
    pub optics: OpticsStage,
    pub lighting: LightingStage,
    pub sensor: SensorStage,
}

impl ImagePipeline {
    pub fn new(constants: PipelineConstants) -> Self {
        Self {
            optics: OpticsStage::new(constants.clone()),
            lighting: LightingStage::new(constants.clone()),
            sensor: SensorStage::new(constants),
        }
    }

    pub fn stages(&self) -> [&dyn Stage; 3] {
        [&self.optics, &self.lighting, &self.sensor]
    }

    /// Renders `frame` through every stage.
    ///
    /// Parameters that fail validation are clamped into range first, so a
    /// half-edited parameter set still produces an image.
    ///
    /// # Arguments
    ///
    /// * `frame` - Source image; it is never modified.
    /// * `params` - Simulation settings.
    ///
    /// # Returns
    ///
    /// The simulated capture, possibly with different dimensions than `frame`.
    pub fn run(&self, frame: &Frame, params: &SimulationParameters) -> Frame {
        self.run_float(frame, params).to_frame()
    }

    /// [`run`](Self::run) without the final 8-bit quantization, so the render
    /// varies smoothly with the parameters.
    pub fn run_float(&self, frame: &Frame, params: &SimulationParameters) -> FloatFrame {
        let clamped;
        let params = match params.validate() {
            Ok(()) => params,
            Err(err) => {
                warn!("Rendering with clamped parameters: {err}");
                clamped = params.clone().clamped();
                &clamped
            }
        };

        self.stages()
            .into_iter()
            .fold(FloatFrame::from_frame(frame), |img, stage| {
                stage.process(img, params)
            })
    }
}

/// Renders with the default pipeline constants. An absent frame renders to `None`.
pub fn render(frame: Option<&Frame>, params: &SimulationParameters) -> Option<Frame> {
    frame.map(|frame| ImagePipeline::default().run(frame, params))
}
