//! Pixel-difference loss: render the input with candidate simulation parameters
//! and compare against one or more reference captures.
//!
//! Parameters are `[distortion, noise_level, zoom, fov]`, where `distortion` is the
//! signed coefficient (positive barrel, negative pincushion).
//!
//! Candidates are compared before 8-bit quantization so that small parameter
//! steps change the loss instead of vanishing in rounding.

use super::{LossFunction, REJECTED_LOSS};
use crate::frame::{resize, FloatFrame, Frame, Interpolation};
use crate::simulation::{ImagePipeline, SimulationParameters};

pub const PARAMETER_NAMES: [&str; 4] = ["distortion", "noise_level", "zoom", "fov"];
pub const BOUNDS: [(f64, f64); 4] = [(-0.5, 0.5), (0.0, 1.0), (0.5, 2.0), (30.0, 90.0)];

#[derive(Debug, Clone)]
pub struct PixelDifferenceLoss {
    input: Frame,
    references: Vec<Frame>,
    base: SimulationParameters,
    pipeline: ImagePipeline,
    seed: u64,
}

impl PixelDifferenceLoss {
    /// `seed` pins the sensor noise so the loss is a deterministic function of the parameters.
    pub fn new(
        input: Frame,
        references: Vec<Frame>,
        base: SimulationParameters,
        pipeline: ImagePipeline,
        seed: u64,
    ) -> Self {
        Self {
            input,
            references,
            base,
            pipeline,
            seed,
        }
    }

    /// The base parameters with the four estimated fields replaced.
    pub fn candidate(&self, params: &[f64]) -> SimulationParameters {
        let mut candidate = self.base.clone();
        candidate.set_signed_distortion(params[0]);
        candidate.noise_level = params[1];
        candidate.zoom = params[2];
        candidate.field_of_view = params[3];
        candidate.seed = Some(self.seed);
        candidate
    }

    /// Current values of the estimated fields in `params`, in parameter order.
    pub fn parameters_of(params: &SimulationParameters) -> [f64; 4] {
        [
            params.signed_distortion(),
            params.noise_level,
            params.zoom,
            params.field_of_view,
        ]
    }
}

/// Mean squared error in 8-bit units after bringing `render` to the reference's
/// layout and size (bilinear). The render is clipped to `[0, 1]` but not rounded.
pub fn render_mse(render: &FloatFrame, reference: &Frame) -> f64 {
    if reference.data().is_empty() {
        return f64::NAN;
    }
    let converted = render.to_layout(reference.layout());
    let (width, height) = (reference.width() as usize, reference.height() as usize);
    let matched = if (converted.width, converted.height) == (width, height) {
        converted
    } else {
        resize(&converted, width, height, Interpolation::Bilinear)
    };
    let sum: f64 = matched
        .data
        .iter()
        .zip(reference.data())
        .map(|(&a, &b)| {
            let a = if a.is_nan() {
                0.0
            } else {
                a.clamp(0.0, 1.0) as f64 * 255.0
            };
            (a - b as f64).powi(2)
        })
        .sum();
    sum / reference.data().len() as f64
}

impl LossFunction for PixelDifferenceLoss {
    fn loss(&self, params: &[f64]) -> f64 {
        if params.len() != PARAMETER_NAMES.len() || self.references.is_empty() {
            return REJECTED_LOSS;
        }
        let render = self.pipeline.run_float(&self.input, &self.candidate(params));
        if render.is_empty() {
            return REJECTED_LOSS;
        }
        let total: f64 = self
            .references
            .iter()
            .map(|reference| render_mse(&render, reference))
            .sum();
        let mean = total / self.references.len() as f64;
        if mean.is_finite() {
            mean
        } else {
            REJECTED_LOSS
        }
    }
}
