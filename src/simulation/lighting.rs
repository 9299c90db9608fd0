use super::params::{PipelineConstants, SimulationParameters};
use super::Stage;
use crate::frame::FloatFrame;

/// Directional illumination with optional shadow deepening and a Phong-style
/// specular highlight.
///
/// Each pixel gets a pseudo-normal from its offset to the image centre
/// (normalized by width and height); the light comes from `light_direction`
/// degrees in the image plane and the viewer looks straight down `-y`.
#[derive(Debug, Clone, Default)]
pub struct LightingStage {
    pub constants: PipelineConstants,
}

impl LightingStage {
    pub fn new(constants: PipelineConstants) -> Self {
        Self { constants }
    }

    /// Illumination factor in `[0, 1]` at pixel `(x, y)`, plus the normal and `n·l`
    /// needed by the specular term.
    fn illumination(&self, x: usize, y: usize, w: f64, h: f64, light: (f64, f64)) -> Shading {
        let nx = (x as f64 - w / 2.0) / w;
        let ny = (y as f64 - h / 2.0) / h;
        let dot = nx * light.0 + ny * light.1;
        Shading {
            normal: (nx, ny),
            dot,
            illum: (dot + self.constants.ambient_light).clamp(0.0, 1.0),
        }
    }
}

struct Shading {
    normal: (f64, f64),
    dot: f64,
    illum: f64,
}

impl Stage for LightingStage {
    fn name(&self) -> &'static str {
        "lighting"
    }

    fn process(&self, mut img: FloatFrame, params: &SimulationParameters) -> FloatFrame {
        if img.is_empty() {
            return img;
        }
        let (w, h) = (img.width as f64, img.height as f64);
        let gain = 1.0 + params.brightness / 50.0;
        let theta = params.light_direction.to_radians();
        let light = (theta.cos(), theta.sin());
        let shadows = params.shadows;
        let specular = params.specular;
        let exponent = self.constants.specular_exponent;
        let floor = self.constants.shadow_floor;

        img.map_color(|x, y, v| {
            let shading = self.illumination(x, y, w, h, light);
            let mut value = v as f64 * gain * shading.illum;

            if shadows > 0.0 {
                let mask = (1.0 - (1.0 - shading.illum) * (1.0 + shadows)).clamp(floor, 1.0);
                value *= mask;
            }
            if specular > 0.0 {
                // r = 2(n·l)n - l against the view vector (0, -1)
                let reflect_y = 2.0 * shading.dot * shading.normal.1 - light.1;
                let dot_rv = -reflect_y;
                value += dot_rv.powi(exponent).clamp(0.0, 1.0) * specular;
            }
            value.clamp(0.0, 1.0) as f32
        });
        img
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, PixelLayout};

    fn lighting() -> LightingStage {
        LightingStage::default()
    }

    #[test]
    fn test_default_lighting_falls_off_against_light() {
        // light points along +x, so the right side is brighter than the left
        let frame = Frame::filled(64, 32, PixelLayout::Gray, 200);
        let out = lighting().apply(&frame, &SimulationParameters::default());
        assert!(out.get(63, 16, 0) > out.get(0, 16, 0));
        // centre sees only the ambient term
        assert_eq!(out.get(32, 16, 0), (200.0f64 * 0.7).round() as u8);
    }

    #[test]
    fn test_brightness_scales_linearly() {
        let frame = Frame::filled(16, 16, PixelLayout::Rgb, 100);
        let dim = lighting().apply(
            &frame,
            &SimulationParameters {
                brightness: -25.0,
                ..Default::default()
            },
        );
        let base = lighting().apply(&frame, &SimulationParameters::default());
        let ratio = dim.get(8, 8, 0) as f64 / base.get(8, 8, 0) as f64;
        assert!((ratio - 0.5).abs() < 0.02, "ratio was {ratio}");
    }

    #[test]
    fn test_shadows_only_darken() {
        let frame = Frame::filled(32, 32, PixelLayout::Rgb, 180);
        let base = lighting().apply(&frame, &SimulationParameters::default());
        let shadowed = lighting().apply(
            &frame,
            &SimulationParameters {
                shadows: 1.0,
                ..Default::default()
            },
        );
        for (a, b) in base.data().iter().zip(shadowed.data()) {
            assert!(b <= a);
        }
    }

    #[test]
    fn test_specular_only_brightens() {
        let frame = Frame::filled(32, 32, PixelLayout::Gray, 50);
        let base = lighting().apply(&frame, &SimulationParameters::default());
        let shiny = lighting().apply(
            &frame,
            &SimulationParameters {
                specular: 1.0,
                light_direction: 90.0,
                ..Default::default()
            },
        );
        let lit_same = lighting().apply(
            &frame,
            &SimulationParameters {
                light_direction: 90.0,
                ..Default::default()
            },
        );
        for (a, b) in lit_same.data().iter().zip(shiny.data()) {
            assert!(b >= a);
        }
        assert_ne!(base, shiny);
    }

    #[test]
    fn test_alpha_and_empty_frames() {
        let frame = Frame::filled(8, 8, PixelLayout::Rgba, 90);
        let out = lighting().apply(&frame, &SimulationParameters::default());
        assert!(out.data().chunks(4).all(|px| px[3] == 90));

        let empty = Frame::filled(0, 0, PixelLayout::Rgb, 0);
        assert_eq!(lighting().apply(&empty, &SimulationParameters::default()), empty);
    }
}
