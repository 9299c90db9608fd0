//! Sensor response: noise, exposure, dynamic-range window, output resolution and
//! the optional Bayer colour-filter round trip.

use super::params::{OutputResolution, PipelineConstants, SensorType, SimulationParameters};
use super::Stage;
use crate::frame::{resize, FloatFrame, Interpolation, PixelLayout};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rand_distr::{Distribution, Normal, Poisson};

#[derive(Debug, Clone, Default)]
pub struct SensorStage {
    pub constants: PipelineConstants,
}

impl SensorStage {
    pub fn new(constants: PipelineConstants) -> Self {
        Self { constants }
    }

    /// Shot noise (CCD only) followed by Gaussian read noise on colour channels.
    pub fn add_noise(&self, img: &mut FloatFrame, params: &SimulationParameters, rng: &mut dyn RngCore) {
        let std = params.noise_level * self.constants.noise_scale(params.sensor_type);
        let shot_scale = self.constants.shot_noise_scale;
        let read_noise = Normal::new(0.0, std).ok();

        img.map_color(|_, _, v| {
            let mut value = v as f64;
            if params.sensor_type == SensorType::Ccd {
                value = match Poisson::new(value * shot_scale) {
                    Ok(poisson) => {
                        let count: f64 = poisson.sample(&mut *rng);
                        count / shot_scale
                    }
                    // zero or negative mean: no photons
                    Err(_) => 0.0,
                };
            }
            if let Some(normal) = &read_noise {
                value += normal.sample(&mut *rng);
            }
            value as f32
        });
    }
}

impl Stage for SensorStage {
    fn name(&self) -> &'static str {
        "sensor"
    }

    fn process(&self, mut img: FloatFrame, params: &SimulationParameters) -> FloatFrame {
        if img.is_empty() {
            return match params.resolution {
                OutputResolution::Fixed { width, height } => {
                    FloatFrame::zeros(width as usize, height as usize, img.layout)
                }
                OutputResolution::Unchanged => img,
            };
        }

        if params.noise_level > 0.0 {
            match params.seed {
                Some(seed) => self.add_noise(&mut img, params, &mut StdRng::seed_from_u64(seed)),
                None => self.add_noise(&mut img, params, &mut rand::thread_rng()),
            }
        }

        if params.exposure != 1.0 {
            let exposure = params.exposure as f32;
            img.map_color(|_, _, v| v * exposure);
        }

        let low = (params.dynamic_range.low / 255.0) as f32;
        let high = (params.dynamic_range.high / 255.0) as f32;
        let range = high - low;
        img.map_color(|_, _, v| {
            let clipped = v.clamp(low.min(high), high.max(low));
            if range > 1e-6 {
                (clipped - low) / range
            } else {
                clipped
            }
        });

        if let OutputResolution::Fixed { width, height } = params.resolution {
            img = resize(&img, width as usize, height as usize, Interpolation::Area);
        }

        if params.cfa && img.layout != PixelLayout::Gray {
            img = bayer_round_trip(&img);
        }
        img
    }
}

/// Colour sampled at `(x, y)` by an RGGB filter array: 0 = red, 1 = green, 2 = blue.
fn rggb_channel(x: usize, y: usize) -> usize {
    match (y % 2, x % 2) {
        (0, 0) => 0,
        (1, 1) => 2,
        _ => 1,
    }
}

/// Samples an RGGB mosaic at 8-bit precision and reconstructs colour by averaging
/// same-colour neighbours in each 3x3 window.
pub fn bayer_round_trip(img: &FloatFrame) -> FloatFrame {
    let (w, h) = (img.width, img.height);
    let mosaic: Vec<f32> = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .map(|(x, y)| {
            let v = img.get(x, y, rggb_channel(x, y)).clamp(0.0, 1.0);
            (v * 255.0).round() / 255.0
        })
        .collect();

    let mut out = img.clone();
    for y in 0..h {
        for x in 0..w {
            let own = rggb_channel(x, y);
            for c in 0..3 {
                let value = if c == own {
                    mosaic[y * w + x]
                } else {
                    let mut sum = 0.0;
                    let mut count = 0;
                    for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                        for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                            if rggb_channel(nx, ny) == c {
                                sum += mosaic[ny * w + nx];
                                count += 1;
                            }
                        }
                    }
                    if count > 0 {
                        sum / count as f32
                    } else {
                        mosaic[y * w + x]
                    }
                };
                out.set(x, y, c, value);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::simulation::params::DynamicRange;
    use crate::test_utils::textured_frame;

    fn sensor() -> SensorStage {
        SensorStage::default()
    }

    #[test]
    fn test_zero_noise_defaults_are_identity() {
        for layout in [PixelLayout::Gray, PixelLayout::Rgb, PixelLayout::Rgba] {
            let frame = textured_frame(40, 30, layout, 9);
            let out = sensor().apply(&frame, &SimulationParameters::default());
            assert_eq!(out, frame);
        }
    }

    #[test]
    fn test_fixed_resolution_is_exact() {
        let frame = textured_frame(123, 77, PixelLayout::Rgb, 2);
        let params = SimulationParameters {
            resolution: "640 x 480".parse().unwrap(),
            ..Default::default()
        };
        let out = sensor().apply(&frame, &params);
        assert_eq!((out.width(), out.height()), (640, 480));

        let empty = Frame::filled(0, 0, PixelLayout::Rgb, 0);
        let out = sensor().apply(&empty, &params);
        assert_eq!((out.width(), out.height()), (640, 480));
        assert!(out.data().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let frame = Frame::filled(32, 32, PixelLayout::Rgb, 128);
        let params = SimulationParameters {
            noise_level: 0.05,
            seed: Some(42),
            ..Default::default()
        };
        let a = sensor().apply(&frame, &params);
        let b = sensor().apply(&frame, &params);
        assert_eq!(a, b);
        assert_ne!(a, frame);

        let c = sensor().apply(
            &frame,
            &SimulationParameters {
                seed: Some(43),
                ..params
            },
        );
        assert_ne!(a, c);
    }

    #[test]
    fn test_sensor_type_scales_noise() {
        let frame = Frame::filled(64, 64, PixelLayout::Gray, 128);
        let spread = |sensor_type| {
            let out = sensor().apply(
                &frame,
                &SimulationParameters {
                    noise_level: 0.05,
                    sensor_type,
                    seed: Some(1),
                    ..Default::default()
                },
            );
            let mean = out.data().iter().map(|&v| v as f64).sum::<f64>() / out.data().len() as f64;
            out.data()
                .iter()
                .map(|&v| (v as f64 - mean).powi(2))
                .sum::<f64>()
                / out.data().len() as f64
        };
        assert!(spread(SensorType::Scmos) > spread(SensorType::Cmos));
        // CCD adds shot noise on top of its reduced read noise
        assert!(spread(SensorType::Ccd) > 0.0);
    }

    #[test]
    fn test_exposure_and_dynamic_range() {
        let frame = Frame::filled(4, 4, PixelLayout::Gray, 100);
        let brighter = sensor().apply(
            &frame,
            &SimulationParameters {
                exposure: 2.0,
                ..Default::default()
            },
        );
        assert_eq!(brighter.get(0, 0, 0), 200);

        let frame = Frame::filled(4, 4, PixelLayout::Gray, 125);
        let stretched = sensor().apply(
            &frame,
            &SimulationParameters {
                dynamic_range: DynamicRange {
                    low: 50.0,
                    high: 150.0,
                },
                ..Default::default()
            },
        );
        assert_eq!(stretched.get(0, 0, 0), 191);
    }

    #[test]
    fn test_cfa_preserves_flat_colour() {
        let frame = Frame::from_fn(10, 8, PixelLayout::Rgb, |_, _, c| [200, 100, 50][c]);
        let out = sensor().apply(
            &frame,
            &SimulationParameters {
                cfa: true,
                ..Default::default()
            },
        );
        assert_eq!(out, frame);
    }

    #[test]
    fn test_cfa_loses_colour_detail() {
        let frame = textured_frame(16, 16, PixelLayout::Rgb, 8);
        let out = sensor().apply(
            &frame,
            &SimulationParameters {
                cfa: true,
                ..Default::default()
            },
        );
        assert_ne!(out, frame);
        // the red sample at an RGGB red site survives untouched
        assert_eq!(out.get(0, 0, 0), frame.get(0, 0, 0));
    }
}
