//! Synthetic calibration target: a projected grid of lines and dots rendered on a
//! white canvas.

use crate::camera::{CameraIntrinsics, Intrinsics, RadTanModel, Resolution};
use crate::frame::{Frame, FrameError, PixelLayout};
use crate::geometry::WorldPointSet;
use log::warn;
use nalgebra::Vector2;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub width: u32,
    pub height: u32,
    /// Cells along each axis of the grid.
    pub grid_size: usize,
    /// Dot radius in world units.
    pub circle_radius_world: f64,
    /// Side length of the pattern in world units.
    pub grid_world_size: f64,
    /// Distance of the pattern plane from the camera.
    pub depth: f64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            grid_size: 8,
            circle_radius_world: 15.0,
            grid_world_size: 500.0,
            depth: 1000.0,
        }
    }
}

/// Renders the calibration pattern as seen through a candidate lens.
#[derive(Debug, Clone)]
pub struct TargetGenerator {
    config: TargetConfig,
    world: WorldPointSet,
}

impl Default for TargetGenerator {
    fn default() -> Self {
        Self::new(TargetConfig::default())
    }
}

impl TargetGenerator {
    pub fn new(config: TargetConfig) -> Self {
        let world =
            WorldPointSet::calibration_grid(config.grid_size, config.grid_world_size, config.depth);
        Self { config, world }
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    pub fn world_points(&self) -> &WorldPointSet {
        &self.world
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.config.width, self.config.height)
    }

    /// Camera looking straight at the pattern with its principal point at the
    /// canvas centre. Only the first five distortion coefficients are used.
    ///
    /// No validation happens here: degenerate lenses show up as non-finite
    /// projections instead.
    pub fn camera(&self, lens: &CameraIntrinsics) -> RadTanModel {
        let resolution = self.resolution();
        let center = resolution.center();
        let pixel = lens.pixel_intrinsics(&resolution);
        let mut distortions = [0.0; 5];
        for (slot, k) in distortions.iter_mut().zip(&lens.distortion) {
            *slot = *k;
        }
        RadTanModel {
            intrinsics: Intrinsics {
                fx: pixel.fx,
                fy: pixel.fy,
                cx: center.x,
                cy: center.y,
            },
            resolution,
            distortions,
        }
    }

    /// Projects every world point, in order.
    ///
    /// # Returns
    ///
    /// `None` if any projected coordinate is non-finite.
    pub fn project(&self, lens: &CameraIntrinsics) -> Option<Vec<Vector2<f64>>> {
        let model = self.camera(lens);
        let projected: Vec<Vector2<f64>> = self
            .world
            .points()
            .iter()
            .map(|p| model.project_unchecked(p))
            .collect();
        projected
            .iter()
            .all(|p| p.x.is_finite() && p.y.is_finite())
            .then_some(projected)
    }

    /// Dot radius in pixels: the world radius scaled by pixels-per-mm and focal length.
    pub fn circle_radius_px(&self, lens: &CameraIntrinsics) -> f64 {
        let ppm = lens.pixels_per_mm(&self.resolution());
        (self.config.circle_radius_world * ppm / 1000.0 * lens.focal_length).floor()
    }

    /// Renders the target as an 8-bit grayscale frame.
    ///
    /// # Arguments
    ///
    /// * `lens` - Focal length, sensor size and distortion of the candidate camera.
    /// * `noise` - Standard deviation of additive Gaussian noise in 8-bit units.
    /// * `seed` - Seeds the noise; `None` draws from the thread RNG.
    pub fn generate(&self, lens: &CameraIntrinsics, noise: f64, seed: Option<u64>) -> Frame {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let mut canvas = vec![255.0f64; w * h];

        match self.project(lens) {
            Some(projected) => {
                let (lines, dots) = projected.split_at(self.world.line_point_count());
                for pair in lines.chunks_exact(2) {
                    draw_line(&mut canvas, w, h, &pair[0], &pair[1]);
                }
                let radius = self.circle_radius_px(lens);
                if radius.is_finite() {
                    for center in dots {
                        draw_disc(&mut canvas, w, h, center, radius);
                    }
                }
            }
            None => warn!("Target projection is not finite, rendering a blank canvas"),
        }

        if noise > 0.0 {
            match seed {
                Some(seed) => add_noise(&mut canvas, noise, &mut StdRng::seed_from_u64(seed)),
                None => add_noise(&mut canvas, noise, &mut rand::thread_rng()),
            }
        }

        Frame::from_fn(self.config.width, self.config.height, PixelLayout::Gray, |x, y, _| {
            canvas[y as usize * w + x as usize].clamp(0.0, 255.0).round() as u8
        })
    }

    /// Renders the target and writes it to `path` in the format implied by the extension.
    pub fn save<P: AsRef<Path>>(
        &self,
        lens: &CameraIntrinsics,
        noise: f64,
        seed: Option<u64>,
        path: P,
    ) -> Result<Frame, FrameError> {
        let frame = self.generate(lens, noise, seed);
        frame.save(path)?;
        Ok(frame)
    }
}

/// Pixel index range covering `[lo, hi]`, clipped to `[0, len)`.
fn span(lo: f64, hi: f64, len: usize) -> Option<(usize, usize)> {
    if len == 0 || hi < 0.0 || lo > (len - 1) as f64 {
        return None;
    }
    let start = lo.max(0.0).floor() as usize;
    let end = hi.min((len - 1) as f64).ceil() as usize;
    Some((start, end))
}

fn darken(canvas: &mut [f64], idx: usize, coverage: f64) {
    let value = 255.0 * (1.0 - coverage.clamp(0.0, 1.0));
    if value < canvas[idx] {
        canvas[idx] = value;
    }
}

/// One-pixel black line with linear coverage fall-off.
fn draw_line(canvas: &mut [f64], w: usize, h: usize, a: &Vector2<f64>, b: &Vector2<f64>) {
    let Some((x0, x1)) = span(a.x.min(b.x) - 1.0, a.x.max(b.x) + 1.0, w) else {
        return;
    };
    let Some((y0, y1)) = span(a.y.min(b.y) - 1.0, a.y.max(b.y) + 1.0, h) else {
        return;
    };
    let ab = b - a;
    let len2 = ab.norm_squared();
    for y in y0..=y1 {
        for x in x0..=x1 {
            let p = Vector2::new(x as f64, y as f64);
            let t = if len2 > 0.0 {
                ((p - a).dot(&ab) / len2).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let d = (p - (a + ab * t)).norm();
            darken(canvas, y * w + x, 1.0 - d);
        }
    }
}

/// Filled black disc with a one-pixel anti-aliased rim.
fn draw_disc(canvas: &mut [f64], w: usize, h: usize, center: &Vector2<f64>, radius: f64) {
    let reach = radius + 1.0;
    let Some((x0, x1)) = span(center.x - reach, center.x + reach, w) else {
        return;
    };
    let Some((y0, y1)) = span(center.y - reach, center.y + reach, h) else {
        return;
    };
    for y in y0..=y1 {
        for x in x0..=x1 {
            let d = (Vector2::new(x as f64, y as f64) - center).norm();
            darken(canvas, y * w + x, radius + 0.5 - d);
        }
    }
}

fn add_noise(canvas: &mut [f64], std: f64, rng: &mut dyn RngCore) {
    if let Ok(normal) = Normal::new(0.0, std) {
        for v in canvas.iter_mut() {
            *v += normal.sample(&mut *rng);
        }
    }
}
