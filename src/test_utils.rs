//! Procedural image fixtures for unit tests.

use crate::frame::{Frame, PixelLayout};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;

struct Shape {
    center: (f64, f64),
    half_size: f64,
    round: bool,
    color: [u8; 3],
}

impl Shape {
    fn random(rng: &mut StdRng, width: u32, height: u32) -> Self {
        let max_half = (width.min(height) as f64 / 12.0).max(4.0);
        let level: i32 = if rng.gen_bool(0.5) {
            rng.gen_range(0..60)
        } else {
            rng.gen_range(196..=255)
        };
        let mut color = [0u8; 3];
        for c in color.iter_mut() {
            *c = (level + rng.gen_range(-20..=20)).clamp(0, 255) as u8;
        }
        Self {
            center: (
                rng.gen_range(0.0..width.max(1) as f64),
                rng.gen_range(0.0..height.max(1) as f64),
            ),
            half_size: rng.gen_range(2.0..=max_half),
            round: rng.gen_bool(0.3),
            color,
        }
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        let dx = x - self.center.0;
        let dy = y - self.center.1;
        if self.round {
            dx * dx + dy * dy <= self.half_size * self.half_size
        } else {
            dx.abs() <= self.half_size && dy.abs() <= self.half_size
        }
    }
}

/// High-contrast rectangles and discs over a smooth, position-dependent background.
///
/// The background varies too slowly to produce FAST corners but keeps every
/// descriptor patch distinct. Alpha, when present, is opaque.
pub fn textured_frame(width: u32, height: u32, layout: PixelLayout, seed: u64) -> Frame {
    let mut rng = StdRng::seed_from_u64(seed);
    let phase = [rng.gen_range(0.0..TAU), rng.gen_range(0.0..TAU)];
    let count = (width as usize * height as usize / 700).max(6);
    let shapes: Vec<Shape> = (0..count)
        .map(|_| Shape::random(&mut rng, width, height))
        .collect();
    let color_channels = layout.color_channels();

    Frame::from_fn(width, height, layout, |x, y, c| {
        if c >= color_channels {
            return 255;
        }
        let (xf, yf) = (x as f64, y as f64);
        if let Some(shape) = shapes.iter().rev().find(|s| s.contains(xf, yf)) {
            return shape.color[c];
        }
        let wave = 30.0 * (xf / 13.0 + phase[0]).sin() * (yf / 17.0 + phase[1]).cos()
            + 10.0 * ((xf + yf) / 29.0 + c as f64).sin();
        (128.0 + wave).round() as u8
    })
}
