//! Lens effects: zoom, field of view, radial distortion, vignetting,
//! chromatic aberration and defocus, applied in that order.

use super::params::{DistortionType, PipelineConstants, SimulationParameters};
use super::Stage;
use crate::frame::resample::sample_bilinear_constant;
use crate::frame::{gaussian_blur, resize, FloatFrame, Interpolation, PixelLayout};

#[derive(Debug, Clone, Default)]
pub struct OpticsStage {
    pub constants: PipelineConstants,
}

impl OpticsStage {
    pub fn new(constants: PipelineConstants) -> Self {
        Self { constants }
    }

    fn chromatic_shift(&self, strength: f64) -> usize {
        (strength * self.constants.chromatic_shift_per_unit)
            .round()
            .max(0.0) as usize
    }

    fn is_identity(&self, params: &SimulationParameters) -> bool {
        params.zoom == 1.0
            && (params.field_of_view - self.constants.reference_fov).abs() < 1e-9
            && params.signed_distortion() == 0.0
            && params.vignetting <= 0.0
            && self.chromatic_shift(params.chromatic_aberration) == 0
            && params.defocus <= 0.0
    }
}

impl Stage for OpticsStage {
    fn name(&self) -> &'static str {
        "optics"
    }

    fn process(&self, mut img: FloatFrame, params: &SimulationParameters) -> FloatFrame {
        if img.is_empty() || self.is_identity(params) {
            return img;
        }

        if params.zoom != 1.0 {
            img = apply_zoom(&img, params.zoom);
        }
        if (params.field_of_view - self.constants.reference_fov).abs() >= 1e-9 {
            img = apply_field_of_view(&img, params.field_of_view, self.constants.reference_fov);
        }
        if params.distortion_type != DistortionType::None && params.distortion_intensity != 0.0 {
            img = apply_radial_distortion(&img, params.signed_distortion());
        }
        if params.vignetting > 0.0 {
            apply_vignetting(&mut img, params.vignetting);
        }
        let shift = self.chromatic_shift(params.chromatic_aberration);
        if shift > 0 {
            apply_chromatic_aberration(&mut img, shift);
        }
        if params.defocus > 0.0 {
            let sigma = params.defocus * self.constants.defocus_sigma_per_unit;
            img = gaussian_blur(&img, sigma as f32);
        }
        img
    }
}

/// Centred magnification by `scale` onto a `width` x `height` canvas.
///
/// `src` covers the whole canvas at its own resolution, so a pre-shrunk copy can
/// stand in for the full frame. Samples falling outside `src` are black. The
/// result varies continuously with `scale`.
fn scale_about_center(src: &FloatFrame, width: usize, height: usize, scale: f64) -> FloatFrame {
    let (w, h) = (width as f64, height as f64);
    let step_x = src.width as f64 / w;
    let step_y = src.height as f64 / h;
    let channels = src.channels();
    let mut out = FloatFrame::zeros(width, height, src.layout);
    for y in 0..height {
        let v = h / 2.0 + (y as f64 + 0.5 - h / 2.0) / scale;
        let sy = (v * step_y - 0.5) as f32;
        for x in 0..width {
            let u = w / 2.0 + (x as f64 + 0.5 - w / 2.0) / scale;
            let sx = (u * step_x - 0.5) as f32;
            for c in 0..channels {
                out.set(x, y, c, sample_bilinear_constant(src, sx, sy, c));
            }
        }
    }
    out
}

/// Zoom in by magnifying the centre, or zoom out by shrinking (area) and
/// centring on black.
pub fn apply_zoom(img: &FloatFrame, zoom: f64) -> FloatFrame {
    let zoom = zoom.max(1e-6);
    let (w, h) = (img.width, img.height);
    if zoom == 1.0 {
        return img.clone();
    }
    if zoom > 1.0 {
        return scale_about_center(img, w, h, zoom);
    }
    let shrunk_w = ((w as f64 * zoom).ceil() as usize).max(1);
    let shrunk_h = ((h as f64 * zoom).ceil() as usize).max(1);
    let shrunk = resize(img, shrunk_w, shrunk_h, Interpolation::Area);
    scale_about_center(&shrunk, w, h, zoom)
}

/// Shrinks to `scale` of the frame (bicubic) and brings it back (area).
fn down_up(img: &FloatFrame, scale: f64) -> FloatFrame {
    let (w, h) = (img.width, img.height);
    let new_w = ((w as f64 * scale).round() as usize).max(1);
    let new_h = ((h as f64 * scale) as usize).max(1);
    let shrunk = resize(img, new_w, new_h, Interpolation::Bicubic);
    resize(&shrunk, w, h, Interpolation::Area)
}

/// Rescales by `tan(fov/2) / tan(reference/2)` at constant frame size.
///
/// A wider view magnifies the centre. A narrower one loses detail by a round
/// trip through a smaller frame; the result is blended between the two nearest
/// whole-pixel widths so it changes continuously with `fov`.
pub fn apply_field_of_view(img: &FloatFrame, fov: f64, reference_fov: f64) -> FloatFrame {
    let scale = ((fov / 2.0).to_radians().tan() / (reference_fov / 2.0).to_radians().tan())
        .max(1e-6);
    if scale >= 1.0 {
        return scale_about_center(img, img.width, img.height, scale);
    }

    let w = img.width as f64;
    let exact = (w * scale).max(1.0);
    let lower = exact.floor();
    let t = (exact - lower) as f32;
    let mut out = down_up(img, lower / w);
    if t > 0.0 {
        let upper = down_up(img, (lower + 1.0) / w);
        for (a, b) in out.data.iter_mut().zip(&upper.data) {
            *a += t * (b - *a);
        }
    }
    out
}

/// Single-coefficient radial remap about the image centre.
///
/// Each output pixel samples the source at `c + d * (1 + k * r^2)` where `r^2` is
/// normalized by the squared half-diagonal. Positive `k` gives barrel distortion.
pub fn apply_radial_distortion(img: &FloatFrame, k: f64) -> FloatFrame {
    let (w, h) = (img.width, img.height);
    let cx = w as f64 / 2.0;
    let cy = h as f64 / 2.0;
    let mut norm = cx * cx + cy * cy;
    if norm == 0.0 {
        norm = 1.0;
    }

    let channels = img.channels();
    let mut out = FloatFrame::zeros(w, h, img.layout);
    for y in 0..h {
        for x in 0..w {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let radial = 1.0 + k * (dx * dx + dy * dy) / norm;
            let sx = (cx + dx * radial) as f32;
            let sy = (cy + dy * radial) as f32;
            for c in 0..channels {
                out.set(x, y, c, sample_bilinear_constant(img, sx, sy, c));
            }
        }
    }
    out
}

/// Darkens colour channels by `1 - strength * (r / r_max)^2`.
pub fn apply_vignetting(img: &mut FloatFrame, strength: f64) {
    let cx = img.width as f64 / 2.0;
    let cy = img.height as f64 / 2.0;
    let mut r_max = (cx * cx + cy * cy).sqrt();
    if r_max == 0.0 {
        r_max = 1.0;
    }
    img.map_color(|x, y, v| {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        let r = (dx * dx + dy * dy).sqrt() / r_max;
        let mask = 1.0 - strength * r * r;
        (v as f64 * mask).max(0.0) as f32
    });
}

/// Moves red `shift` pixels right and blue `shift` pixels left, filling the
/// uncovered columns with black. Grayscale frames are left alone; a shift of
/// at least the frame width clears both channels.
pub fn apply_chromatic_aberration(img: &mut FloatFrame, shift: usize) {
    if img.layout == PixelLayout::Gray || shift == 0 {
        return;
    }
    let src = img.clone();
    let w = img.width;
    for y in 0..img.height {
        for x in 0..w {
            let red = if x >= shift {
                src.get(x - shift, y, 0)
            } else {
                0.0
            };
            let blue = if shift < w - x {
                src.get(x + shift, y, 2)
            } else {
                0.0
            };
            img.set(x, y, 0, red);
            img.set(x, y, 2, blue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::test_utils::textured_frame;

    fn optics() -> OpticsStage {
        OpticsStage::default()
    }

    #[test]
    fn test_neutral_parameters_are_identity() {
        let frame = textured_frame(64, 48, PixelLayout::Rgb, 3);
        let out = optics().apply(&frame, &SimulationParameters::default());
        assert_eq!(out, frame);
    }

    #[test]
    fn test_sub_pixel_chromatic_strength_is_identity() {
        let frame = textured_frame(32, 32, PixelLayout::Rgb, 4);
        let params = SimulationParameters {
            chromatic_aberration: 0.05,
            ..Default::default()
        };
        assert_eq!(optics().apply(&frame, &params), frame);
    }

    #[test]
    fn test_distortion_keeps_center_pixel() {
        let frame = textured_frame(64, 64, PixelLayout::Rgb, 11);
        let center = frame.pixel(32, 32).to_vec();

        for distortion_type in [DistortionType::Barrel, DistortionType::Pincushion] {
            for intensity in [0.1, 0.3, 0.5] {
                let params = SimulationParameters {
                    distortion_type,
                    distortion_intensity: intensity,
                    ..Default::default()
                };
                let out = optics().apply(&frame, &params);
                assert_eq!(out.pixel(32, 32), center.as_slice());
            }
        }
    }

    #[test]
    fn test_barrel_pulls_corners_out_of_frame() {
        let frame = Frame::filled(40, 40, PixelLayout::Gray, 200);
        let params = SimulationParameters {
            distortion_type: DistortionType::Barrel,
            distortion_intensity: 0.5,
            ..Default::default()
        };
        let out = optics().apply(&frame, &params);
        assert_eq!(out.get(0, 0, 0), 0);
        assert_eq!(out.get(20, 20, 0), 200);

        // pincushion samples inside the frame everywhere
        let params = SimulationParameters {
            distortion_type: DistortionType::Pincushion,
            ..params
        };
        let out = optics().apply(&frame, &params);
        assert_eq!(out.get(1, 1, 0), 200);
    }

    #[test]
    fn test_zoom_out_pads_with_black() {
        let frame = Frame::filled(40, 20, PixelLayout::Rgb, 180);
        let params = SimulationParameters {
            zoom: 0.5,
            ..Default::default()
        };
        let out = optics().apply(&frame, &params);
        assert_eq!((out.width(), out.height()), (40, 20));
        assert_eq!(out.pixel(0, 0), &[0, 0, 0]);
        assert_eq!(out.pixel(20, 10), &[180, 180, 180]);
    }

    #[test]
    fn test_zoom_in_magnifies_center() {
        // left half dark, right half bright; zooming in keeps the split at the centre
        let frame = Frame::from_fn(40, 40, PixelLayout::Gray, |x, _, _| {
            if x < 20 {
                10
            } else {
                240
            }
        });
        let params = SimulationParameters {
            zoom: 2.0,
            ..Default::default()
        };
        let out = optics().apply(&frame, &params);
        assert_eq!(out.get(2, 20, 0), 10);
        assert_eq!(out.get(37, 20, 0), 240);
    }

    #[test]
    fn test_zoom_and_fov_change_continuously() {
        let img = FloatFrame::from_frame(&textured_frame(48, 40, PixelLayout::Gray, 6));
        let mean_change = |a: &FloatFrame, b: &FloatFrame| {
            a.data.iter().zip(&b.data).map(|(x, y)| (x - y).abs()).sum::<f32>()
                / a.data.len() as f32
        };
        for (from, to) in [(1.2, 1.201), (0.7, 0.701)] {
            let change = mean_change(&apply_zoom(&img, from), &apply_zoom(&img, to));
            assert!(change > 0.0 && change < 1e-2, "zoom {from}: {change}");
        }
        for (from, to) in [(45.0, 45.05), (75.0, 75.05)] {
            let a = apply_field_of_view(&img, from, 60.0);
            let b = apply_field_of_view(&img, to, 60.0);
            let change = mean_change(&a, &b);
            assert!(change > 0.0 && change < 1e-2, "fov {from}: {change}");
        }
    }

    #[test]
    fn test_field_of_view_keeps_size() {
        let frame = textured_frame(48, 32, PixelLayout::Rgb, 5);
        for fov in [30.0, 45.0, 75.0, 90.0] {
            let params = SimulationParameters {
                field_of_view: fov,
                ..Default::default()
            };
            let out = optics().apply(&frame, &params);
            assert_eq!((out.width(), out.height()), (48, 32));
        }
    }

    #[test]
    fn test_vignetting_darkens_corners_only() {
        let frame = Frame::filled(41, 41, PixelLayout::Rgba, 200);
        let params = SimulationParameters {
            vignetting: 0.5,
            ..Default::default()
        };
        let out = optics().apply(&frame, &params);
        assert!(out.get(0, 0, 0) < 120);
        assert!(out.get(20, 20, 0) >= 199);
        // alpha is untouched
        assert_eq!(out.get(0, 0, 3), 200);
    }

    #[test]
    fn test_chromatic_aberration_shifts_red_and_blue() {
        let frame = Frame::from_fn(20, 4, PixelLayout::Rgb, |x, _, c| {
            if x == 10 {
                [255, 128, 64][c]
            } else {
                0
            }
        });
        let params = SimulationParameters {
            chromatic_aberration: 0.4, // round(0.4 * 5) = 2
            ..Default::default()
        };
        let out = optics().apply(&frame, &params);
        assert_eq!(out.get(12, 0, 0), 255);
        assert_eq!(out.get(10, 0, 1), 128);
        assert_eq!(out.get(8, 0, 2), 64);
        assert_eq!(out.get(10, 0, 0), 0);
    }

    #[test]
    fn test_defocus_blurs() {
        let frame = Frame::from_fn(21, 21, PixelLayout::Gray, |x, y, _| {
            if x == 10 && y == 10 {
                255
            } else {
                0
            }
        });
        let params = SimulationParameters {
            defocus: 0.4,
            ..Default::default()
        };
        let out = optics().apply(&frame, &params);
        assert!(out.get(10, 10, 0) < 255);
        assert!(out.get(11, 10, 0) > 0);
    }

    #[test]
    fn test_empty_frame_passes_through() {
        let frame = Frame::filled(0, 10, PixelLayout::Rgb, 0);
        let params = SimulationParameters {
            zoom: 2.0,
            defocus: 1.0,
            ..Default::default()
        };
        assert_eq!(optics().apply(&frame, &params), frame);
    }

    #[test]
    fn test_extreme_chromatic_and_defocus_do_not_panic() {
        let frame = textured_frame(24, 16, PixelLayout::Rgb, 2);
        let mut img = FloatFrame::from_frame(&frame);
        apply_chromatic_aberration(&mut img, usize::MAX);
        let cleared = |c| (0..16).all(|y| (0..24).all(|x| img.get(x, y, c) == 0.0));
        assert!(cleared(0) && cleared(2));

        let params = SimulationParameters {
            chromatic_aberration: 1e19,
            defocus: 1e19,
            ..Default::default()
        };
        let stage = optics();
        let out = stage.apply(&frame, &params);
        assert_eq!((out.width(), out.height()), (24, 16));
        let direct = stage.process(FloatFrame::from_frame(&frame), &params);
        assert!(direct.data.iter().all(|v| v.is_finite()));
    }
}
