//! Pixel buffers passed between pipeline stages.
//!
//! [`Frame`] is the 8-bit interchange format (what callers hand in and get back);
//! [`FloatFrame`] is the normalized `[0, 1]` working copy a stage operates on.
//! Conversions to and from [`image::DynamicImage`] keep the `image` crate at the edge.

use crate::camera::Resolution;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod filter;
pub mod resample;

pub use filter::gaussian_blur;
pub use resample::{resize, Interpolation};

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
    #[error("Unsupported channel count {0}, expected 1, 3 or 4")]
    UnsupportedChannels(usize),
    #[error("Image error: {0}")]
    ImageError(String),
}

impl From<image::ImageError> for FrameError {
    fn from(err: image::ImageError) -> Self {
        FrameError::ImageError(err.to_string())
    }
}

/// Channel layout of a frame. Colour frames are stored in RGB(A) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelLayout {
    Gray,
    Rgb,
    Rgba,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Gray => 1,
            PixelLayout::Rgb => 3,
            PixelLayout::Rgba => 4,
        }
    }

    /// Channels that carry colour, i.e. everything except alpha.
    pub fn color_channels(self) -> usize {
        match self {
            PixelLayout::Gray => 1,
            PixelLayout::Rgb | PixelLayout::Rgba => 3,
        }
    }

    pub fn from_channels(channels: usize) -> Result<Self, FrameError> {
        match channels {
            1 => Ok(PixelLayout::Gray),
            3 => Ok(PixelLayout::Rgb),
            4 => Ok(PixelLayout::Rgba),
            other => Err(FrameError::UnsupportedChannels(other)),
        }
    }
}

/// An interleaved 8-bit image, `height` rows of `width * channels` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    layout: PixelLayout,
    data: Vec<u8>,
}

impl Frame {
    /// Wraps raw interleaved bytes.
    ///
    /// # Errors
    ///
    /// [`FrameError::InvalidFrame`] if `data.len() != width * height * channels`.
    pub fn new(
        width: u32,
        height: u32,
        layout: PixelLayout,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * layout.channels();
        if data.len() != expected {
            return Err(FrameError::InvalidFrame(format!(
                "{}x{}x{} frame needs {} bytes, got {}",
                width,
                height,
                layout.channels(),
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            layout,
            data,
        })
    }

    pub fn filled(width: u32, height: u32, layout: PixelLayout, value: u8) -> Self {
        Self {
            width,
            height,
            layout,
            data: vec![value; width as usize * height as usize * layout.channels()],
        }
    }

    pub fn from_fn<F>(width: u32, height: u32, layout: PixelLayout, mut f: F) -> Self
    where
        F: FnMut(u32, u32, usize) -> u8,
    {
        let channels = layout.channels();
        let mut data = Vec::with_capacity(width as usize * height as usize * channels);
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    data.push(f(x, y, c));
                }
            }
        }
        Self {
            width,
            height,
            layout,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// A frame with no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn get(&self, x: u32, y: u32, channel: usize) -> u8 {
        self.data[(y as usize * self.width as usize + x as usize) * self.channels() + channel]
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let channels = self.channels();
        let start = (y as usize * self.width as usize + x as usize) * channels;
        &self.data[start..start + channels]
    }

    /// Luma with BT.601 weights, the conversion used for feature detection and metrics.
    pub fn to_gray(&self) -> Frame {
        if self.layout == PixelLayout::Gray {
            return self.clone();
        }
        let channels = self.channels();
        let data = self
            .data
            .chunks_exact(channels)
            .map(|px| {
                let luma = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                luma.round().clamp(0.0, 255.0) as u8
            })
            .collect();
        Frame {
            width: self.width,
            height: self.height,
            layout: PixelLayout::Gray,
            data,
        }
    }

    /// Converts to another layout. Gray expands by replication, alpha is added opaque.
    pub fn to_layout(&self, layout: PixelLayout) -> Frame {
        if layout == self.layout {
            return self.clone();
        }
        if layout == PixelLayout::Gray {
            return self.to_gray();
        }
        let src_channels = self.channels();
        let mut data =
            Vec::with_capacity(self.width as usize * self.height as usize * layout.channels());
        for px in self.data.chunks_exact(src_channels) {
            let (r, g, b) = match self.layout {
                PixelLayout::Gray => (px[0], px[0], px[0]),
                _ => (px[0], px[1], px[2]),
            };
            data.extend_from_slice(&[r, g, b]);
            if layout == PixelLayout::Rgba {
                data.push(if self.layout == PixelLayout::Rgba {
                    px[3]
                } else {
                    255
                });
            }
        }
        Frame {
            width: self.width,
            height: self.height,
            layout,
            data,
        }
    }

    pub fn from_dynamic(image: &DynamicImage) -> Frame {
        let color = image.color();
        if color.has_alpha() {
            let rgba = image.to_rgba8();
            let (width, height) = rgba.dimensions();
            Frame {
                width,
                height,
                layout: PixelLayout::Rgba,
                data: rgba.into_raw(),
            }
        } else if color.channel_count() == 1 {
            let gray = image.to_luma8();
            let (width, height) = gray.dimensions();
            Frame {
                width,
                height,
                layout: PixelLayout::Gray,
                data: gray.into_raw(),
            }
        } else {
            let rgb = image.to_rgb8();
            let (width, height) = rgb.dimensions();
            Frame {
                width,
                height,
                layout: PixelLayout::Rgb,
                data: rgb.into_raw(),
            }
        }
    }

    pub fn to_dynamic(&self) -> Result<DynamicImage, FrameError> {
        let invalid = || FrameError::InvalidFrame("buffer does not match dimensions".to_string());
        let (w, h, data) = (self.width, self.height, self.data.clone());
        Ok(match self.layout {
            PixelLayout::Gray => {
                DynamicImage::ImageLuma8(GrayImage::from_raw(w, h, data).ok_or_else(invalid)?)
            }
            PixelLayout::Rgb => {
                DynamicImage::ImageRgb8(RgbImage::from_raw(w, h, data).ok_or_else(invalid)?)
            }
            PixelLayout::Rgba => {
                DynamicImage::ImageRgba8(RgbaImage::from_raw(w, h, data).ok_or_else(invalid)?)
            }
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Frame, FrameError> {
        let image = image::open(path)?;
        Ok(Frame::from_dynamic(&image))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), FrameError> {
        if self.is_empty() {
            return Err(FrameError::InvalidFrame(
                "cannot encode a zero-area frame".to_string(),
            ));
        }
        self.to_dynamic()?.save(path)?;
        Ok(())
    }
}

/// Normalized working buffer. Values are nominally in `[0, 1]` but stages may
/// overshoot before the final clip.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatFrame {
    pub width: usize,
    pub height: usize,
    pub layout: PixelLayout,
    pub data: Vec<f32>,
}

impl FloatFrame {
    pub fn zeros(width: usize, height: usize, layout: PixelLayout) -> Self {
        Self {
            width,
            height,
            layout,
            data: vec![0.0; width * height * layout.channels()],
        }
    }

    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            width: frame.width as usize,
            height: frame.height as usize,
            layout: frame.layout,
            data: frame.data.iter().map(|&v| v as f32 / 255.0).collect(),
        }
    }

    /// Clips to `[0, 1]` and rounds back to 8 bit.
    pub fn to_frame(&self) -> Frame {
        Frame {
            width: self.width as u32,
            height: self.height as u32,
            layout: self.layout,
            data: self
                .data
                .iter()
                .map(|&v| {
                    if v.is_nan() {
                        0
                    } else {
                        (v.clamp(0.0, 1.0) * 255.0).round() as u8
                    }
                })
                .collect(),
        }
    }

    /// Layout conversion matching [`Frame::to_layout`] without rounding.
    pub fn to_layout(&self, layout: PixelLayout) -> FloatFrame {
        if layout == self.layout {
            return self.clone();
        }
        let src_channels = self.channels();
        let mut data = Vec::with_capacity(self.width * self.height * layout.channels());
        for px in self.data.chunks_exact(src_channels) {
            let (r, g, b) = match self.layout {
                PixelLayout::Gray => (px[0], px[0], px[0]),
                _ => (px[0], px[1], px[2]),
            };
            match layout {
                PixelLayout::Gray => data.push(0.299 * r + 0.587 * g + 0.114 * b),
                PixelLayout::Rgb => data.extend_from_slice(&[r, g, b]),
                PixelLayout::Rgba => {
                    let alpha = if self.layout == PixelLayout::Rgba {
                        px[3]
                    } else {
                        1.0
                    };
                    data.extend_from_slice(&[r, g, b, alpha]);
                }
            }
        }
        FloatFrame {
            width: self.width,
            height: self.height,
            layout,
            data,
        }
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, channel: usize) -> usize {
        (y * self.width + x) * self.channels() + channel
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, channel: usize) -> f32 {
        self.data[self.index(x, y, channel)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, channel: usize, value: f32) {
        let idx = self.index(x, y, channel);
        self.data[idx] = value;
    }

    /// Applies `f(x, y, value)` to every colour sample, leaving alpha untouched.
    pub fn map_color<F>(&mut self, mut f: F)
    where
        F: FnMut(usize, usize, f32) -> f32,
    {
        let channels = self.channels();
        let color = self.layout.color_channels();
        for y in 0..self.height {
            for x in 0..self.width {
                let base = (y * self.width + x) * channels;
                for c in 0..color {
                    self.data[base + c] = f(x, y, self.data[base + c]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rejects_bad_buffer() {
        assert!(matches!(
            Frame::new(4, 4, PixelLayout::Rgb, vec![0; 10]),
            Err(FrameError::InvalidFrame(_))
        ));
        assert!(matches!(
            PixelLayout::from_channels(2),
            Err(FrameError::UnsupportedChannels(2))
        ));
    }

    #[test]
    fn test_float_round_trip_is_exact() {
        let frame = Frame::from_fn(16, 8, PixelLayout::Rgba, |x, y, c| {
            (x * 13 + y * 7 + c as u32 * 31) as u8
        });
        assert_eq!(FloatFrame::from_frame(&frame).to_frame(), frame);
    }

    #[test]
    fn test_float_layout_conversion_matches_frame() {
        let frame = Frame::from_fn(5, 3, PixelLayout::Rgba, |x, y, c| {
            (x * 40 + y * 11 + c as u32 * 23) as u8
        });
        let float = FloatFrame::from_frame(&frame);
        for from in [PixelLayout::Gray, PixelLayout::Rgb, PixelLayout::Rgba] {
            for to in [PixelLayout::Gray, PixelLayout::Rgb, PixelLayout::Rgba] {
                let source = frame.to_layout(from);
                let converted = FloatFrame::from_frame(&source).to_layout(to);
                assert_eq!(converted.layout, to);
                assert_eq!(converted.to_frame(), source.to_layout(to), "{from:?} -> {to:?}");
            }
        }
        assert_eq!(float.to_layout(PixelLayout::Rgba), float);
    }

    #[test]
    fn test_to_gray_weights() {
        let frame = Frame::new(2, 1, PixelLayout::Rgb, vec![255, 0, 0, 0, 255, 0]).unwrap();
        let gray = frame.to_gray();
        assert_eq!(gray.layout(), PixelLayout::Gray);
        assert_eq!(gray.data(), &[76, 150]);
    }

    #[test]
    fn test_layout_conversion() {
        let gray = Frame::filled(3, 2, PixelLayout::Gray, 42);
        let rgba = gray.to_layout(PixelLayout::Rgba);
        assert_eq!(rgba.pixel(1, 1), &[42, 42, 42, 255]);
        assert_eq!(rgba.to_layout(PixelLayout::Gray), gray);
    }

    #[test]
    fn test_dynamic_image_conversion() {
        let frame = Frame::from_fn(5, 3, PixelLayout::Rgb, |x, y, c| (x + y + c as u32) as u8);
        let dynamic = frame.to_dynamic().unwrap();
        assert_eq!(dynamic.width(), 5);
        assert_eq!(Frame::from_dynamic(&dynamic), frame);
    }

    #[test]
    fn test_map_color_skips_alpha() {
        let frame = Frame::filled(2, 2, PixelLayout::Rgba, 100);
        let mut float = FloatFrame::from_frame(&frame);
        float.map_color(|_, _, _| 0.0);
        let out = float.to_frame();
        assert_eq!(out.pixel(0, 0), &[0, 0, 0, 100]);
    }
}
