//! Resampling on [`FloatFrame`].
//!
//! Bilinear and bicubic resizing go through `image::imageops` on an `f32`
//! buffer of the matching pixel type. Area resizing keeps its own box-coverage
//! taps: every output pixel is the exact area-weighted mean of the source pixels
//! it covers, which none of the `imageops` filters reproduce.

use super::{FloatFrame, PixelLayout};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Pixel, Rgb, Rgba};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    Bilinear,
    /// Catmull-Rom cubic.
    Bicubic,
    /// Box-coverage averaging when shrinking, bilinear when enlarging.
    Area,
}

/// An `imageops` operation that works for any `f32` pixel type.
pub(super) trait BufferOp {
    fn run<P>(&self, buffer: &ImageBuffer<P, Vec<f32>>) -> ImageBuffer<P, Vec<f32>>
    where
        P: Pixel<Subpixel = f32> + 'static;
}

/// Runs `op` on `src` viewed as an image buffer of its layout.
pub(super) fn apply_op<O: BufferOp>(src: &FloatFrame, op: &O) -> Option<FloatFrame> {
    fn typed<P, O>(src: &FloatFrame, op: &O) -> Option<(u32, u32, Vec<f32>)>
    where
        P: Pixel<Subpixel = f32> + 'static,
        O: BufferOp,
    {
        let buffer: ImageBuffer<P, Vec<f32>> =
            ImageBuffer::from_raw(src.width as u32, src.height as u32, src.data.clone())?;
        let out = op.run(&buffer);
        Some((out.width(), out.height(), out.into_raw()))
    }

    let (width, height, data) = match src.layout {
        PixelLayout::Gray => typed::<Luma<f32>, O>(src, op)?,
        PixelLayout::Rgb => typed::<Rgb<f32>, O>(src, op)?,
        PixelLayout::Rgba => typed::<Rgba<f32>, O>(src, op)?,
    };
    Some(FloatFrame {
        width: width as usize,
        height: height as usize,
        layout: src.layout,
        data,
    })
}

struct Resize {
    width: u32,
    height: u32,
    filter: FilterType,
}

impl BufferOp for Resize {
    fn run<P>(&self, buffer: &ImageBuffer<P, Vec<f32>>) -> ImageBuffer<P, Vec<f32>>
    where
        P: Pixel<Subpixel = f32> + 'static,
    {
        imageops::resize(buffer, self.width, self.height, self.filter)
    }
}

type Taps = Vec<Vec<(usize, f32)>>;

fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

fn bilinear_taps(src_len: usize, dst_len: usize) -> Taps {
    let scale = src_len as f32 / dst_len as f32;
    (0..dst_len)
        .map(|d| {
            let s = ((d as f32 + 0.5) * scale - 0.5).max(0.0);
            let i0 = s.floor() as isize;
            let t = s - i0 as f32;
            vec![
                (clamp_index(i0, src_len), 1.0 - t),
                (clamp_index(i0 + 1, src_len), t),
            ]
        })
        .collect()
}

fn area_taps(src_len: usize, dst_len: usize) -> Taps {
    if dst_len >= src_len {
        return bilinear_taps(src_len, dst_len);
    }
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|d| {
            let start = d as f64 * scale;
            let end = start + scale;
            let mut taps = Vec::new();
            let mut i = start.floor() as usize;
            while (i as f64) < end && i < src_len {
                let overlap = (end.min(i as f64 + 1.0) - start.max(i as f64)) as f32;
                if overlap > 0.0 {
                    taps.push((i, overlap / scale as f32));
                }
                i += 1;
            }
            taps
        })
        .collect()
}

/// Two 1-D passes of area taps, horizontal then vertical.
fn resize_area(src: &FloatFrame, width: usize, height: usize) -> FloatFrame {
    let channels = src.channels();
    let x_taps = area_taps(src.width, width);
    let y_taps = area_taps(src.height, height);

    // horizontal pass: width x src.height
    let mut horizontal = vec![0.0f32; width * src.height * channels];
    for y in 0..src.height {
        let row = &src.data[y * src.width * channels..(y + 1) * src.width * channels];
        for (x, taps) in x_taps.iter().enumerate() {
            let out = (y * width + x) * channels;
            for &(sx, w) in taps {
                for c in 0..channels {
                    horizontal[out + c] += w * row[sx * channels + c];
                }
            }
        }
    }

    let mut dst = FloatFrame::zeros(width, height, src.layout);
    for (y, taps) in y_taps.iter().enumerate() {
        for &(sy, w) in taps {
            let row = &horizontal[sy * width * channels..(sy + 1) * width * channels];
            let out = &mut dst.data[y * width * channels..(y + 1) * width * channels];
            for (o, v) in out.iter_mut().zip(row) {
                *o += w * v;
            }
        }
    }
    dst
}

/// Resizes `src` to `width` x `height`.
///
/// A zero-area source produces a black frame of the requested size; a zero-area
/// target produces a zero-area frame.
pub fn resize(
    src: &FloatFrame,
    width: usize,
    height: usize,
    interpolation: Interpolation,
) -> FloatFrame {
    if width == 0 || height == 0 || src.is_empty() {
        return FloatFrame::zeros(width, height, src.layout);
    }
    if width == src.width && height == src.height {
        return src.clone();
    }

    let filter = match interpolation {
        Interpolation::Area => return resize_area(src, width, height),
        Interpolation::Bilinear => FilterType::Triangle,
        Interpolation::Bicubic => FilterType::CatmullRom,
    };
    let op = Resize {
        width: width as u32,
        height: height as u32,
        filter,
    };
    apply_op(src, &op).unwrap_or_else(|| FloatFrame::zeros(width, height, src.layout))
}

/// Bilinear sample at a sub-pixel position, treating everything outside the frame as 0.
pub fn sample_bilinear_constant(src: &FloatFrame, x: f32, y: f32, channel: usize) -> f32 {
    if !x.is_finite() || !y.is_finite() {
        return 0.0;
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let tx = x - x0;
    let ty = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let fetch = |xi: i64, yi: i64| -> f32 {
        if xi < 0 || yi < 0 || xi >= src.width as i64 || yi >= src.height as i64 {
            0.0
        } else {
            src.get(xi as usize, yi as usize, channel)
        }
    };

    let top = fetch(x0, y0) * (1.0 - tx) + fetch(x0 + 1, y0) * tx;
    let bottom = fetch(x0, y0 + 1) * (1.0 - tx) + fetch(x0 + 1, y0 + 1) * tx;
    top * (1.0 - ty) + bottom * ty
}
