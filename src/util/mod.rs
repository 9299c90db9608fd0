//! Image comparison metrics, reprojection statistics and correspondence export.

use crate::features::FeatureCorrespondence;
use crate::frame::{resize, FloatFrame, Frame, FrameError, Interpolation, PixelLayout};
use crate::optimization::reprojection::project;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Side of the square SSIM window.
const SSIM_WINDOW: usize = 7;

/// Ensure the output directory exists
pub fn ensure_output_dir() -> Result<(), UtilError> {
    let output_dir = Path::new("output");
    if !output_dir.exists() {
        fs::create_dir_all(output_dir)?;
    }
    Ok(())
}

#[derive(thiserror::Error, Debug)]
pub enum UtilError {
    #[error("Zero projection points")]
    ZeroProjectionPoints,
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionError {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl fmt::Debug for ProjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Projection Error [ rmse: {}, min: {}, max: {}, mean: {}, stddev: {}, median: {} ]",
            self.rmse, self.min, self.max, self.mean, self.stddev, self.median
        )
    }
}

/// Summary statistics of per-point pixel errors. Non-finite errors are skipped.
pub fn projection_statistics(errors: &[f64]) -> Result<ProjectionError, UtilError> {
    let mut sorted: Vec<f64> = errors.iter().copied().filter(|e| e.is_finite()).collect();
    if sorted.is_empty() {
        return Err(UtilError::ZeroProjectionPoints);
    }
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let rmse = (sorted.iter().map(|x| x * x).sum::<f64>() / n).sqrt();

    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    Ok(ProjectionError {
        rmse,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean,
        stddev: variance.sqrt(),
        median,
    })
}

/// Pixel errors of `[focal_length, k1, cx, cy]` on matched points, summarized.
pub fn reprojection_statistics(
    correspondences: &FeatureCorrespondence,
    params: &[f64],
) -> Result<ProjectionError, UtilError> {
    if params.len() != 4 {
        return Err(UtilError::InvalidParams(format!(
            "expected 4 camera parameters, got {}",
            params.len()
        )));
    }
    let errors: Vec<f64> = correspondences
        .iter()
        .map(|(base, target)| (project(params, base) - target).norm())
        .collect();
    projection_statistics(&errors)
}

/// Image quality metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageQualityMetrics {
    pub mse: f64,
    pub psnr: f64,
    pub ssim: f64,
}

/// Grayscale planes of `a` and `b`, with `a` resized to `b` when sizes differ.
struct GrayPair {
    a: Vec<f64>,
    b: Vec<f64>,
    width: usize,
    height: usize,
}

impl GrayPair {
    fn new(a: &Frame, b: &Frame) -> Result<Self, UtilError> {
        if a.is_empty() || b.is_empty() {
            return Err(UtilError::InvalidParams("cannot compare empty images".to_string()));
        }
        let a = a.to_gray();
        let b = b.to_gray();
        let a = if (a.width(), a.height()) == (b.width(), b.height()) {
            a
        } else {
            resize(
                &FloatFrame::from_frame(&a),
                b.width() as usize,
                b.height() as usize,
                Interpolation::Bilinear,
            )
            .to_frame()
        };
        Ok(Self {
            a: a.data().iter().map(|&v| v as f64).collect(),
            b: b.data().iter().map(|&v| v as f64).collect(),
            width: b.width() as usize,
            height: b.height() as usize,
        })
    }

    fn mse(&self) -> f64 {
        let sum: f64 = self.a.iter().zip(&self.b).map(|(x, y)| (x - y).powi(2)).sum();
        sum / self.a.len() as f64
    }

    /// Max minus min of the second image, or 255 when it is flat.
    fn data_range(&self) -> f64 {
        let (min, max) = self
            .b
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if max > min {
            max - min
        } else {
            255.0
        }
    }
}

/// Mean squared error in 8-bit grayscale units.
pub fn mse(a: &Frame, b: &Frame) -> Result<f64, UtilError> {
    Ok(GrayPair::new(a, b)?.mse())
}

/// Peak signal-to-noise ratio in dB; infinite for identical images.
pub fn psnr(a: &Frame, b: &Frame) -> Result<f64, UtilError> {
    let pair = GrayPair::new(a, b)?;
    let mse = pair.mse();
    if mse == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(10.0 * (pair.data_range().powi(2) / mse).log10())
}

/// Mean structural similarity over every 7x7 window (uniform weights, sample
/// variances).
pub fn ssim(a: &Frame, b: &Frame) -> Result<f64, UtilError> {
    let pair = GrayPair::new(a, b)?;
    let (w, h) = (pair.width, pair.height);
    if w < SSIM_WINDOW || h < SSIM_WINDOW {
        return Err(UtilError::InvalidParams(format!(
            "SSIM needs at least {SSIM_WINDOW}x{SSIM_WINDOW} pixels, got {w}x{h}"
        )));
    }

    let range = pair.data_range();
    let c1 = (0.01 * range).powi(2);
    let c2 = (0.03 * range).powi(2);
    let n = (SSIM_WINDOW * SSIM_WINDOW) as f64;

    let mut total = 0.0;
    let mut count = 0usize;
    for y in 0..=(h - SSIM_WINDOW) {
        for x in 0..=(w - SSIM_WINDOW) {
            let window = || {
                (y..y + SSIM_WINDOW)
                    .flat_map(move |wy| (x..x + SSIM_WINDOW).map(move |wx| wy * w + wx))
            };
            let mu_a = window().map(|i| pair.a[i]).sum::<f64>() / n;
            let mu_b = window().map(|i| pair.b[i]).sum::<f64>() / n;
            let (mut var_a, mut var_b, mut cov) = (0.0, 0.0, 0.0);
            for i in window() {
                let da = pair.a[i] - mu_a;
                let db = pair.b[i] - mu_b;
                var_a += da * da;
                var_b += db * db;
                cov += da * db;
            }
            var_a /= n - 1.0;
            var_b /= n - 1.0;
            cov /= n - 1.0;

            let numerator = (2.0 * mu_a * mu_b + c1) * (2.0 * cov + c2);
            let denominator = (mu_a * mu_a + mu_b * mu_b + c1) * (var_a + var_b + c2);
            total += numerator / denominator;
            count += 1;
        }
    }
    Ok(total / count as f64)
}

pub fn compute_image_quality_metrics(
    a: &Frame,
    b: &Frame,
) -> Result<ImageQualityMetrics, UtilError> {
    Ok(ImageQualityMetrics {
        mse: mse(a, b)?,
        psnr: psnr(a, b)?,
        ssim: ssim(a, b)?,
    })
}

/// JET colour for `v` in `[0, 1]`: dark blue through cyan, yellow and red.
pub fn jet(v: f64) -> [u8; 3] {
    let v = v.clamp(0.0, 1.0);
    let channel = |offset: f64| {
        let c = (1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0);
        (c * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Absolute grayscale difference, min-max normalized and JET-colourized.
pub fn difference_map(a: &Frame, b: &Frame) -> Result<Frame, UtilError> {
    let pair = GrayPair::new(a, b)?;
    let diff: Vec<f64> = pair.a.iter().zip(&pair.b).map(|(x, y)| (x - y).abs()).collect();
    let (min, max) = diff
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let span = if max > min { max - min } else { 1.0 };

    let width = pair.width;
    Ok(Frame::from_fn(
        pair.width as u32,
        pair.height as u32,
        PixelLayout::Rgb,
        |x, y, c| {
            let v = diff[y as usize * width + x as usize];
            jet((v - min) / span)[c]
        },
    ))
}

/// 256-bin histogram of the grayscale image.
pub fn histogram(frame: &Frame) -> [u32; 256] {
    let mut bins = [0u32; 256];
    for &v in frame.to_gray().data() {
        bins[v as usize] += 1;
    }
    bins
}

#[derive(Debug, Serialize)]
struct CorrespondenceRow {
    base_x: f64,
    base_y: f64,
    target_x: f64,
    target_y: f64,
}

/// Writes one CSV row per correspondence after a `base_x,base_y,target_x,target_y` header.
pub fn write_correspondences<W: io::Write>(
    correspondences: &FeatureCorrespondence,
    writer: W,
) -> Result<(), UtilError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for (base, target) in correspondences.iter() {
        csv_writer.serialize(CorrespondenceRow {
            base_x: base.x,
            base_y: base.y,
            target_x: target.x,
            target_y: target.y,
        })?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Exports correspondences to a CSV file at `path`.
pub fn export_correspondences<P: AsRef<Path>>(
    correspondences: &FeatureCorrespondence,
    path: P,
) -> Result<(), UtilError> {
    let file = fs::File::create(path)?;
    write_correspondences(correspondences, io::BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::textured_frame;
    use approx::assert_relative_eq;
    use nalgebra::Vector2;

    #[test]
    fn test_identical_images() {
        let frame = textured_frame(40, 30, PixelLayout::Rgb, 7);
        let metrics = compute_image_quality_metrics(&frame, &frame).unwrap();
        assert_eq!(metrics.mse, 0.0);
        assert!(metrics.psnr.is_infinite());
        assert_relative_eq!(metrics.ssim, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_constant_offset() {
        let a = Frame::from_fn(16, 16, PixelLayout::Gray, |x, _, _| (x * 10) as u8);
        let b = Frame::from_fn(16, 16, PixelLayout::Gray, |x, _, _| (x * 10 + 5) as u8);
        assert_relative_eq!(mse(&a, &b).unwrap(), 25.0);
        // data range of b is 150
        assert_relative_eq!(
            psnr(&a, &b).unwrap(),
            10.0 * (150.0f64 * 150.0 / 25.0).log10(),
            epsilon = 1e-9
        );
        let s = ssim(&a, &b).unwrap();
        assert!(s > 0.9 && s < 1.0, "ssim {s}");
    }

    #[test]
    fn test_first_image_is_resized_to_second() {
        let small = Frame::filled(10, 10, PixelLayout::Gray, 80);
        let large = Frame::filled(20, 16, PixelLayout::Rgb, 80);
        assert_eq!(mse(&small, &large).unwrap(), 0.0);
        let map = difference_map(&small, &large).unwrap();
        assert_eq!((map.width(), map.height()), (20, 16));
    }

    #[test]
    fn test_small_and_empty_inputs() {
        let tiny = Frame::filled(5, 5, PixelLayout::Gray, 0);
        assert!(matches!(ssim(&tiny, &tiny), Err(UtilError::InvalidParams(_))));
        let empty = Frame::filled(0, 0, PixelLayout::Gray, 0);
        assert!(mse(&empty, &tiny).is_err());
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0.0), [0, 0, 128]);
        assert_eq!(jet(0.5), [128, 255, 128]);
        assert_eq!(jet(1.0), [128, 0, 0]);
    }

    #[test]
    fn test_difference_map_highlights_change() {
        let a = Frame::filled(8, 8, PixelLayout::Gray, 100);
        let b = Frame::from_fn(8, 8, PixelLayout::Gray, |x, y, _| {
            if (x, y) == (3, 4) {
                200
            } else {
                100
            }
        });
        let map = difference_map(&a, &b).unwrap();
        assert_eq!(map.pixel(3, 4), &[128, 0, 0]);
        assert_eq!(map.pixel(0, 0), &[0, 0, 128]);
    }

    #[test]
    fn test_histogram_counts_pixels() {
        let frame = Frame::from_fn(4, 2, PixelLayout::Gray, |x, _, _| if x < 1 { 7 } else { 250 });
        let bins = histogram(&frame);
        assert_eq!(bins[7], 2);
        assert_eq!(bins[250], 6);
        assert_eq!(bins.iter().sum::<u32>(), 8);
    }

    #[test]
    fn test_projection_statistics() {
        let stats = projection_statistics(&[3.0, 1.0, f64::NAN, 2.0, 4.0]).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_relative_eq!(stats.mean, 2.5);
        assert_relative_eq!(stats.median, 2.5);
        assert_relative_eq!(stats.rmse, 7.5f64.sqrt());
        assert_relative_eq!(stats.stddev, 1.25f64.sqrt());
        assert!(matches!(
            projection_statistics(&[]),
            Err(UtilError::ZeroProjectionPoints)
        ));
    }

    #[test]
    fn test_reprojection_statistics_at_truth() {
        let params = [100.0, -0.1, 50.0, 40.0];
        let base: Vec<Vector2<f64>> = (0..10)
            .map(|i| Vector2::new(10.0 + 8.0 * i as f64, 20.0 + 3.0 * i as f64))
            .collect();
        let target = base.iter().map(|p| project(&params, p)).collect();
        let pairs = FeatureCorrespondence::new(base, target).unwrap();
        let stats = reprojection_statistics(&pairs, &params).unwrap();
        assert_relative_eq!(stats.max, 0.0);
        assert!(reprojection_statistics(&pairs, &params[..2]).is_err());
    }

    #[test]
    fn test_correspondence_csv() {
        let pairs = FeatureCorrespondence::new(
            vec![Vector2::new(1.0, 2.5)],
            vec![Vector2::new(3.0, 4.25)],
        )
        .unwrap();
        let mut buffer = Vec::new();
        write_correspondences(&pairs, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, "base_x,base_y,target_x,target_y\n1.0,2.5,3.0,4.25\n");
    }
}
