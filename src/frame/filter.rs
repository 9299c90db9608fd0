use super::resample::{apply_op, BufferOp};
use super::FloatFrame;
use image::imageops;
use image::{ImageBuffer, Pixel};

struct Blur {
    sigma: f32,
}

impl BufferOp for Blur {
    fn run<P>(&self, buffer: &ImageBuffer<P, Vec<f32>>) -> ImageBuffer<P, Vec<f32>>
    where
        P: Pixel<Subpixel = f32> + 'static,
    {
        imageops::blur(buffer, self.sigma)
    }
}

/// Gaussian blur applied to each channel independently.
///
/// A non-positive `sigma` returns an unchanged copy. Sigmas beyond the larger
/// frame side are capped there, which already flattens the frame.
pub fn gaussian_blur(src: &FloatFrame, sigma: f32) -> FloatFrame {
    if !(sigma > 0.0) || src.is_empty() {
        return src.clone();
    }
    let sigma = sigma.min(src.width.max(src.height) as f32);
    apply_op(src, &Blur { sigma }).unwrap_or_else(|| src.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;
    use approx::assert_relative_eq;

    #[test]
    fn test_blur_preserves_mean_and_spreads_impulse() {
        let mut src = FloatFrame::zeros(21, 21, PixelLayout::Gray);
        src.set(10, 10, 0, 1.0);
        let dst = gaussian_blur(&src, 1.5);

        let total: f32 = dst.data.iter().sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-3);
        assert!(dst.get(10, 10, 0) < 1.0);
        assert!(dst.get(11, 10, 0) > 0.0);
        assert_relative_eq!(dst.get(9, 10, 0), dst.get(11, 10, 0), epsilon = 1e-6);
    }

    #[test]
    fn test_blur_never_mixes_channels() {
        let mut src = FloatFrame::zeros(9, 9, PixelLayout::Rgb);
        for y in 0..9 {
            for x in 0..9 {
                src.set(x, y, 0, 1.0);
            }
        }
        let dst = gaussian_blur(&src, 2.0);
        for y in 0..9 {
            for x in 0..9 {
                assert_relative_eq!(dst.get(x, y, 0), 1.0, epsilon = 1e-5);
                assert_eq!(dst.get(x, y, 1), 0.0);
                assert_eq!(dst.get(x, y, 2), 0.0);
            }
        }
    }

    #[test]
    fn test_zero_sigma_is_identity() {
        let mut src = FloatFrame::zeros(3, 3, PixelLayout::Gray);
        src.set(1, 1, 0, 0.7);
        assert_eq!(gaussian_blur(&src, 0.0), src);
        assert_eq!(gaussian_blur(&src, f32::NAN), src);
    }

    #[test]
    fn test_huge_sigma_is_capped() {
        let mut src = FloatFrame::zeros(6, 4, PixelLayout::Rgba);
        src.set(2, 2, 0, 1.0);
        let dst = gaussian_blur(&src, 1e30);
        assert_eq!((dst.width, dst.height), (6, 4));
        assert!(dst.data.iter().all(|v| v.is_finite()));
    }
}
