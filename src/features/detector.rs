//! AKAZE keypoints with binary MLDB descriptors.

use super::{FeatureConfig, FeatureError};
use crate::frame::Frame;
use akaze::Akaze;
use bitarray::BitArray;
use log::debug;

/// MLDB descriptor bits, packed into 64 bytes.
pub type Descriptor = BitArray<64>;

/// Frames narrower or shorter than this have no scale space to search.
pub const MIN_EXTENT: u32 = 40;

/// A detected keypoint in pixel coordinates of the full-resolution image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    pub response: f32,
    pub size: f32,
    pub angle: f32,
}

impl From<&akaze::KeyPoint> for Keypoint {
    fn from(keypoint: &akaze::KeyPoint) -> Self {
        Self {
            x: keypoint.point.0 as f64,
            y: keypoint.point.1 as f64,
            response: keypoint.response,
            size: keypoint.size,
            angle: keypoint.angle,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureDetector {
    akaze: Akaze,
}

impl FeatureDetector {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            akaze: Akaze::new(config.detector_threshold),
        }
    }

    /// Keypoints and their descriptors, index-aligned.
    ///
    /// Frames below [`MIN_EXTENT`] on either side and frames without any
    /// contrast yield no keypoints.
    ///
    /// # Errors
    ///
    /// [`FeatureError::InvalidImage`] if the grayscale buffer cannot be wrapped.
    pub fn detect_and_describe(
        &self,
        frame: &Frame,
    ) -> Result<(Vec<Keypoint>, Vec<Descriptor>), FeatureError> {
        let gray = frame.to_gray();
        if gray.width() < MIN_EXTENT || gray.height() < MIN_EXTENT {
            debug!(
                "Skipping detection on a {}x{} frame",
                gray.width(),
                gray.height()
            );
            return Ok((Vec::new(), Vec::new()));
        }
        if is_flat(&gray) {
            debug!("Skipping detection on a frame without contrast");
            return Ok((Vec::new(), Vec::new()));
        }

        let (keypoints, descriptors) = self.akaze.extract(&akaze_image(gray)?);
        Ok((keypoints.iter().map(Keypoint::from).collect(), descriptors))
    }
}

fn is_flat(gray: &Frame) -> bool {
    let data = gray.data();
    data.first()
        .map_or(true, |&first| data.iter().all(|&v| v == first))
}

fn akaze_image(gray: Frame) -> Result<image024::DynamicImage, FeatureError> {
    let (width, height) = (gray.width(), gray.height());
    image024::GrayImage::from_raw(width, height, gray.into_raw())
        .map(image024::DynamicImage::ImageLuma8)
        .ok_or_else(|| FeatureError::InvalidImage("buffer does not match dimensions".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;
    use crate::test_utils::textured_frame;

    fn detector() -> FeatureDetector {
        FeatureDetector::new(&FeatureConfig::default())
    }

    #[test]
    fn test_small_and_flat_frames_have_no_keypoints() {
        let small = textured_frame(32, 128, PixelLayout::Gray, 3);
        let (keypoints, descriptors) = detector().detect_and_describe(&small).unwrap();
        assert!(keypoints.is_empty() && descriptors.is_empty());

        let flat = Frame::filled(128, 128, PixelLayout::Rgb, 77);
        let (keypoints, _) = detector().detect_and_describe(&flat).unwrap();
        assert!(keypoints.is_empty());
    }

    #[test]
    fn test_keypoints_lie_inside_the_frame() {
        let frame = textured_frame(200, 160, PixelLayout::Rgb, 7);
        let (keypoints, descriptors) = detector().detect_and_describe(&frame).unwrap();
        assert!(!keypoints.is_empty());
        assert_eq!(keypoints.len(), descriptors.len());
        for keypoint in &keypoints {
            assert!((0.0..200.0).contains(&keypoint.x), "{keypoint:?}");
            assert!((0.0..160.0).contains(&keypoint.y), "{keypoint:?}");
        }
    }

    #[test]
    fn test_gray_and_colour_inputs_agree() {
        let colour = textured_frame(120, 120, PixelLayout::Rgb, 5);
        let (from_colour, _) = detector().detect_and_describe(&colour).unwrap();
        let (from_gray, _) = detector().detect_and_describe(&colour.to_gray()).unwrap();
        assert_eq!(from_colour, from_gray);
    }
}
