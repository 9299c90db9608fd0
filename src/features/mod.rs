//! Feature correspondences between two images: AKAZE keypoints, cross-checked
//! Hamming matching and the pruning the estimator relies on.

pub mod detector;
pub mod matching;

pub use detector::{Descriptor, FeatureDetector, Keypoint};
pub use matching::{cross_check_match, hamming, Match};

use crate::frame::Frame;
use log::{debug, info};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("No descriptors found in the {0} image")]
    InsufficientFeatures(String),
    #[error("Only {found} matches survived, at least {required} are required")]
    InsufficientMatches { found: usize, required: usize },
    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Minimum Hessian response of an AKAZE keypoint.
    pub detector_threshold: f64,
    pub max_matches: usize,
    pub min_matches: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            detector_threshold: 0.001,
            max_matches: 100,
            min_matches: 20,
        }
    }
}

/// Matched pixel positions, `base[i]` corresponding to `target[i]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCorrespondence {
    pub base: Vec<Vector2<f64>>,
    pub target: Vec<Vector2<f64>>,
}

impl FeatureCorrespondence {
    pub fn new(base: Vec<Vector2<f64>>, target: Vec<Vector2<f64>>) -> Result<Self, FeatureError> {
        if base.len() != target.len() {
            return Err(FeatureError::InvalidImage(format!(
                "correspondence sides differ in length: {} vs {}",
                base.len(),
                target.len()
            )));
        }
        Ok(Self { base, target })
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vector2<f64>, &Vector2<f64>)> {
        self.base.iter().zip(&self.target)
    }
}

/// Detects, describes and matches keypoints between `base` and `target`.
///
/// Both frames are converted to grayscale. Matches are cross-checked, sorted by
/// ascending Hamming distance and truncated to `config.max_matches`.
///
/// # Errors
///
/// * [`FeatureError::InsufficientFeatures`] if either image has no descriptors.
/// * [`FeatureError::InsufficientMatches`] if fewer than `config.min_matches` survive.
pub fn match_features(
    base: &Frame,
    target: &Frame,
    config: &FeatureConfig,
) -> Result<FeatureCorrespondence, FeatureError> {
    let detector = FeatureDetector::new(config);

    let (base_keypoints, base_descriptors) = detector.detect_and_describe(base)?;
    if base_descriptors.is_empty() {
        return Err(FeatureError::InsufficientFeatures("base".to_string()));
    }
    let (target_keypoints, target_descriptors) = detector.detect_and_describe(target)?;
    if target_descriptors.is_empty() {
        return Err(FeatureError::InsufficientFeatures("target".to_string()));
    }
    debug!(
        "Detected {} base and {} target keypoints",
        base_keypoints.len(),
        target_keypoints.len()
    );

    let mut matches = cross_check_match(&base_descriptors, &target_descriptors);
    matches.truncate(config.max_matches);
    info!("Kept {} cross-checked matches", matches.len());

    if matches.len() < config.min_matches {
        return Err(FeatureError::InsufficientMatches {
            found: matches.len(),
            required: config.min_matches,
        });
    }

    let (base_points, target_points) = matches
        .iter()
        .map(|m| {
            let a = &base_keypoints[m.query];
            let b = &target_keypoints[m.train];
            (Vector2::new(a.x, a.y), Vector2::new(b.x, b.y))
        })
        .unzip();
    FeatureCorrespondence::new(base_points, target_points)
}
