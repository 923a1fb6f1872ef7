//! The end-to-end pipeline: extraction per image, matching and verification
//! per pair, then composition.

use crate::alignment::StitchMode;
use crate::compose::{compose, ComposeConfig};
use crate::pair::VerifiedPair;
use crate::panorama::Panorama;
use image::RgbImage;
use pano_core::{FeatureConfig, ImageFeatures, MatchConfig, Result, StitchError, VerifyConfig};
use pano_features::{extract, match_descriptors, verify};
use pano_imgproc::convert_rgb_to_gray;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitcherConfig {
    pub features: FeatureConfig,
    pub matching: MatchConfig,
    pub verify: VerifyConfig,
    /// Images with fewer keypoints than this are rejected before matching.
    pub min_keypoint_count: usize,
    pub mode: StitchMode,
    pub compose: ComposeConfig,
    pub crop_black_borders: bool,
}

impl Default for StitcherConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            matching: MatchConfig::default(),
            verify: VerifyConfig::default(),
            min_keypoint_count: 50,
            mode: StitchMode::PlanarScan,
            compose: ComposeConfig::default(),
            crop_black_borders: false,
        }
    }
}

impl StitcherConfig {
    pub fn with_mode(mut self, mode: StitchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_features(mut self, n: usize) -> Self {
        self.features.max_features = n;
        self
    }

    pub fn with_crop(mut self, crop: bool) -> Self {
        self.crop_black_borders = crop;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.verify.ransac.seed = seed;
        self
    }
}

/// RANSAC seed of the `pair_index`-th pair, independent of scheduling.
pub fn pair_seed(base: u64, pair_index: usize) -> u64 {
    base.wrapping_add((pair_index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Every unordered image pair `(i, j)` with `i < j`, in lexicographic order.
pub fn image_pairs(num_images: usize) -> Vec<(usize, usize)> {
    (0..num_images)
        .flat_map(|i| (i + 1..num_images).map(move |j| (i, j)))
        .collect()
}

/// Rank of a pair failure: later stages win when reporting why nothing
/// could be stitched.
fn failure_rank(err: &StitchError) -> u8 {
    match err {
        StitchError::HomographyEstimationFailed(_) => 2,
        StitchError::InsufficientMatches { .. } => 1,
        _ => 0,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Stitcher {
    config: StitcherConfig,
}

impl Stitcher {
    pub fn new(config: StitcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StitcherConfig {
        &self.config
    }

    pub fn stitch(&self, images: &[RgbImage]) -> Result<Panorama> {
        if images.len() < 2 {
            return Err(StitchError::TooFewImages { found: images.len() });
        }
        let features = self.extract_all(images)?;
        let pairs = self.match_pairs(&features)?;
        let panorama = self.compose(images, &pairs)?;
        Ok(if self.config.crop_black_borders {
            panorama.crop_black_borders()
        } else {
            panorama
        })
    }

    /// Features of every image, in input order. Fails on the lowest-indexed
    /// image with too few keypoints.
    pub fn extract_all(&self, images: &[RgbImage]) -> Result<Vec<ImageFeatures>> {
        let features: Vec<ImageFeatures> = images
            .par_iter()
            .enumerate()
            .map(|(i, img)| extract(&convert_rgb_to_gray(img), &self.config.features).with_image_idx(i))
            .collect();

        for f in &features {
            debug!(image = f.image_idx, keypoints = f.len(), "features extracted");
            if f.len() < self.config.min_keypoint_count {
                return Err(StitchError::InsufficientFeatures {
                    image: f.image_idx,
                    found: f.len(),
                    required: self.config.min_keypoint_count,
                });
            }
        }
        Ok(features)
    }

    /// Matches and verifies every image pair. Pairs that fail are dropped;
    /// when none survives the most advanced failure is returned.
    pub fn match_pairs(&self, features: &[ImageFeatures]) -> Result<Vec<VerifiedPair>> {
        let candidates = image_pairs(features.len());
        let outcomes: Vec<Result<VerifiedPair>> = candidates
            .par_iter()
            .enumerate()
            .map(|(k, &(i, j))| self.verify_pair(k, &features[i], &features[j]))
            .collect();

        let mut pairs = Vec::new();
        let mut failure: Option<StitchError> = None;
        for ((i, j), outcome) in candidates.into_iter().zip(outcomes) {
            match outcome {
                Ok(pair) => pairs.push(pair),
                Err(err) => {
                    warn!(src = i, dst = j, error = %err, "pair dropped");
                    if failure.as_ref().map_or(true, |f| failure_rank(&err) > failure_rank(f)) {
                        failure = Some(err);
                    }
                }
            }
        }

        if pairs.is_empty() {
            return Err(failure.unwrap_or(StitchError::TooFewImages { found: features.len() }));
        }
        info!(verified = pairs.len(), images = features.len(), "pairs verified");
        Ok(pairs)
    }

    fn verify_pair(&self, pair_index: usize, a: &ImageFeatures, b: &ImageFeatures) -> Result<VerifiedPair> {
        let matches = match_descriptors(&a.descriptors, &b.descriptors, &self.config.matching);
        let config = self
            .config
            .verify
            .clone()
            .with_seed(pair_seed(self.config.verify.ransac.seed, pair_index));
        let transform = verify(&a.keypoints, &b.keypoints, &matches, &config)?;
        let pair = VerifiedPair::new(a.image_idx, b.image_idx, &a.keypoints, &b.keypoints, matches, transform)?;

        debug!(
            src = pair.src,
            dst = pair.dst,
            matches = pair.matches.len(),
            inliers = pair.num_inliers(),
            inlier_ratio = pair.transform.inlier_ratio(),
            confidence = pair.confidence,
            "pair verified"
        );
        let threshold = self.config.compose.pair_confidence_threshold;
        if pair.confidence < threshold {
            return Err(StitchError::HomographyEstimationFailed(format!(
                "pair ({}, {}) confidence {:.3} is below {}",
                pair.src, pair.dst, pair.confidence, threshold
            )));
        }
        Ok(pair)
    }

    pub fn compose(&self, images: &[RgbImage], pairs: &[VerifiedPair]) -> Result<Panorama> {
        compose(images, pairs, &self.config.mode, &self.config.compose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_are_lexicographic() {
        assert_eq!(image_pairs(3), vec![(0, 1), (0, 2), (1, 2)]);
        assert!(image_pairs(1).is_empty());
    }

    #[test]
    fn pair_seeds_differ_and_repeat() {
        assert_eq!(pair_seed(7, 0), 7);
        assert_ne!(pair_seed(7, 1), pair_seed(7, 2));
        assert_eq!(pair_seed(u64::MAX, 3), pair_seed(u64::MAX, 3));
    }

    #[test]
    fn failure_ranking_prefers_later_stages() {
        let matches = StitchError::InsufficientMatches { found: 2, required: 10 };
        let homography = StitchError::HomographyEstimationFailed("x".into());
        assert!(failure_rank(&homography) > failure_rank(&matches));
    }

    #[test]
    fn config_json_overrides_nested_defaults() {
        let cfg: StitcherConfig = serde_json::from_str(
            r#"{ "mode": "planar_scan", "crop_black_borders": true, "compose": { "blend": { "multi_band": { "bands": 3 } } } }"#,
        )
        .unwrap();
        assert!(cfg.crop_black_borders);
        assert_eq!(cfg.min_keypoint_count, 50);
        assert_eq!(cfg.compose.blend, crate::BlendMode::MultiBand { bands: 3 });
        assert_eq!(cfg.compose.sharpness, 0.02);

        let cfg: StitcherConfig = serde_json::from_str(r#"{ "mode": { "panoramic": { "surface": "cylindrical" } } }"#).unwrap();
        match cfg.mode {
            StitchMode::Panoramic(p) => {
                assert_eq!(p.surface, crate::WarpSurface::Cylindrical);
                assert!(p.wave_correction);
            }
            StitchMode::PlanarScan => panic!("expected panoramic mode"),
        }
    }

    #[test]
    fn too_few_images() {
        let err = Stitcher::default().stitch(&[RgbImage::new(10, 10)]).unwrap_err();
        assert_eq!(err, StitchError::TooFewImages { found: 1 });
    }
}
