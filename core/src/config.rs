//! Tunables for the extraction, matching and verification stages.
//!
//! Every struct deserialises with `#[serde(default)]`, so a JSON file only
//! has to name the keys it overrides.

use crate::robust::RansacConfig;
use serde::{Deserialize, Serialize};

/// ORB detector and descriptor parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Upper bound on keypoints returned per image.
    pub max_features: usize,
    pub n_levels: usize,
    pub scale_factor: f32,
    pub fast_threshold: u8,
    /// Diameter of the oriented BRIEF patch; also sets the border margin.
    pub patch_size: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            max_features: 5000,
            n_levels: 8,
            scale_factor: 1.2,
            fast_threshold: 20,
            patch_size: 31,
        }
    }
}

impl FeatureConfig {
    pub fn with_max_features(mut self, n: usize) -> Self {
        self.max_features = n;
        self
    }

    pub fn with_n_levels(mut self, n: usize) -> Self {
        self.n_levels = n;
        self
    }

    pub fn with_fast_threshold(mut self, threshold: u8) -> Self {
        self.fast_threshold = threshold;
        self
    }
}

/// Brute-force Hamming matcher policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Keep only mutually nearest pairs.
    pub cross_check: bool,
    /// Lowe ratio between best and second-best distance; `None` disables the test.
    pub ratio_threshold: Option<f32>,
    pub max_distance: Option<u32>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            cross_check: true,
            ratio_threshold: Some(0.8),
            max_distance: None,
        }
    }
}

impl MatchConfig {
    /// One nearest neighbour per query descriptor, no filtering.
    pub fn nearest_neighbor() -> Self {
        Self {
            cross_check: false,
            ratio_threshold: None,
            max_distance: None,
        }
    }
}

/// Geometric verification policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Below this many matches no fitting is attempted.
    pub min_match_count: usize,
    pub ransac: RansacConfig,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            min_match_count: 10,
            ransac: RansacConfig::default(),
        }
    }
}

impl VerifyConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.ransac.seed = seed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: FeatureConfig = serde_json::from_str(r#"{ "max_features": 1200 }"#).unwrap();
        assert_eq!(cfg.max_features, 1200);
        assert_eq!(cfg.n_levels, 8);

        let verify: VerifyConfig =
            serde_json::from_str(r#"{ "ransac": { "reprojection_threshold": 2.0 } }"#).unwrap();
        assert_eq!(verify.min_match_count, 10);
        assert_eq!(verify.ransac.reprojection_threshold, 2.0);
        assert_eq!(verify.ransac.max_iterations, 2000);

        let matching: MatchConfig = serde_json::from_str(r#"{ "ratio_threshold": null }"#).unwrap();
        assert!(matching.cross_check);
        assert!(matching.ratio_threshold.is_none());
    }
}
