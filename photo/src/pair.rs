use nalgebra::{Matrix3, Point2};
use pano_core::{FeatureMatch, KeyPoints, Matches};
use pano_features::{correspondences, Correspondence, Transform};

/// A pair of images together with the matches between them and the
/// homography verified on exactly those matches.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPair {
    pub src: usize,
    pub dst: usize,
    pub matches: Matches,
    /// Estimated from `matches`; its inlier mask is parallel to them.
    pub transform: Transform,
    /// Inlier correspondences in pixel coordinates, `src` image to `dst` image.
    pub inliers: Vec<Correspondence>,
    /// `inliers / (8 + 0.3 * matches)`.
    pub confidence: f64,
}

pub fn pair_confidence(num_inliers: usize, num_matches: usize) -> f64 {
    num_inliers as f64 / (8.0 + 0.3 * num_matches as f64)
}

impl VerifiedPair {
    pub fn new(
        src: usize,
        dst: usize,
        src_keypoints: &KeyPoints,
        dst_keypoints: &KeyPoints,
        matches: Matches,
        transform: Transform,
    ) -> pano_core::Result<Self> {
        let inlier_matches = transform.inlier_matches(&matches);
        let inliers = correspondences(src_keypoints, dst_keypoints, &inlier_matches)?;
        let confidence = pair_confidence(transform.num_inliers, matches.len());
        Ok(Self {
            src,
            dst,
            matches,
            transform,
            inliers,
            confidence,
        })
    }

    /// A pair whose every correspondence is an inlier of `homography`.
    pub fn from_correspondences(
        src: usize,
        dst: usize,
        homography: Matrix3<f64>,
        inliers: Vec<Correspondence>,
    ) -> Self {
        let n = inliers.len();
        let matches: Matches = (0..n).map(|i| FeatureMatch::new(i, i, 0.0)).collect();
        let transform = Transform {
            homography,
            inliers: vec![true; n],
            num_inliers: n,
            rms_error: 0.0,
            iterations: 0,
        };
        Self {
            src,
            dst,
            matches,
            transform,
            inliers,
            confidence: pair_confidence(n, n),
        }
    }

    pub fn num_inliers(&self) -> usize {
        self.transform.num_inliers
    }

    pub fn homography(&self) -> &Matrix3<f64> {
        &self.transform.homography
    }

    pub fn connects(&self, image: usize) -> bool {
        self.src == image || self.dst == image
    }

    pub fn other(&self, image: usize) -> Option<usize> {
        if self.src == image {
            Some(self.dst)
        } else if self.dst == image {
            Some(self.src)
        } else {
            None
        }
    }

    /// Inlier points as `(src, dst)` pixel pairs.
    pub fn point_pairs(&self) -> impl Iterator<Item = (Point2<f64>, Point2<f64>)> + '_ {
        self.inliers.iter().map(|c| (c.src, c.dst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pano_core::KeyPoint;

    #[test]
    fn confidence_formula() {
        assert!((pair_confidence(20, 40) - 1.0).abs() < 1e-12);
        assert!(pair_confidence(8, 100) < 1.0);
    }

    #[test]
    fn inliers_follow_the_mask() {
        let a: KeyPoints = (0..4).map(|i| KeyPoint::new(i as f64, 0.0)).collect();
        let b: KeyPoints = (0..4).map(|i| KeyPoint::new(i as f64 + 10.0, 1.0)).collect();
        let matches: Matches = (0..4).map(|i| FeatureMatch::new(i, i, 0.0)).collect();
        let transform = Transform {
            homography: Matrix3::identity(),
            inliers: vec![true, false, true, true],
            num_inliers: 3,
            rms_error: 0.0,
            iterations: 1,
        };
        let pair = VerifiedPair::new(0, 2, &a, &b, matches, transform).unwrap();
        assert_eq!(pair.inliers.len(), 3);
        assert_eq!(pair.inliers[1].src, Point2::new(2.0, 0.0));
        assert_eq!(pair.inliers[1].dst, Point2::new(12.0, 1.0));
        assert_eq!(pair.other(2), Some(0));
        assert_eq!(pair.other(1), None);
        assert!((pair.confidence - 3.0 / 9.2).abs() < 1e-12);
    }
}
