//! Geometric verification of putative matches with a robust homography fit.
//!
//! Minimal samples of four correspondences are solved with the normalised
//! DLT; the winning hypothesis is re-solved over all its inliers.

use nalgebra::{Matrix3, Point2, SMatrix, SymmetricEigen};
use pano_core::{
    normalize_homography, normalize_points, project_point, KeyPoints, Matches, Ransac,
    RobustModel, StitchError, VerifyConfig,
};
use tracing::debug;

/// Smallest support a homography can be accepted with.
pub const MIN_HOMOGRAPHY_SAMPLE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub src: Point2<f64>,
    pub dst: Point2<f64>,
}

impl Correspondence {
    pub fn new(src: Point2<f64>, dst: Point2<f64>) -> Self {
        Self { src, dst }
    }
}

/// A verified homography between two images together with the inlier mask
/// of the exact match list it was estimated from.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Maps image-A pixels to image-B pixels; `H[2,2] == 1`.
    pub homography: Matrix3<f64>,
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
    /// RMS forward reprojection error over the inliers, in pixels.
    pub rms_error: f64,
    pub iterations: usize,
}

impl Transform {
    pub fn project(&self, p: &Point2<f64>) -> Option<Point2<f64>> {
        project_point(&self.homography, p)
    }

    pub fn inverse(&self) -> Option<Matrix3<f64>> {
        self.homography.try_inverse().map(|h| normalize_homography(&h))
    }

    pub fn inlier_matches(&self, matches: &Matches) -> Matches {
        matches.select(&self.inliers)
    }

    pub fn inlier_ratio(&self) -> f64 {
        if self.inliers.is_empty() {
            0.0
        } else {
            self.num_inliers as f64 / self.inliers.len() as f64
        }
    }
}

pub struct HomographyEstimator;

fn cross(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Three points closer to a line than about half a degree of spread.
fn nearly_collinear(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> bool {
    let scale = (b - a).norm() * (c - a).norm();
    cross(a, b, c).abs() <= 1e-2 * scale
}

const TRIPLES: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];

impl RobustModel<Correspondence> for HomographyEstimator {
    type Model = Matrix3<f64>;

    fn min_sample_size(&self) -> usize {
        MIN_HOMOGRAPHY_SAMPLE
    }

    fn estimate(&self, data: &[&Correspondence]) -> Option<Self::Model> {
        solve_normalized_dlt(data)
    }

    fn compute_error(&self, model: &Self::Model, data: &Correspondence) -> f64 {
        match project_point(model, &data.src) {
            Some(p) => (p - data.dst).norm(),
            None => f64::INFINITY,
        }
    }

    /// Rejects samples with three nearly collinear points on either side and
    /// samples whose triangles change orientation between the images.
    fn is_degenerate(&self, sample: &[&Correspondence]) -> bool {
        if sample.len() < 4 {
            return true;
        }
        TRIPLES.iter().any(|&(i, j, k)| {
            let (a, b, c) = (sample[i], sample[j], sample[k]);
            if nearly_collinear(&a.src, &b.src, &c.src) || nearly_collinear(&a.dst, &b.dst, &c.dst) {
                return true;
            }
            cross(&a.src, &b.src, &c.src).signum() != cross(&a.dst, &b.dst, &c.dst).signum()
        })
    }
}

/// Normalised DLT: Hartley-normalise both point sets, take the null vector
/// of the stacked constraint matrix and undo the normalisation.
pub fn solve_normalized_dlt(data: &[&Correspondence]) -> Option<Matrix3<f64>> {
    if data.len() < MIN_HOMOGRAPHY_SAMPLE {
        return None;
    }
    let src: Vec<Point2<f64>> = data.iter().map(|c| c.src).collect();
    let dst: Vec<Point2<f64>> = data.iter().map(|c| c.dst).collect();
    let (src_n, t_src) = normalize_points(&src)?;
    let (dst_n, t_dst) = normalize_points(&dst)?;

    // Accumulate A^T A directly; its eigenvector of the smallest eigenvalue
    // is the least-squares null vector of A.
    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (p, q) in src_n.iter().zip(&dst_n) {
        let rows = [
            [-p.x, -p.y, -1.0, 0.0, 0.0, 0.0, q.x * p.x, q.x * p.y, q.x],
            [0.0, 0.0, 0.0, -p.x, -p.y, -1.0, q.y * p.x, q.y * p.y, q.y],
        ];
        for r in &rows {
            for i in 0..9 {
                for j in 0..9 {
                    ata[(i, j)] += r[i] * r[j];
                }
            }
        }
    }

    let eigen = SymmetricEigen::new(ata);
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = eigen.eigenvectors.column(min_idx);
    let h_n = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let h = t_dst.try_inverse()? * h_n * t_src;
    if h[(2, 2)].abs() < 1e-12 || !h.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(normalize_homography(&h))
}

/// Pixel correspondences of `matches` between keypoint sets `a` and `b`.
pub fn correspondences(
    a: &KeyPoints,
    b: &KeyPoints,
    matches: &Matches,
) -> pano_core::Result<Vec<Correspondence>> {
    matches
        .iter()
        .map(|m| match (a.get(m.query_idx), b.get(m.train_idx)) {
            (Some(p), Some(q)) => Ok(Correspondence::new(p.pt(), q.pt())),
            _ => Err(StitchError::Unknown(format!(
                "match ({}, {}) indexes past the keypoint lists",
                m.query_idx, m.train_idx
            ))),
        })
        .collect()
}

/// Robustly fit the homography taking `a` keypoints onto `b` keypoints.
///
/// Fails with `InsufficientMatches` below `min_match_count` matches without
/// attempting a fit, and with `HomographyEstimationFailed` when no model
/// reaches `min_inliers` support.
pub fn verify(
    a: &KeyPoints,
    b: &KeyPoints,
    matches: &Matches,
    config: &VerifyConfig,
) -> pano_core::Result<Transform> {
    if matches.len() < config.min_match_count {
        return Err(StitchError::InsufficientMatches {
            found: matches.len(),
            required: config.min_match_count,
        });
    }

    let data = correspondences(a, b, matches)?;
    let result = Ransac::new(config.ransac.clone()).run(&HomographyEstimator, &data);
    let min_inliers = config.ransac.min_inliers.max(MIN_HOMOGRAPHY_SAMPLE);

    let Some(homography) = result.model else {
        return Err(StitchError::HomographyEstimationFailed(format!(
            "no non-degenerate sample among {} matches",
            matches.len()
        )));
    };
    if result.num_inliers < min_inliers {
        return Err(StitchError::HomographyEstimationFailed(format!(
            "best model has {} inliers, need {}",
            result.num_inliers, min_inliers
        )));
    }
    if homography.determinant().abs() < 1e-12 {
        return Err(StitchError::HomographyEstimationFailed(
            "estimated homography is singular".into(),
        ));
    }

    debug!(
        matches = matches.len(),
        inliers = result.num_inliers,
        iterations = result.iterations,
        rms = result.residual,
        "homography verified"
    );

    Ok(Transform {
        homography,
        inliers: result.inliers,
        num_inliers: result.num_inliers,
        rms_error: result.residual,
        iterations: result.iterations,
    })
}
