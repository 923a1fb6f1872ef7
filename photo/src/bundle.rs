//! Rotation-only bundle adjustment: refines every camera's focal length and
//! rotation so that the inlier correspondences of every edge agree with the
//! homographies the cameras induce. The anchor rotation is held fixed.

use nalgebra::{DVector, Point2, Vector3};
use pano_core::{rotation_from_vector, rotation_to_vector, CameraParams, Result, StitchError};
use pano_optimize::{levenberg_marquardt, LMConfig, LeastSquaresProblem};
use tracing::debug;

/// Residual of a correspondence that maps to infinity.
const UNPROJECTABLE: f64 = 1e6;

/// Correspondences of one edge, by position in the camera list.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeObservations {
    pub src: usize,
    pub dst: usize,
    pub points: Vec<(Point2<f64>, Point2<f64>)>,
}

impl EdgeObservations {
    /// Keeps at most `max_points` of `points`, taken at an even stride.
    pub fn subsampled(src: usize, dst: usize, points: &[(Point2<f64>, Point2<f64>)], max_points: usize) -> Self {
        let stride = if max_points == 0 {
            usize::MAX
        } else {
            points.len().div_ceil(max_points).max(1)
        };
        Self {
            src,
            dst,
            points: points.iter().step_by(stride).copied().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BundleReport {
    pub initial_rms: f64,
    pub final_rms: f64,
    pub iterations: usize,
}

struct RotationProblem<'a> {
    template: &'a [CameraParams],
    anchor: usize,
    edges: &'a [EdgeObservations],
    num_residuals: usize,
}

impl<'a> RotationProblem<'a> {
    fn new(template: &'a [CameraParams], anchor: usize, edges: &'a [EdgeObservations]) -> Self {
        let num_residuals = edges.iter().map(|e| 2 * e.points.len()).sum();
        Self {
            template,
            anchor,
            edges,
            num_residuals,
        }
    }

    /// Layout: `[f_0, (r_0), f_1, (r_1), ...]`, the anchor has no rotation block.
    fn pack(&self, cameras: &[CameraParams]) -> DVector<f64> {
        let mut v = Vec::with_capacity(cameras.len() * 4);
        for (k, cam) in cameras.iter().enumerate() {
            v.push(cam.focal);
            if k != self.anchor {
                let r = rotation_to_vector(&cam.rotation);
                v.extend_from_slice(&[r.x, r.y, r.z]);
            }
        }
        DVector::from_vec(v)
    }

    fn unpack(&self, params: &DVector<f64>) -> Vec<CameraParams> {
        let mut i = 0;
        self.template
            .iter()
            .enumerate()
            .map(|(k, cam)| {
                let mut cam = *cam;
                cam.focal = params[i];
                i += 1;
                if k != self.anchor {
                    let r = Vector3::new(params[i], params[i + 1], params[i + 2]);
                    cam.rotation = rotation_from_vector(&r);
                    i += 3;
                }
                cam
            })
            .collect()
    }
}

impl LeastSquaresProblem for RotationProblem<'_> {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let cameras = self.unpack(params);
        let mut r = Vec::with_capacity(self.num_residuals);
        for edge in self.edges {
            let h = cameras[edge.src].homography_to(&cameras[edge.dst]);
            for (p, q) in &edge.points {
                let v = h * Vector3::new(p.x, p.y, 1.0);
                if v.z.abs() < 1e-12 {
                    r.extend_from_slice(&[UNPROJECTABLE, UNPROJECTABLE]);
                } else {
                    r.push(v.x / v.z - q.x);
                    r.push(v.y / v.z - q.y);
                }
            }
        }
        DVector::from_vec(r)
    }
}

fn rms(cost: f64, num_residuals: usize) -> f64 {
    if num_residuals == 0 {
        0.0
    } else {
        (cost / (num_residuals / 2) as f64).sqrt()
    }
}

/// Refine `cameras` in place. Fails with `CameraParamsAdjustmentFailed`
/// when the solution is not finite or a focal length is not positive.
pub fn bundle_adjust(
    cameras: &mut [CameraParams],
    anchor: usize,
    edges: &[EdgeObservations],
    config: &LMConfig,
) -> Result<BundleReport> {
    let problem = RotationProblem::new(cameras, anchor, edges);
    if problem.num_residuals == 0 {
        return Ok(BundleReport {
            initial_rms: 0.0,
            final_rms: 0.0,
            iterations: 0,
        });
    }

    let report = levenberg_marquardt(&problem, problem.pack(cameras), config);
    if !report.is_finite() {
        return Err(StitchError::CameraParamsAdjustmentFailed(
            "bundle adjustment diverged to non-finite parameters".into(),
        ));
    }
    let refined = problem.unpack(&report.params);
    if let Some(bad) = refined.iter().find(|c| !(c.focal.is_finite() && c.focal > 0.0)) {
        return Err(StitchError::CameraParamsAdjustmentFailed(format!(
            "refined focal length {} is not positive",
            bad.focal
        )));
    }
    let result = BundleReport {
        initial_rms: rms(report.initial_cost, problem.num_residuals),
        final_rms: rms(report.final_cost, problem.num_residuals),
        iterations: report.iterations,
    };
    cameras.copy_from_slice(&refined);

    debug!(
        initial_rms = result.initial_rms,
        final_rms = result.final_rms,
        iterations = result.iterations,
        termination = ?report.termination,
        "bundle adjustment finished"
    );
    Ok(result)
}
