//! Global alignment: turns the pairwise homographies of the chosen
//! component into one transform per image relative to the anchor.

use crate::bundle::{bundle_adjust, EdgeObservations};
use crate::graph::ImageGraph;
use crate::pair::VerifiedPair;
use crate::warp::WarpSurface;
use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use pano_core::{normalize_homography, orthonormalize, CameraParams, Result, StitchError};
use pano_optimize::LMConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanoramicParams {
    pub surface: WarpSurface,
    pub wave_correction: bool,
    pub bundle: LMConfig,
    /// Cap on the correspondences each edge contributes to bundle adjustment.
    pub max_points_per_pair: usize,
}

impl Default for PanoramicParams {
    fn default() -> Self {
        Self {
            surface: WarpSurface::Spherical,
            wave_correction: true,
            bundle: LMConfig::default().with_max_iters(100),
            max_points_per_pair: 50,
        }
    }
}

/// How images are related: rotating cameras sharing a centre of projection
/// or flat documents related by plane homographies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StitchMode {
    Panoramic(PanoramicParams),
    #[default]
    PlanarScan,
}

impl StitchMode {
    pub fn panoramic() -> Self {
        StitchMode::Panoramic(PanoramicParams::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageTransform {
    /// Image pixels to anchor pixels.
    Homography(Matrix3<f64>),
    Camera(CameraParams),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Plane,
    Surface { surface: WarpSurface, scale: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalAlignment {
    pub anchor: usize,
    /// Aligned image indices, ascending.
    pub images: Vec<usize>,
    /// Parallel to `images`.
    pub transforms: Vec<ImageTransform>,
    pub projection: Projection,
}

pub fn align(
    sizes: &[(u32, u32)],
    pairs: &[VerifiedPair],
    graph: &ImageGraph,
    mode: &StitchMode,
) -> Result<GlobalAlignment> {
    match mode {
        StitchMode::PlanarScan => {
            let homographies = chain_homographies(graph, pairs)?;
            Ok(GlobalAlignment {
                anchor: graph.anchor,
                images: graph.nodes.clone(),
                transforms: homographies.into_iter().map(ImageTransform::Homography).collect(),
                projection: Projection::Plane,
            })
        }
        StitchMode::Panoramic(params) => {
            let cameras = estimate_cameras(sizes, pairs, graph, params)?;
            let mut focals: Vec<f64> = cameras.iter().map(|c| c.focal).collect();
            let scale = median(&mut focals).unwrap_or(1.0);
            Ok(GlobalAlignment {
                anchor: graph.anchor,
                images: graph.nodes.clone(),
                transforms: cameras.into_iter().map(ImageTransform::Camera).collect(),
                projection: Projection::Surface {
                    surface: params.surface,
                    scale,
                },
            })
        }
    }
}

fn position(graph: &ImageGraph, image: usize) -> Result<usize> {
    graph
        .nodes
        .binary_search(&image)
        .map_err(|_| StitchError::Unknown(format!("image {image} is not part of the aligned component")))
}

/// Image-to-anchor homographies for every node of `graph`, composed along
/// the spanning tree. Parallel to `graph.nodes`.
pub fn chain_homographies(graph: &ImageGraph, pairs: &[VerifiedPair]) -> Result<Vec<Matrix3<f64>>> {
    let mut placed: Vec<Option<Matrix3<f64>>> = vec![None; graph.nodes.len()];
    placed[position(graph, graph.anchor)?] = Some(Matrix3::identity());

    for edge in &graph.tree {
        let pair = &pairs[edge.pair];
        let parent = placed[position(graph, edge.parent)?]
            .ok_or_else(|| StitchError::Unknown("spanning tree is not in breadth-first order".into()))?;
        let child_to_parent = if pair.src == edge.child {
            *pair.homography()
        } else {
            pair.transform
                .inverse()
                .ok_or_else(|| StitchError::Unknown(format!("pair ({}, {}) homography is singular", pair.src, pair.dst)))?
        };
        let g = normalize_homography(&(parent * child_to_parent));
        if !g.iter().all(|v| v.is_finite()) {
            return Err(StitchError::Unknown(format!("image {} maps to a non-finite homography", edge.child)));
        }
        placed[position(graph, edge.child)?] = Some(g);
    }

    placed
        .into_iter()
        .zip(&graph.nodes)
        .map(|(g, &image)| g.ok_or_else(|| StitchError::Unknown(format!("image {image} is not reached by the spanning tree"))))
        .collect()
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    Some(if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    })
}

fn positive_sqrt(v: f64) -> Option<f64> {
    (v.is_finite() && v > 0.0).then(|| v.sqrt())
}

/// Pick between the two focal-squared candidates of one image, preferring the
/// one with the better conditioned denominator.
fn pick_focal(n1: f64, d1: f64, n2: f64, d2: f64) -> Option<f64> {
    let v1 = if d1.abs() > 1e-12 { positive_sqrt(n1 / d1) } else { None };
    let v2 = if d2.abs() > 1e-12 { positive_sqrt(n2 / d2) } else { None };
    match (v1, v2) {
        (Some(a), Some(b)) => Some(if d1.abs() > d2.abs() { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Focal lengths `(f_src, f_dst)` implied by a rotation-induced homography
/// expressed in principal-point-centred coordinates.
pub fn focals_from_homography(h: &Matrix3<f64>) -> (Option<f64>, Option<f64>) {
    let h = |r: usize, c: usize| h[(r, c)];

    let f_dst = pick_focal(
        -(h(0, 0) * h(0, 1) + h(1, 0) * h(1, 1)),
        h(2, 0) * h(2, 1),
        h(0, 0) * h(0, 0) + h(1, 0) * h(1, 0) - h(0, 1) * h(0, 1) - h(1, 1) * h(1, 1),
        (h(2, 1) - h(2, 0)) * (h(2, 1) + h(2, 0)),
    );
    let f_src = pick_focal(
        -h(0, 2) * h(1, 2),
        h(0, 0) * h(1, 0) + h(0, 1) * h(1, 1),
        h(1, 2) * h(1, 2) - h(0, 2) * h(0, 2),
        h(0, 0) * h(0, 0) + h(0, 1) * h(0, 1) - h(1, 0) * h(1, 0) - h(1, 1) * h(1, 1),
    );
    (f_src, f_dst)
}

fn centering(width: u32, height: u32) -> Matrix3<f64> {
    Matrix3::new(1.0, 0.0, width as f64 / 2.0, 0.0, 1.0, height as f64 / 2.0, 0.0, 0.0, 1.0)
}

/// Shared focal length: median over edges of `sqrt(f_src * f_dst)`, or the
/// mean of `width + height` when no edge yields both.
pub fn estimate_focal(sizes: &[(u32, u32)], pairs: &[VerifiedPair], edges: &[usize], nodes: &[usize]) -> f64 {
    let mut estimates: Vec<f64> = edges
        .iter()
        .filter_map(|&p| {
            let pair = &pairs[p];
            let (sw, sh) = sizes[pair.src];
            let (dw, dh) = sizes[pair.dst];
            let centred = centering(dw, dh).try_inverse()? * pair.homography() * centering(sw, sh);
            match focals_from_homography(&centred) {
                (Some(f0), Some(f1)) => Some((f0 * f1).sqrt()),
                _ => None,
            }
        })
        .collect();

    match median(&mut estimates) {
        Some(f) => {
            debug!(focal = f, estimates = estimates.len(), "focal estimated from homographies");
            f
        }
        None => {
            let sum: f64 = nodes.iter().map(|&i| (sizes[i].0 + sizes[i].1) as f64).sum();
            let f = sum / nodes.len().max(1) as f64;
            warn!(focal = f, "no edge constrains the focal length, falling back to image size");
            f
        }
    }
}

/// Camera-to-world rotations along the spanning tree, anchor at identity.
pub fn initial_rotations(graph: &ImageGraph, pairs: &[VerifiedPair], cameras: &mut [CameraParams]) -> Result<()> {
    let anchor = position(graph, graph.anchor)?;
    cameras[anchor].rotation = Matrix3::identity();

    for edge in &graph.tree {
        let pair = &pairs[edge.pair];
        let u = position(graph, edge.parent)?;
        let v = position(graph, edge.child)?;
        let (cu, cv) = (cameras[u], cameras[v]);
        let h = pair.homography();
        let rotation = if pair.src == edge.parent {
            // H = K_v R_v^T R_u K_u^-1
            let m = cv.k_inv() * h * cu.k();
            orthonormalize(&(cu.rotation * m.transpose()))
        } else {
            // H = K_u R_u^T R_v K_v^-1
            let m = cu.k_inv() * h * cv.k();
            orthonormalize(&(cu.rotation * m))
        };
        cameras[v].rotation = rotation.ok_or_else(|| {
            StitchError::CameraParamsAdjustmentFailed(format!(
                "pair ({}, {}) does not induce a rotation",
                pair.src, pair.dst
            ))
        })?;
    }
    Ok(())
}

/// Rotate all cameras together so that their horizontal axes share a plane
/// and the panorama horizon is straight. No-op when the axes do not define
/// a unique plane.
pub fn wave_correct(rotations: &mut [Matrix3<f64>]) {
    if rotations.len() < 2 {
        return;
    }
    let mut moment = Matrix3::zeros();
    let mut forward = Vector3::zeros();
    for r in rotations.iter() {
        let x_axis = r.column(0);
        moment += x_axis * x_axis.transpose();
        forward += r.column(2);
    }

    let eigen = SymmetricEigen::new(moment);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
    if eigen.eigenvalues[order[1]].abs() < 1e-9 {
        return;
    }
    let mut up: Vector3<f64> = eigen.eigenvectors.column(order[0]).into_owned();

    let mut right = up.cross(&forward);
    let norm = right.norm();
    if norm <= f64::MIN_POSITIVE {
        return;
    }
    right /= norm;
    let confidence: f64 = rotations.iter().map(|r| right.dot(&r.column(0))).sum();
    if confidence < 0.0 {
        right = -right;
        up = -up;
    }
    let back = right.cross(&up);

    let correction = Matrix3::from_rows(&[right.transpose(), up.transpose(), back.transpose()]);
    for r in rotations.iter_mut() {
        *r = correction * *r;
    }
}

fn estimate_cameras(
    sizes: &[(u32, u32)],
    pairs: &[VerifiedPair],
    graph: &ImageGraph,
    params: &PanoramicParams,
) -> Result<Vec<CameraParams>> {
    let focal = estimate_focal(sizes, pairs, &graph.edges, &graph.nodes);
    let mut cameras: Vec<CameraParams> = graph
        .nodes
        .iter()
        .map(|&i| CameraParams::centered(focal, sizes[i].0, sizes[i].1))
        .collect();
    initial_rotations(graph, pairs, &mut cameras)?;

    let mut observations = Vec::with_capacity(graph.edges.len());
    for &p in &graph.edges {
        let pair = &pairs[p];
        let points: Vec<_> = pair.point_pairs().collect();
        observations.push(EdgeObservations::subsampled(
            position(graph, pair.src)?,
            position(graph, pair.dst)?,
            &points,
            params.max_points_per_pair,
        ));
    }
    let report = bundle_adjust(&mut cameras, position(graph, graph.anchor)?, &observations, &params.bundle)?;

    if params.wave_correction {
        let mut rotations: Vec<Matrix3<f64>> = cameras.iter().map(|c| c.rotation).collect();
        wave_correct(&mut rotations);
        for (cam, r) in cameras.iter_mut().zip(rotations) {
            cam.rotation = r;
        }
    }

    info!(
        cameras = cameras.len(),
        initial_focal = focal,
        rms = report.final_rms,
        "cameras estimated"
    );
    Ok(cameras)
}
