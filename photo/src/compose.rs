//! Panorama composition from verified pairs: graph, alignment, warping and
//! blending.

use crate::alignment::{align, ImageTransform, Projection, StitchMode};
use crate::blend::{blend, BlendMode};
use crate::graph::ImageGraph;
use crate::pair::VerifiedPair;
use crate::panorama::Panorama;
use crate::warp::{warp_bounds, warp_image, PlaneWarper, SurfaceWarper, WarpedImage, Warper};
use image::RgbImage;
use nalgebra::Point2;
use pano_core::{Rect, Result, StitchError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    /// Pairs below this confidence are not used as graph edges.
    pub pair_confidence_threshold: f64,
    /// Fail instead of dropping images outside the biggest component.
    pub require_all_images: bool,
    pub blend: BlendMode,
    /// Feather weight gained per pixel of distance to the image border.
    pub sharpness: f32,
    pub max_canvas_pixels: u64,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            pair_confidence_threshold: 1.0,
            require_all_images: false,
            blend: BlendMode::Feather,
            sharpness: 0.02,
            max_canvas_pixels: 100_000_000,
        }
    }
}

impl ComposeConfig {
    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }
}

enum ImageWarper {
    Plane(PlaneWarper),
    Surface(SurfaceWarper),
}

impl Warper for ImageWarper {
    fn forward(&self, p: &Point2<f64>) -> Option<Point2<f64>> {
        match self {
            ImageWarper::Plane(w) => w.forward(p),
            ImageWarper::Surface(w) => w.forward(p),
        }
    }

    fn backward(&self, q: &Point2<f64>) -> Option<Point2<f64>> {
        match self {
            ImageWarper::Plane(w) => w.backward(q),
            ImageWarper::Surface(w) => w.backward(q),
        }
    }
}

fn warper_for(transform: &ImageTransform, projection: &Projection, image: usize) -> Result<ImageWarper> {
    match (transform, projection) {
        (ImageTransform::Homography(h), Projection::Plane) => PlaneWarper::new(*h)
            .map(ImageWarper::Plane)
            .ok_or_else(|| StitchError::Unknown(format!("homography of image {image} is singular"))),
        (ImageTransform::Camera(camera), Projection::Surface { surface, scale }) => {
            Ok(ImageWarper::Surface(SurfaceWarper::new(*surface, *scale, *camera)))
        }
        _ => Err(StitchError::Unknown(format!(
            "image {image} has a transform that does not fit the projection"
        ))),
    }
}

/// Compose `images` into one panorama using the verified `pairs`.
pub fn compose(
    images: &[RgbImage],
    pairs: &[VerifiedPair],
    mode: &StitchMode,
    config: &ComposeConfig,
) -> Result<Panorama> {
    if images.len() < 2 {
        return Err(StitchError::TooFewImages { found: images.len() });
    }
    let sizes: Vec<(u32, u32)> = images.iter().map(|img| img.dimensions()).collect();
    let graph = ImageGraph::build(
        images.len(),
        pairs,
        config.pair_confidence_threshold,
        config.require_all_images,
    )?;
    let alignment = align(&sizes, pairs, &graph, mode)?;

    let warpers = alignment
        .transforms
        .iter()
        .zip(&alignment.images)
        .map(|(t, &i)| warper_for(t, &alignment.projection, i))
        .collect::<Result<Vec<_>>>()?;
    let rois = warpers
        .iter()
        .zip(&alignment.images)
        .map(|(w, &i)| {
            warp_bounds(w, sizes[i].0, sizes[i].1)
                .ok_or_else(|| StitchError::Unknown(format!("image {i} does not project onto a bounded canvas")))
        })
        .collect::<Result<Vec<_>>>()?;

    let canvas = rois.iter().fold(Rect::new(0, 0, 0, 0), |acc, r| acc.union(r));
    if canvas.is_empty() || canvas.area() > config.max_canvas_pixels {
        return Err(StitchError::Unknown(format!(
            "canvas of {}x{} pixels is outside the allowed range (max {} pixels)",
            canvas.width, canvas.height, config.max_canvas_pixels
        )));
    }

    let warped: Vec<WarpedImage> = warpers
        .par_iter()
        .zip(rois.par_iter())
        .zip(alignment.images.par_iter())
        .map(|((w, roi), &i)| warp_image(&images[i], w, *roi, config.sharpness))
        .collect();
    let blended = blend(&warped, canvas, config.blend);

    info!(
        images = alignment.images.len(),
        of = images.len(),
        anchor = alignment.anchor,
        width = canvas.width,
        height = canvas.height,
        "panorama composed"
    );

    Ok(Panorama {
        image: blended.image,
        mask: blended.mask,
        indices: alignment.images,
        bounds: canvas,
        rois,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use nalgebra::Matrix3;
    use pano_features::Correspondence;

    fn scene() -> RgbImage {
        RgbImage::from_fn(200, 100, |x, y| Rgb([x as u8, (y * 2) as u8, ((x + y) % 256) as u8]))
    }

    fn crop(img: &RgbImage, x: u32, w: u32) -> RgbImage {
        image::imageops::crop_imm(img, x, 0, w, img.height()).to_image()
    }

    fn translated_pair(dx: f64) -> VerifiedPair {
        let shift = Matrix3::new(1.0, 0.0, -dx, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let corr = (0..30)
            .map(|i| {
                let p = Point2::new(85.0 + (i % 6) as f64 * 6.0, 10.0 + (i / 6) as f64 * 15.0);
                Correspondence::new(p, Point2::new(p.x - dx, p.y))
            })
            .collect();
        VerifiedPair::from_correspondences(0, 1, shift, corr)
    }

    #[test]
    fn planar_translation_reassembles_scene() {
        let full = scene();
        let images = vec![crop(&full, 0, 120), crop(&full, 80, 120)];
        let pano = compose(&images, &[translated_pair(80.0)], &StitchMode::PlanarScan, &ComposeConfig::default()).unwrap();

        assert_eq!(pano.indices, vec![0, 1]);
        assert_eq!(pano.bounds, Rect::new(0, 0, 200, 100));
        assert_eq!(pano.rois, vec![Rect::new(0, 0, 120, 100), Rect::new(80, 0, 120, 100)]);
        assert_eq!(pano.image, full);
        assert_eq!(pano.coverage(), 1.0);

        let multi = ComposeConfig::default().with_blend(BlendMode::MultiBand { bands: 4 });
        let pano = compose(&images, &[translated_pair(80.0)], &StitchMode::PlanarScan, &multi).unwrap();
        for x in (0..80).chain(120..200) {
            for y in 0..100 {
                assert_eq!(pano.image.get_pixel(x, y), full.get_pixel(x, y));
            }
        }
        assert_eq!(pano.coverage(), 1.0);
    }

    #[test]
    fn rejects_oversized_canvas_and_single_image() {
        let full = scene();
        let images = vec![crop(&full, 0, 120), crop(&full, 80, 120)];
        let tiny = ComposeConfig {
            max_canvas_pixels: 1000,
            ..ComposeConfig::default()
        };
        let err = compose(&images, &[translated_pair(80.0)], &StitchMode::PlanarScan, &tiny).unwrap_err();
        assert!(matches!(err, StitchError::Unknown(_)));

        let err = compose(&images[..1], &[], &StitchMode::PlanarScan, &ComposeConfig::default()).unwrap_err();
        assert_eq!(err, StitchError::TooFewImages { found: 1 });
    }

    #[test]
    fn horizon_near_the_border_is_rejected_not_overflowed() {
        let images = vec![RgbImage::new(100, 100), RgbImage::new(100, 100)];
        // Image 1's right edge sits just inside its horizon line, so it
        // projects to x of about 1e13.
        let h = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, -(1.0 - 1e-11) / 99.0, 0.0, 1.0);
        let corr = (0..30)
            .map(|i| {
                let p = Point2::new((i % 6) as f64 * 10.0, (i / 6) as f64 * 15.0);
                Correspondence::new(p, p)
            })
            .collect();
        let pair = VerifiedPair::from_correspondences(1, 0, h, corr);

        let err = compose(&images, &[pair], &StitchMode::PlanarScan, &ComposeConfig::default()).unwrap_err();
        assert!(matches!(err, StitchError::Unknown(_)), "{err:?}");
    }

    #[test]
    fn unconfident_pairs_fail_verification_stage() {
        let full = scene();
        let images = vec![crop(&full, 0, 120), crop(&full, 80, 120)];
        let strict = ComposeConfig {
            pair_confidence_threshold: 10.0,
            ..ComposeConfig::default()
        };
        let err = compose(&images, &[translated_pair(80.0)], &StitchMode::PlanarScan, &strict).unwrap_err();
        assert!(matches!(err, StitchError::HomographyEstimationFailed(_)));
    }
}
