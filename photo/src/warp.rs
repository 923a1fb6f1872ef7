//! Projection of aligned images onto the output canvas.
//!
//! A [`Warper`] maps source pixels to canvas coordinates and back. Images are
//! resampled by inverse mapping every canvas pixel of the warped footprint.

use image::RgbImage;
use nalgebra::{Matrix3, Point2, Vector3};
use pano_core::{project_point, CameraParams, Rect};
use pano_imgproc::sample_rgb_bilinear;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Surface a rotating camera is projected onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WarpSurface {
    #[default]
    Spherical,
    Cylindrical,
}

pub trait Warper: Sync {
    /// Source pixel to canvas coordinates.
    fn forward(&self, p: &Point2<f64>) -> Option<Point2<f64>>;
    /// Canvas coordinates to source pixel.
    fn backward(&self, q: &Point2<f64>) -> Option<Point2<f64>>;
}

/// Perspective warp by an image-to-anchor homography.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneWarper {
    homography: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl PlaneWarper {
    /// `None` when the homography is singular.
    pub fn new(homography: Matrix3<f64>) -> Option<Self> {
        let inverse = homography.try_inverse()?;
        inverse.iter().all(|v| v.is_finite()).then_some(Self { homography, inverse })
    }

    fn depth(&self, p: &Point2<f64>) -> f64 {
        let h = &self.homography;
        h[(2, 0)] * p.x + h[(2, 1)] * p.y + h[(2, 2)]
    }
}

impl Warper for PlaneWarper {
    fn forward(&self, p: &Point2<f64>) -> Option<Point2<f64>> {
        // Points beyond the horizon line have no place on the canvas.
        if self.depth(p) <= 1e-12 {
            return None;
        }
        project_point(&self.homography, p)
    }

    fn backward(&self, q: &Point2<f64>) -> Option<Point2<f64>> {
        let p = project_point(&self.inverse, q)?;
        (self.depth(&p) > 1e-12).then_some(p)
    }
}

/// Spherical or cylindrical projection of a rotating camera, `scale` pixels
/// per radian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceWarper {
    pub surface: WarpSurface,
    pub scale: f64,
    pub camera: CameraParams,
}

impl SurfaceWarper {
    pub fn new(surface: WarpSurface, scale: f64, camera: CameraParams) -> Self {
        Self { surface, scale, camera }
    }
}

impl Warper for SurfaceWarper {
    fn forward(&self, p: &Point2<f64>) -> Option<Point2<f64>> {
        let ray = self.camera.pixel_to_ray(p);
        let horizontal = ray.x.hypot(ray.z);
        let u = self.scale * ray.x.atan2(ray.z);
        let v = match self.surface {
            WarpSurface::Spherical => self.scale * ray.y.atan2(horizontal),
            WarpSurface::Cylindrical => {
                if horizontal < 1e-12 {
                    return None;
                }
                self.scale * ray.y / horizontal
            }
        };
        Some(Point2::new(u, v))
    }

    fn backward(&self, q: &Point2<f64>) -> Option<Point2<f64>> {
        let theta = q.x / self.scale;
        let ray = match self.surface {
            WarpSurface::Spherical => {
                let phi = q.y / self.scale;
                Vector3::new(theta.sin() * phi.cos(), phi.sin(), theta.cos() * phi.cos())
            }
            WarpSurface::Cylindrical => Vector3::new(theta.sin(), q.y / self.scale, theta.cos()),
        };
        self.camera.ray_to_pixel(&ray)
    }
}

/// A warped image placed on the canvas at `roi`.
#[derive(Debug, Clone, PartialEq)]
pub struct WarpedImage {
    pub roi: Rect,
    pub image: RgbImage,
    /// Blend weight per pixel, row-major over `roi`; zero where the source
    /// does not cover the canvas.
    pub weight: Vec<f32>,
}

impl WarpedImage {
    pub fn covers(&self, x: u32, y: u32) -> bool {
        self.weight[(y * self.roi.width + x) as usize] > 0.0
    }
}

/// Weight falling off linearly towards the image border: the distance to the
/// nearest edge times `sharpness`, capped at 1. Positive for every point a
/// bilinear sample accepts.
pub fn feather_weight(x: f64, y: f64, width: u32, height: u32, sharpness: f32) -> f32 {
    let d = (x + 1.0)
        .min(width as f64 - x)
        .min(y + 1.0)
        .min(height as f64 - y);
    if d <= 0.0 {
        return 0.0;
    }
    (d as f32 * sharpness).clamp(f32::MIN_POSITIVE, 1.0)
}

/// Canvas rectangle covered by a `width x height` source, from samples along
/// its border. `None` if no border point projects or the projection runs
/// off the integer pixel grid (e.g. a border point near the horizon line).
pub fn warp_bounds(warper: &dyn Warper, width: u32, height: u32) -> Option<Rect> {
    if width == 0 || height == 0 {
        return None;
    }
    let max_x = width as f64 - 1.0;
    let max_y = height as f64 - 1.0;
    let samples = |len: f64| -> Vec<f64> {
        let n = (len as usize).clamp(1, 256);
        (0..=n).map(|i| len * i as f64 / n as f64).collect()
    };

    let mut border = Vec::new();
    for x in samples(max_x) {
        border.push(Point2::new(x, 0.0));
        border.push(Point2::new(x, max_y));
    }
    for y in samples(max_y) {
        border.push(Point2::new(0.0, y));
        border.push(Point2::new(max_x, y));
    }

    let mut bounds: Option<(f64, f64, f64, f64)> = None;
    for q in border.iter().filter_map(|p| warper.forward(p)) {
        if !(q.x.is_finite() && q.y.is_finite()) {
            continue;
        }
        bounds = Some(match bounds {
            None => (q.x, q.y, q.x, q.y),
            Some((x0, y0, x1, y1)) => (x0.min(q.x), y0.min(q.y), x1.max(q.x), y1.max(q.y)),
        });
    }
    bounds.and_then(|(x0, y0, x1, y1)| Rect::from_bounds(x0, y0, x1, y1))
}

/// Resample `image` over the canvas rectangle `roi`.
pub fn warp_image(image: &RgbImage, warper: &dyn Warper, roi: Rect, sharpness: f32) -> WarpedImage {
    let (w, h) = (roi.width as usize, roi.height as usize);
    let (src_w, src_h) = image.dimensions();
    let mut pixels = vec![0u8; w * h * 3];
    let mut weight = vec![0.0f32; w * h];

    if w > 0 && h > 0 {
        pixels
            .par_chunks_mut(w * 3)
            .zip(weight.par_chunks_mut(w))
            .enumerate()
            .for_each(|(j, (row, weights))| {
                let cy = (roi.y + j as i32) as f64;
                for i in 0..w {
                    let cx = (roi.x + i as i32) as f64;
                    let Some(src) = warper.backward(&Point2::new(cx, cy)) else {
                        continue;
                    };
                    let Some(rgb) = sample_rgb_bilinear(image, src.x, src.y) else {
                        continue;
                    };
                    for c in 0..3 {
                        row[3 * i + c] = rgb[c].round().clamp(0.0, 255.0) as u8;
                    }
                    weights[i] = feather_weight(src.x, src.y, src_w, src_h, sharpness);
                }
            });
    }

    let image = RgbImage::from_raw(roi.width, roi.height, pixels)
        .unwrap_or_else(|| RgbImage::new(roi.width, roi.height));
    WarpedImage { roi, image, weight }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use pano_core::rotation_from_vector;

    #[test]
    fn plane_warper_translation() {
        let shift = Matrix3::new(1.0, 0.0, 30.0, 0.0, 1.0, -10.0, 0.0, 0.0, 1.0);
        let warper = PlaneWarper::new(shift).unwrap();
        let q = warper.forward(&Point2::new(5.0, 20.0)).unwrap();
        assert_eq!(q, Point2::new(35.0, 10.0));
        assert_eq!(warper.backward(&q).unwrap(), Point2::new(5.0, 20.0));
        assert_eq!(warp_bounds(&warper, 40, 20), Some(Rect::new(30, -10, 40, 20)));

        assert!(PlaneWarper::new(Matrix3::zeros()).is_none());
    }

    #[test]
    fn surface_warpers_invert() {
        let camera = CameraParams::centered(500.0, 320, 240)
            .with_rotation(rotation_from_vector(&Vector3::new(0.05, 0.4, 0.0)));
        for surface in [WarpSurface::Spherical, WarpSurface::Cylindrical] {
            let warper = SurfaceWarper::new(surface, 500.0, camera);
            for p in [Point2::new(0.0, 0.0), Point2::new(160.0, 120.0), Point2::new(300.0, 17.0)] {
                let q = warper.forward(&p).unwrap();
                let back = warper.backward(&q).unwrap();
                assert!((back - p).norm() < 1e-6, "{surface:?}: {p} -> {q} -> {back}");
            }
        }
    }

    #[test]
    fn surface_centre_maps_to_yaw() {
        let yaw = 0.3;
        let camera = CameraParams::centered(500.0, 320, 240)
            .with_rotation(rotation_from_vector(&Vector3::new(0.0, yaw, 0.0)));
        let warper = SurfaceWarper::new(WarpSurface::Cylindrical, 500.0, camera);
        let q = warper.forward(&Point2::new(160.0, 120.0)).unwrap();
        assert!((q.x - 500.0 * yaw).abs() < 1e-9);
        assert!(q.y.abs() < 1e-9);
    }

    #[test]
    fn feather_weight_ramps_to_one() {
        assert_eq!(feather_weight(50.0, 50.0, 200, 200, 0.02), 1.0);
        assert!((feather_weight(0.0, 50.0, 200, 200, 0.02) - 0.02).abs() < 1e-6);
        assert!(feather_weight(-0.5, 50.0, 200, 200, 0.02) > 0.0);
        assert_eq!(feather_weight(-1.5, 50.0, 200, 200, 0.02), 0.0);
    }

    #[test]
    fn warp_identity_copies_pixels() {
        let img = RgbImage::from_fn(12, 8, |x, y| Rgb([(x * 20) as u8, (y * 30) as u8, 7]));
        let warper = PlaneWarper::new(Matrix3::identity()).unwrap();
        let roi = warp_bounds(&warper, 12, 8).unwrap();
        assert_eq!(roi, Rect::new(0, 0, 12, 8));
        let warped = warp_image(&img, &warper, roi, 0.02);
        assert_eq!(warped.image, img);
        assert!(warped.weight.iter().all(|&w| w > 0.0));
    }

    #[test]
    fn warp_leaves_uncovered_pixels_unweighted() {
        let img = RgbImage::from_pixel(10, 10, Rgb([200, 100, 50]));
        let warper = PlaneWarper::new(Matrix3::identity()).unwrap();
        let warped = warp_image(&img, &warper, Rect::new(-5, 0, 20, 10), 0.02);
        assert!(!warped.covers(0, 0));
        assert!(warped.covers(5, 0));
        assert!(!warped.covers(19, 9));
        assert_eq!(warped.image.get_pixel(7, 3), &Rgb([200, 100, 50]));
        assert_eq!(warped.image.get_pixel(1, 3), &Rgb([0, 0, 0]));
    }
}
