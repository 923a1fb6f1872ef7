use nalgebra::{Matrix3, Point2, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Axis-aligned integer rectangle; `x`/`y` may be negative in a reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Smallest integer rectangle containing the real interval `[min, max]` on
    /// both axes. `None` when a bound is not finite, the interval is reversed,
    /// or an edge falls outside the `i32` pixel grid.
    pub fn from_bounds(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Option<Self> {
        let (x0, x1) = grid_span(min_x, max_x)?;
        let (y0, y1) = grid_span(min_y, max_y)?;
        Some(Self::new(x0 as i32, y0 as i32, (x1 - x0) as u32, (y1 - y0) as u32))
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(
            x,
            y,
            u32::try_from(right - x as i64).unwrap_or(u32::MAX),
            u32::try_from(bottom - y as i64).unwrap_or(u32::MAX),
        )
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && (x as i64) < self.right() && (y as i64) < self.bottom()
    }
}

/// Integer start and exclusive end covering `[min, max]`, both on the `i32` grid.
fn grid_span(min: f64, max: f64) -> Option<(i64, i64)> {
    if !(min.is_finite() && max.is_finite()) || min > max {
        return None;
    }
    let start = min.floor();
    let end = max.ceil() + 1.0;
    if start < i32::MIN as f64 || end > i32::MAX as f64 {
        return None;
    }
    Some((start as i64, end as i64))
}

/// Pinhole camera with square pixels: focal length, principal point and a
/// camera-to-world rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraParams {
    pub focal: f64,
    pub ppx: f64,
    pub ppy: f64,
    pub rotation: Matrix3<f64>,
}

impl CameraParams {
    pub fn new(focal: f64, ppx: f64, ppy: f64) -> Self {
        Self {
            focal,
            ppx,
            ppy,
            rotation: Matrix3::identity(),
        }
    }

    /// Principal point at the image centre.
    pub fn centered(focal: f64, width: u32, height: u32) -> Self {
        Self::new(focal, width as f64 / 2.0, height as f64 / 2.0)
    }

    pub fn with_rotation(mut self, rotation: Matrix3<f64>) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn k(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focal, 0.0, self.ppx, 0.0, self.focal, self.ppy, 0.0, 0.0, 1.0,
        )
    }

    pub fn k_inv(&self) -> Matrix3<f64> {
        let f = self.focal;
        Matrix3::new(
            1.0 / f,
            0.0,
            -self.ppx / f,
            0.0,
            1.0 / f,
            -self.ppy / f,
            0.0,
            0.0,
            1.0,
        )
    }

    /// World-frame viewing ray of a pixel.
    pub fn pixel_to_ray(&self, p: &Point2<f64>) -> Vector3<f64> {
        self.rotation * (self.k_inv() * Vector3::new(p.x, p.y, 1.0))
    }

    /// Pixel hit by a world-frame ray, `None` when the ray points behind the camera.
    pub fn ray_to_pixel(&self, ray: &Vector3<f64>) -> Option<Point2<f64>> {
        let cam = self.rotation.transpose() * ray;
        if cam.z <= 1e-9 {
            return None;
        }
        Some(Point2::new(
            self.focal * cam.x / cam.z + self.ppx,
            self.focal * cam.y / cam.z + self.ppy,
        ))
    }

    /// Homography taking pixels of `self` to pixels of `other` (shared centre of projection).
    pub fn homography_to(&self, other: &CameraParams) -> Matrix3<f64> {
        other.k() * other.rotation.transpose() * self.rotation * self.k_inv()
    }
}

/// Apply a homography to a point; `None` when the point maps to infinity.
pub fn project_point(h: &Matrix3<f64>, p: &Point2<f64>) -> Option<Point2<f64>> {
    let v = h * Vector3::new(p.x, p.y, 1.0);
    if v.z.abs() < 1e-12 {
        return None;
    }
    Some(Point2::new(v.x / v.z, v.y / v.z))
}

/// Scale a homography so that `H[2,2] == 1` when possible.
pub fn normalize_homography(h: &Matrix3<f64>) -> Matrix3<f64> {
    let s = h[(2, 2)];
    if s.abs() > f64::EPSILON {
        h / s
    } else {
        *h
    }
}

/// Hartley normalisation: translate to zero mean and scale to an average
/// distance of sqrt(2). Returns the normalised points and the transform applied.
pub fn normalize_points(points: &[Point2<f64>]) -> Option<(Vec<Point2<f64>>, Matrix3<f64>)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points
        .iter()
        .map(|p| Point2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    Some((normalized, t))
}

/// Closest rotation (Frobenius norm) to a matrix that is a rotation up to scale and noise.
pub fn orthonormalize(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        r = -r;
    }
    if r.iter().all(|v| v.is_finite()) {
        Some(r)
    } else {
        None
    }
}

pub fn rotation_from_vector(v: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::new(*v).into_inner()
}

pub fn rotation_to_vector(r: &Matrix3<f64>) -> Vector3<f64> {
    Rotation3::from_matrix_unchecked(*r).scaled_axis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_union_and_bounds() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(-5, 4, 10, 10);
        let u = a.union(&b);
        assert_eq!(u, Rect::new(-5, 0, 15, 14));
        assert!(u.contains(-5, 0));
        assert!(!u.contains(10, 0));

        let r = Rect::from_bounds(-0.5, 0.2, 9.1, 4.0).unwrap();
        assert_eq!(r, Rect::new(-1, 0, 12, 5));
        assert_eq!(r.right(), 11);
    }

    #[test]
    fn rect_bounds_reject_points_off_the_pixel_grid() {
        assert!(Rect::from_bounds(0.0, 0.0, 9.9e12, 99.0).is_none());
        assert!(Rect::from_bounds(-3.0e9, 0.0, 10.0, 10.0).is_none());
        assert!(Rect::from_bounds(0.0, f64::NAN, 10.0, 10.0).is_none());
        assert!(Rect::from_bounds(0.0, 0.0, f64::INFINITY, 10.0).is_none());
        assert!(Rect::from_bounds(5.0, 0.0, 1.0, 10.0).is_none());

        let wide = Rect::from_bounds(-2.0e9, 0.0, 2.0e9, 1.0).unwrap();
        assert_eq!(wide.area(), 2 * (4_000_000_001u64));
        let far = Rect::new(i32::MAX - 10, 0, 10, 1);
        let u = wide.union(&far);
        assert_eq!(u.x, -2_000_000_000);
        assert_eq!(u.right(), i32::MAX as i64);
    }

    #[test]
    fn normalize_points_has_zero_mean_and_sqrt2_spread() {
        let pts = vec![
            Point2::new(10.0, 10.0),
            Point2::new(20.0, 10.0),
            Point2::new(20.0, 30.0),
            Point2::new(10.0, 30.0),
        ];
        let (norm, t) = normalize_points(&pts).unwrap();
        let mx: f64 = norm.iter().map(|p| p.x).sum::<f64>() / 4.0;
        let my: f64 = norm.iter().map(|p| p.y).sum::<f64>() / 4.0;
        assert!(mx.abs() < 1e-12 && my.abs() < 1e-12);
        let d: f64 = norm.iter().map(|p| p.coords.norm()).sum::<f64>() / 4.0;
        assert!((d - std::f64::consts::SQRT_2).abs() < 1e-12);

        let mapped = project_point(&t, &pts[2]).unwrap();
        assert!((mapped - norm[2]).norm() < 1e-12);

        assert!(normalize_points(&[Point2::new(1.0, 1.0), Point2::new(1.0, 1.0)]).is_none());
    }

    #[test]
    fn camera_homography_maps_rays_consistently() {
        let rot = rotation_from_vector(&Vector3::new(0.0, 0.2, 0.0));
        let a = CameraParams::centered(700.0, 800, 600);
        let b = CameraParams::centered(700.0, 800, 600).with_rotation(rot);
        let h = a.homography_to(&b);

        let p = Point2::new(650.0, 280.0);
        let via_h = project_point(&h, &p).unwrap();
        let via_ray = b.ray_to_pixel(&a.pixel_to_ray(&p)).unwrap();
        assert!((via_h - via_ray).norm() < 1e-9);
    }

    #[test]
    fn orthonormalize_recovers_scaled_rotation() {
        let r = rotation_from_vector(&Vector3::new(0.1, -0.3, 0.05));
        let noisy = r * 3.5 + Matrix3::from_element(1e-6);
        let back = orthonormalize(&noisy).unwrap();
        assert!((back - r).norm() < 1e-5);
        assert!((rotation_to_vector(&back) - Vector3::new(0.1, -0.3, 0.05)).norm() < 1e-5);
    }
}
