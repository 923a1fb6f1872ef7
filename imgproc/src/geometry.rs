use crate::convolve::{map_coord, BorderMode};
use image::{GrayImage, RgbImage};
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;

pub fn get_pixel_bilinear(img: &GrayImage, x: f32, y: f32) -> f32 {
    get_pixel_bilinear_with_border(img, x, y, BorderMode::Constant(0))
}

pub fn get_pixel_bilinear_with_border(img: &GrayImage, x: f32, y: f32, border: BorderMode) -> f32 {
    let x0 = x.floor() as isize;
    let y0 = y.floor() as isize;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let v00 = sample_pixel(img, x0, y0, border);
    let v10 = sample_pixel(img, x0 + 1, y0, border);
    let v01 = sample_pixel(img, x0, y0 + 1, border);
    let v11 = sample_pixel(img, x0 + 1, y0 + 1, border);

    let v0 = v00 * (1.0 - fx) + v10 * fx;
    let v1 = v01 * (1.0 - fx) + v11 * fx;
    v0 * (1.0 - fy) + v1 * fy
}

fn sample_pixel(img: &GrayImage, x: isize, y: isize, border: BorderMode) -> f32 {
    let width = img.width() as usize;
    let height = img.height() as usize;

    match (map_coord(x, width, border), map_coord(y, height, border)) {
        (Some(ix), Some(iy)) => img.as_raw()[iy * width + ix] as f32,
        _ => match border {
            BorderMode::Constant(v) => v as f32,
            _ => 0.0,
        },
    }
}

/// Bilinear RGB sample. Points within half a pixel outside the image are
/// clamped onto the edge; anything further out is `None`.
pub fn sample_rgb_bilinear(img: &RgbImage, x: f64, y: f64) -> Option<[f32; 3]> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    let max_x = (w - 1) as f64;
    let max_y = (h - 1) as f64;
    if x < -0.5 || y < -0.5 || x > max_x + 0.5 || y > max_y + 0.5 || !x.is_finite() || !y.is_finite() {
        return None;
    }
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let p00 = img.get_pixel(x0, y0).0;
    let p10 = img.get_pixel(x1, y0).0;
    let p01 = img.get_pixel(x0, y1).0;
    let p11 = img.get_pixel(x1, y1).0;

    let mut out = [0.0f32; 3];
    for c in 0..3 {
        let v0 = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let v1 = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = v0 * (1.0 - fy) + v1 * fy;
    }
    Some(out)
}

/// Destination-to-source mapping for a homography that maps source pixels
/// to destination pixels. `None` when the homography is singular.
fn inverse_map(h: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    h.try_inverse().filter(|m| m.iter().all(|v| v.is_finite()))
}

#[inline]
fn map_point(m: &Matrix3<f64>, x: f64, y: f64) -> Option<(f64, f64)> {
    let v = m * Vector3::new(x, y, 1.0);
    if v.z.abs() < 1e-12 {
        None
    } else {
        Some((v.x / v.z, v.y / v.z))
    }
}

/// Warp `src` by the source-to-destination homography `h` onto a
/// `width x height` canvas; unmapped pixels are black.
pub fn warp_perspective(src: &GrayImage, h: &Matrix3<f64>, width: u32, height: u32) -> GrayImage {
    let mut dst = GrayImage::new(width, height);
    let Some(inv) = inverse_map(h) else {
        return dst;
    };
    if width == 0 {
        return dst;
    }

    dst.as_mut()
        .par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                if let Some((sx, sy)) = map_point(&inv, x as f64, y as f64) {
                    let v = get_pixel_bilinear(src, sx as f32, sy as f32);
                    *out = v.round().clamp(0.0, 255.0) as u8;
                }
            }
        });

    dst
}

pub fn warp_perspective_rgb(src: &RgbImage, h: &Matrix3<f64>, width: u32, height: u32) -> RgbImage {
    let mut dst = RgbImage::new(width, height);
    let Some(inv) = inverse_map(h) else {
        return dst;
    };
    if width == 0 {
        return dst;
    }

    dst.as_mut()
        .par_chunks_mut(width as usize * 3)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                let sample = map_point(&inv, x as f64, y as f64)
                    .and_then(|(sx, sy)| sample_rgb_bilinear(src, sx, sy));
                if let Some(rgb) = sample {
                    for c in 0..3 {
                        px[c] = rgb[c].round().clamp(0.0, 255.0) as u8;
                    }
                }
            }
        });

    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let img = GrayImage::from_fn(2, 2, |x, y| Luma([(x * 100 + y * 50) as u8]));
        assert!((get_pixel_bilinear(&img, 0.5, 0.0) - 50.0).abs() < 1e-4);
        assert!((get_pixel_bilinear(&img, 0.5, 0.5) - 75.0).abs() < 1e-4);
        assert_eq!(get_pixel_bilinear(&img, -3.0, 0.0), 0.0);
    }

    #[test]
    fn rgb_sampling_rejects_far_outside() {
        let img = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
        assert_eq!(sample_rgb_bilinear(&img, -0.4, 2.4), Some([10.0, 20.0, 30.0]));
        assert!(sample_rgb_bilinear(&img, -0.6, 1.0).is_none());
        assert!(sample_rgb_bilinear(&img, 1.0, f64::NAN).is_none());
    }

    #[test]
    fn translation_warp_shifts_content() {
        let src = GrayImage::from_fn(20, 10, |x, y| Luma([(x * 10 + y) as u8]));
        let h = Matrix3::new(1.0, 0.0, 3.0, 0.0, 1.0, 2.0, 0.0, 0.0, 1.0);
        let dst = warp_perspective(&src, &h, 20, 10);
        assert_eq!(dst.get_pixel(5, 4)[0], src.get_pixel(2, 2)[0]);
        assert_eq!(dst.get_pixel(1, 1)[0], 0);

        let rgb = RgbImage::from_pixel(8, 8, Rgb([200, 100, 50]));
        let warped = warp_perspective_rgb(&rgb, &h, 12, 12);
        assert_eq!(warped.get_pixel(5, 5), &Rgb([200, 100, 50]));
        assert_eq!(warped.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }
}
