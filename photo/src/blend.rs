//! Blending of warped images into one canvas.
//!
//! Pixels covered by a single image are copied from it unchanged. Where
//! images overlap, [`BlendMode::Feather`] averages them with their feather
//! weights and [`BlendMode::MultiBand`] splices their Laplacian pyramids
//! along the seams of the strongest weight.

use crate::warp::WarpedImage;
use image::{GrayImage, RgbImage};
use pano_core::Rect;
use pano_imgproc::{collapse_laplacian, gaussian_pyramid, laplacian_pyramid, pyr_up, Plane};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

const WEIGHT_EPS: f32 = 1e-6;
const NO_OWNER: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Feather,
    MultiBand { bands: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Blended {
    pub image: RgbImage,
    /// 255 where at least one image covers the canvas.
    pub mask: GrayImage,
}

pub fn blend(warped: &[WarpedImage], canvas: Rect, mode: BlendMode) -> Blended {
    let (w, h) = (canvas.width as usize, canvas.height as usize);
    if w == 0 || h == 0 {
        return Blended {
            image: RgbImage::new(canvas.width, canvas.height),
            mask: GrayImage::new(canvas.width, canvas.height),
        };
    }
    let (pixels, mask) = match mode {
        BlendMode::Feather => feather(warped, canvas),
        BlendMode::MultiBand { bands } => multi_band(warped, canvas, bands),
    };
    Blended {
        image: RgbImage::from_raw(canvas.width, canvas.height, pixels)
            .unwrap_or_else(|| RgbImage::new(canvas.width, canvas.height)),
        mask: GrayImage::from_raw(canvas.width, canvas.height, mask)
            .unwrap_or_else(|| GrayImage::new(canvas.width, canvas.height)),
    }
}

/// Visits the covered pixels of `img` on canvas row `y` as
/// `(canvas_x, weight, rgb)`.
fn for_each_on_row(img: &WarpedImage, canvas: &Rect, y: usize, mut f: impl FnMut(usize, f32, [u8; 3])) {
    let j = canvas.y as i64 + y as i64 - img.roi.y as i64;
    if j < 0 || j >= img.roi.height as i64 {
        return;
    }
    let j = j as usize;
    let rw = img.roi.width as usize;
    for i in 0..rw {
        let weight = img.weight[j * rw + i];
        if weight <= 0.0 {
            continue;
        }
        let x = img.roi.x as i64 + i as i64 - canvas.x as i64;
        if x < 0 || x >= canvas.width as i64 {
            continue;
        }
        f(x as usize, weight, img.image.get_pixel(i as u32, j as u32).0);
    }
}

fn feather(warped: &[WarpedImage], canvas: Rect) -> (Vec<u8>, Vec<u8>) {
    let w = canvas.width as usize;
    let h = canvas.height as usize;
    let mut pixels = vec![0u8; w * h * 3];
    let mut mask = vec![0u8; w * h];

    pixels
        .par_chunks_mut(w * 3)
        .zip(mask.par_chunks_mut(w))
        .enumerate()
        .for_each(|(y, (row, mask_row))| {
            let mut acc = vec![[0.0f32; 3]; w];
            let mut weight_sum = vec![0.0f32; w];
            let mut count = vec![0u32; w];
            let mut last = vec![[0u8; 3]; w];
            for img in warped {
                for_each_on_row(img, &canvas, y, |x, weight, rgb| {
                    for c in 0..3 {
                        acc[x][c] += weight * rgb[c] as f32;
                    }
                    weight_sum[x] += weight;
                    count[x] += 1;
                    last[x] = rgb;
                });
            }
            for x in 0..w {
                match count[x] {
                    0 => continue,
                    1 => row[3 * x..3 * x + 3].copy_from_slice(&last[x]),
                    _ => {
                        for c in 0..3 {
                            row[3 * x + c] = (acc[x][c] / weight_sum[x]).round().clamp(0.0, 255.0) as u8;
                        }
                    }
                }
                mask_row[x] = 255;
            }
        });
    (pixels, mask)
}

/// Number of pyramid reductions until the plane is a single pixel.
fn full_depth(width: usize, height: usize) -> usize {
    let (mut w, mut h, mut n) = (width, height, 0);
    while w > 1 || h > 1 {
        w = w.div_ceil(2);
        h = h.div_ceil(2);
        n += 1;
    }
    n
}

/// Push-pull fill: pixels where `valid` is zero receive the normalised
/// Gaussian average of the valid pixels around them, coarse to fine.
/// Valid pixels keep their value.
pub fn fill_uncovered(values: &Plane, valid: &Plane) -> Plane {
    let levels = full_depth(values.width, values.height);
    let num = gaussian_pyramid(&values.mul(valid), levels);
    let den = gaussian_pyramid(valid, levels);

    let ratio = |n: &Plane, d: &Plane, fallback: Option<&Plane>| -> Plane {
        let data = n
            .data
            .iter()
            .zip(&d.data)
            .enumerate()
            .map(|(i, (&a, &b))| {
                if b > WEIGHT_EPS {
                    a / b
                } else {
                    fallback.map_or(0.0, |f| f.data[i])
                }
            })
            .collect();
        Plane {
            width: n.width,
            height: n.height,
            data,
        }
    };

    let mut estimate = ratio(&num[levels], &den[levels], None);
    for l in (0..levels).rev() {
        let up = pyr_up(&estimate, num[l].width, num[l].height);
        estimate = ratio(&num[l], &den[l], Some(&up));
    }
    estimate
}

fn multi_band(warped: &[WarpedImage], canvas: Rect, bands: usize) -> (Vec<u8>, Vec<u8>) {
    let w = canvas.width as usize;
    let h = canvas.height as usize;
    let levels = bands.min(w.min(h).ilog2() as usize);

    // Seam owner: the strongest weight, ties to the lowest index.
    let mut owner = vec![NO_OWNER; w * h];
    let mut best = vec![0.0f32; w * h];
    let mut count = vec![0u32; w * h];
    let mut single = vec![[0u8; 3]; w * h];
    for (k, img) in warped.iter().enumerate() {
        for y in 0..h {
            for_each_on_row(img, &canvas, y, |x, weight, rgb| {
                let idx = y * w + x;
                if weight > best[idx] {
                    best[idx] = weight;
                    owner[idx] = k;
                }
                count[idx] += 1;
                single[idx] = rgb;
            });
        }
    }

    let band_size: Vec<(usize, usize)> = gaussian_pyramid(&Plane::new(w, h), levels)
        .iter()
        .map(|p| (p.width, p.height))
        .collect();
    let mut acc: Vec<[Plane; 3]> = band_size
        .iter()
        .map(|&(bw, bh)| std::array::from_fn(|_| Plane::new(bw, bh)))
        .collect();
    let mut weight_acc: Vec<Plane> = band_size.iter().map(|&(bw, bh)| Plane::new(bw, bh)).collect();

    for (k, img) in warped.iter().enumerate() {
        let seam = Plane {
            width: w,
            height: h,
            data: owner.iter().map(|&o| if o == k { 1.0 } else { 0.0 }).collect(),
        };
        if seam.data.iter().all(|&v| v == 0.0) {
            continue;
        }

        let mut valid = Plane::new(w, h);
        let mut channels: [Plane; 3] = std::array::from_fn(|_| Plane::new(w, h));
        for y in 0..h {
            for_each_on_row(img, &canvas, y, |x, _, rgb| {
                valid.set(x, y, 1.0);
                for c in 0..3 {
                    channels[c].set(x, y, rgb[c] as f32);
                }
            });
        }

        let seam_pyramid = gaussian_pyramid(&seam, levels);
        let bands: Vec<Vec<Plane>> = channels
            .par_iter()
            .map(|channel| laplacian_pyramid(&fill_uncovered(channel, &valid), levels))
            .collect();

        for l in 0..=levels {
            let g = &seam_pyramid[l];
            for c in 0..3 {
                for ((a, b), s) in acc[l][c].data.iter_mut().zip(&bands[c][l].data).zip(&g.data) {
                    *a += b * s;
                }
            }
            for (a, s) in weight_acc[l].data.iter_mut().zip(&g.data) {
                *a += s;
            }
        }
    }

    let collapsed: Vec<Plane> = (0..3)
        .into_par_iter()
        .map(|c| {
            let pyramid: Vec<Plane> = acc
                .iter()
                .zip(&weight_acc)
                .map(|(band, weight)| Plane {
                    width: weight.width,
                    height: weight.height,
                    data: band[c]
                        .data
                        .iter()
                        .zip(&weight.data)
                        .map(|(&v, &s)| if s > WEIGHT_EPS { v / s } else { 0.0 })
                        .collect(),
                })
                .collect();
            collapse_laplacian(&pyramid)
        })
        .collect();

    let mut pixels = vec![0u8; w * h * 3];
    let mut mask = vec![0u8; w * h];
    for idx in 0..w * h {
        match count[idx] {
            0 => continue,
            1 => pixels[3 * idx..3 * idx + 3].copy_from_slice(&single[idx]),
            _ => {
                for c in 0..3 {
                    pixels[3 * idx + c] = collapsed[c].data[idx].round().clamp(0.0, 255.0) as u8;
                }
            }
        }
        mask[idx] = 255;
    }
    debug!(levels, images = warped.len(), "multi-band blend done");
    (pixels, mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warp::feather_weight;
    use image::Rgb;

    fn flat(roi: Rect, value: u8) -> WarpedImage {
        let (w, h) = (roi.width, roi.height);
        let weight = (0..h)
            .flat_map(|y| (0..w).map(move |x| feather_weight(x as f64, y as f64, w, h, 0.02)))
            .collect();
        WarpedImage {
            roi,
            image: RgbImage::from_pixel(w, h, Rgb([value, value / 2, 10])),
            weight,
        }
    }

    fn overlapping() -> (Vec<WarpedImage>, Rect) {
        let a = flat(Rect::new(0, 0, 60, 40), 200);
        let b = flat(Rect::new(40, 0, 60, 40), 100);
        let canvas = a.roi.union(&b.roi);
        (vec![a, b], canvas)
    }

    #[test]
    fn feather_averages_overlap() {
        let (images, canvas) = overlapping();
        let out = blend(&images, canvas, BlendMode::Feather);
        assert_eq!(out.image.dimensions(), (100, 40));
        assert_eq!(out.image.get_pixel(10, 20), &Rgb([200, 100, 10]));
        assert_eq!(out.image.get_pixel(90, 20), &Rgb([100, 50, 10]));
        // 0.2 * 200 + 0.22 * 100 over 0.42
        assert_eq!(out.image.get_pixel(50, 20).0[0], 148);
        assert!(out.mask.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn multi_band_copies_single_coverage_and_mixes_seam() {
        let (images, canvas) = overlapping();
        let out = blend(&images, canvas, BlendMode::MultiBand { bands: 5 });
        assert_eq!(out.image.get_pixel(10, 20), &Rgb([200, 100, 10]));
        assert_eq!(out.image.get_pixel(90, 20), &Rgb([100, 50, 10]));
        for x in 40..60 {
            let v = out.image.get_pixel(x, 20).0[0];
            assert!((99..=201).contains(&v), "x {x}: {v}");
        }
        let mid = out.image.get_pixel(50, 20).0[0];
        assert!(mid > 110 && mid < 190, "seam value {mid}");
    }

    #[test]
    fn uncovered_canvas_is_masked() {
        let a = flat(Rect::new(0, 0, 20, 20), 80);
        let canvas = Rect::new(-10, 0, 40, 20);
        for mode in [BlendMode::Feather, BlendMode::MultiBand { bands: 3 }] {
            let out = blend(std::slice::from_ref(&a), canvas, mode);
            assert_eq!(out.mask.get_pixel(0, 5).0[0], 0);
            assert_eq!(out.image.get_pixel(0, 5), &Rgb([0, 0, 0]));
            assert_eq!(out.mask.get_pixel(15, 5).0[0], 255);
            assert_eq!(out.image.get_pixel(15, 5), &Rgb([80, 40, 10]));
        }
    }

    #[test]
    fn fill_extends_valid_values() {
        let mut values = Plane::new(16, 8);
        let mut valid = Plane::new(16, 8);
        for y in 0..8 {
            for x in 0..6 {
                values.set(x, y, 50.0);
                valid.set(x, y, 1.0);
            }
        }
        let filled = fill_uncovered(&values, &valid);
        assert!(filled.data.iter().all(|&v| (v - 50.0).abs() < 1e-3));
    }
}
