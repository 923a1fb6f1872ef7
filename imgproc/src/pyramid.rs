//! Single-channel `f32` planes and Gaussian/Laplacian pyramids over them.
//!
//! `pyr_down` blurs with the 5-tap binomial kernel and keeps every other
//! pixel; `pyr_up` inserts zeros and blurs with the same kernel scaled by 4.
//! A Laplacian pyramid collapsed with [`collapse_laplacian`] reproduces its
//! source exactly up to float rounding.

use crate::convolve::{
    gaussian_kernel_1d, gaussian_kernel_size, separable_convolve_f32, BorderMode,
};
use image::GrayImage;
use rayon::prelude::*;

const BINOMIAL_5: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];
const BINOMIAL_5_UP: [f32; 5] = [2.0 / 16.0, 8.0 / 16.0, 12.0 / 16.0, 8.0 / 16.0, 2.0 / 16.0];

#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl Plane {
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, 0.0)
    }

    fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn from_gray(image: &GrayImage) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            data: image.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.data[y * self.width + x] = value;
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Gaussian blur with a `+-3 sigma` kernel and reflected borders.
    pub fn blur(&self, sigma: f32) -> Plane {
        if sigma <= 0.0 || self.is_empty() {
            return self.clone();
        }
        let kernel = gaussian_kernel_1d(sigma, gaussian_kernel_size(sigma));
        Plane {
            width: self.width,
            height: self.height,
            data: separable_convolve_f32(
                &self.data,
                self.width,
                self.height,
                &kernel,
                &kernel,
                BorderMode::Reflect101,
            ),
        }
    }

    /// Element-wise `self * other`; both planes must share dimensions.
    pub fn mul(&self, other: &Plane) -> Plane {
        assert_eq!((self.width, self.height), (other.width, other.height));
        Plane {
            width: self.width,
            height: self.height,
            data: self.data.iter().zip(&other.data).map(|(a, b)| a * b).collect(),
        }
    }

    pub fn to_gray(&self) -> GrayImage {
        let data = self
            .data
            .iter()
            .map(|v| v.round().clamp(0.0, 255.0) as u8)
            .collect();
        GrayImage::from_raw(self.width as u32, self.height as u32, data)
            .unwrap_or_else(|| GrayImage::new(self.width as u32, self.height as u32))
    }
}

/// Half-resolution level: `((w + 1) / 2, (h + 1) / 2)`.
pub fn pyr_down(src: &Plane) -> Plane {
    let w = src.width.div_ceil(2).max(1);
    let h = src.height.div_ceil(2).max(1);
    if src.is_empty() {
        return Plane::new(w, h);
    }

    let blurred = separable_convolve_f32(
        &src.data,
        src.width,
        src.height,
        &BINOMIAL_5,
        &BINOMIAL_5,
        BorderMode::Reflect101,
    );

    let mut out = Plane::new(w, h);
    out.data
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| {
            let sy = (2 * y).min(src.height - 1);
            for (x, v) in row.iter_mut().enumerate() {
                let sx = (2 * x).min(src.width - 1);
                *v = blurred[sy * src.width + sx];
            }
        });
    out
}

/// Expands `src` to `width x height`, the size of the level it was reduced from.
pub fn pyr_up(src: &Plane, width: usize, height: usize) -> Plane {
    let mut up = Plane::new(width, height);
    if width == 0 || height == 0 {
        return up;
    }
    for y in (0..height).step_by(2) {
        for x in (0..width).step_by(2) {
            let sx = (x / 2).min(src.width.saturating_sub(1));
            let sy = (y / 2).min(src.height.saturating_sub(1));
            up.set(x, y, src.get(sx, sy));
        }
    }

    up.data = separable_convolve_f32(
        &up.data,
        width,
        height,
        &BINOMIAL_5_UP,
        &BINOMIAL_5_UP,
        BorderMode::Reflect101,
    );
    up
}

pub fn gaussian_pyramid(src: &Plane, levels: usize) -> Vec<Plane> {
    let mut pyramid = Vec::with_capacity(levels + 1);
    pyramid.push(src.clone());
    for l in 0..levels {
        let next = pyr_down(&pyramid[l]);
        pyramid.push(next);
    }
    pyramid
}

/// `levels` band-pass planes followed by the low-pass residual.
pub fn laplacian_pyramid(src: &Plane, levels: usize) -> Vec<Plane> {
    let gaussian = gaussian_pyramid(src, levels);
    let mut pyramid = Vec::with_capacity(levels + 1);
    for l in 0..levels {
        let fine = &gaussian[l];
        let up = pyr_up(&gaussian[l + 1], fine.width, fine.height);
        pyramid.push(Plane {
            width: fine.width,
            height: fine.height,
            data: fine.data.iter().zip(&up.data).map(|(a, b)| a - b).collect(),
        });
    }
    if let Some(residual) = gaussian.into_iter().last() {
        pyramid.push(residual);
    }
    pyramid
}

pub fn collapse_laplacian(pyramid: &[Plane]) -> Plane {
    let Some((residual, bands)) = pyramid.split_last() else {
        return Plane::new(0, 0);
    };
    let mut current = residual.clone();
    for band in bands.iter().rev() {
        let up = pyr_up(&current, band.width, band.height);
        current = Plane {
            width: band.width,
            height: band.height,
            data: band.data.iter().zip(&up.data).map(|(a, b)| a + b).collect(),
        };
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(w: usize, h: usize) -> Plane {
        let mut p = Plane::new(w, h);
        for y in 0..h {
            for x in 0..w {
                p.set(x, y, ((x * 7 + y * 13) % 256) as f32);
            }
        }
        p
    }

    #[test]
    fn pyr_down_sizes() {
        let p = Plane::new(37, 20);
        let d = pyr_down(&p);
        assert_eq!((d.width, d.height), (19, 10));
        let u = pyr_up(&d, 37, 20);
        assert_eq!((u.width, u.height), (37, 20));
    }

    #[test]
    fn pyr_down_keeps_constant() {
        let p = Plane::filled(16, 16, 42.0);
        let d = pyr_down(&p);
        assert!(d.data.iter().all(|v| (v - 42.0).abs() < 1e-4));
    }

    #[test]
    fn laplacian_roundtrip_is_exact() {
        let src = ramp(45, 31);
        let pyramid = laplacian_pyramid(&src, 4);
        assert_eq!(pyramid.len(), 5);
        let back = collapse_laplacian(&pyramid);
        assert_eq!((back.width, back.height), (45, 31));
        let max_err = src
            .data
            .iter()
            .zip(&back.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 1e-3, "max error {max_err}");
    }
}
