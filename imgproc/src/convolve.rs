use image::GrayImage;
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMode {
    Constant(u8),
    Replicate,
    /// `gfedcb|abcdefgh|gfedcba`, the edge pixel is not repeated.
    Reflect101,
}

impl BorderMode {
    fn fill(&self) -> f32 {
        match self {
            BorderMode::Constant(v) => *v as f32,
            _ => 0.0,
        }
    }
}

/// Maps a possibly out-of-range coordinate into `0..len`; `None` means "use the constant".
pub fn map_coord(coord: isize, len: usize, mode: BorderMode) -> Option<usize> {
    let n = len as isize;
    if n <= 0 {
        return None;
    }

    match mode {
        BorderMode::Constant(_) => {
            if coord < 0 || coord >= n {
                None
            } else {
                Some(coord as usize)
            }
        }
        BorderMode::Replicate => Some(coord.clamp(0, n - 1) as usize),
        BorderMode::Reflect101 => {
            if n == 1 {
                return Some(0);
            }
            let period = 2 * n - 2;
            let mut c = coord % period;
            if c < 0 {
                c += period;
            }
            if c >= n {
                c = period - c;
            }
            Some(c as usize)
        }
    }
}

pub fn gaussian_kernel_1d(sigma: f32, size: usize) -> Vec<f32> {
    assert!(size % 2 == 1, "gaussian kernel size must be odd");
    let mut kernel = Vec::with_capacity(size);
    let center = (size / 2) as isize;
    let sigma2 = sigma * sigma;
    let mut sum = 0.0f32;

    for i in 0..size {
        let x = (i as isize - center) as f32;
        let v = (-(x * x) / (2.0 * sigma2)).exp();
        kernel.push(v);
        sum += v;
    }

    if sum != 0.0 {
        for v in &mut kernel {
            *v /= sum;
        }
    }

    kernel
}

/// Odd kernel width covering +-3 sigma.
pub fn gaussian_kernel_size(sigma: f32) -> usize {
    ((sigma * 6.0).ceil() as usize) | 1
}

/// Separable convolution of a row-major `f32` plane: horizontal pass with
/// `kx` into a scratch plane, then vertical pass with `ky`.
pub fn separable_convolve_f32(
    src: &[f32],
    width: usize,
    height: usize,
    kx: &[f32],
    ky: &[f32],
    border: BorderMode,
) -> Vec<f32> {
    assert!(kx.len() % 2 == 1, "kx size must be odd");
    assert!(ky.len() % 2 == 1, "ky size must be odd");
    assert_eq!(src.len(), width * height);

    if width == 0 || height == 0 {
        return Vec::new();
    }

    let rx = (kx.len() / 2) as isize;
    let ry = (ky.len() / 2) as isize;
    let fill = border.fill();
    let mut tmp = vec![0.0f32; width * height];

    tmp.par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row_out)| {
            let row = &src[y * width..(y + 1) * width];
            for (x, out) in row_out.iter_mut().enumerate() {
                let mut sum = 0.0;
                for (k, &w) in kx.iter().enumerate() {
                    let sx = x as isize + k as isize - rx;
                    let v = match map_coord(sx, width, border) {
                        Some(ix) => row[ix],
                        None => fill,
                    };
                    sum += v * w;
                }
                *out = sum;
            }
        });

    let mut out = vec![0.0f32; width * height];
    out.par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row_out)| {
            for (k, &w) in ky.iter().enumerate() {
                let sy = y as isize + k as isize - ry;
                match map_coord(sy, height, border) {
                    Some(iy) => {
                        let row = &tmp[iy * width..(iy + 1) * width];
                        for (o, &v) in row_out.iter_mut().zip(row) {
                            *o += v * w;
                        }
                    }
                    None => {
                        for o in row_out.iter_mut() {
                            *o += fill * w;
                        }
                    }
                }
            }
        });

    out
}

pub fn separable_convolve(image: &GrayImage, kernel_1d: &[f32], border: BorderMode) -> GrayImage {
    let (w, h) = image.dimensions();
    let src: Vec<f32> = image.as_raw().iter().map(|&v| v as f32).collect();
    let out = separable_convolve_f32(&src, w as usize, h as usize, kernel_1d, kernel_1d, border);
    let data = out.iter().map(|v| v.round().clamp(0.0, 255.0) as u8).collect();
    GrayImage::from_raw(w, h, data).unwrap_or_else(|| GrayImage::new(w, h))
}

pub fn gaussian_blur_with_border(image: &GrayImage, sigma: f32, border: BorderMode) -> GrayImage {
    if sigma <= 0.0 {
        return image.clone();
    }
    let kernel_1d = gaussian_kernel_1d(sigma, gaussian_kernel_size(sigma));
    separable_convolve(image, &kernel_1d, border)
}

pub fn gaussian_blur(image: &GrayImage, sigma: f32) -> GrayImage {
    gaussian_blur_with_border(image, sigma, BorderMode::Reflect101)
}
