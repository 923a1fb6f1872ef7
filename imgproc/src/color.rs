use image::{GrayImage, RgbImage};
use rayon::prelude::*;

/// Fixed-point BT.601 luma, `(4899 R + 9617 G + 1868 B) / 2^14` rounded.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + 8192) >> 14) as u8
}

pub fn convert_rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    let (w, h) = rgb.dimensions();
    let mut gray = GrayImage::new(w, h);
    if w == 0 || h == 0 {
        return gray;
    }

    gray.as_mut()
        .par_chunks_mut(w as usize)
        .zip(rgb.as_raw().par_chunks(w as usize * 3))
        .for_each(|(g_row, rgb_row)| {
            for (g, px) in g_row.iter_mut().zip(rgb_row.chunks_exact(3)) {
                *g = luma(px[0], px[1], px[2]);
            }
        });

    gray
}
