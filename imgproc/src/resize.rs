use image::GrayImage;
use rayon::prelude::*;

/// Bilinear resize with pixel-centre alignment: destination pixel `x`
/// samples the source at `(x + 0.5) * src_w / dst_w - 0.5`.
pub fn resize(src: &GrayImage, width: u32, height: u32) -> GrayImage {
    if width == 0 || height == 0 || src.width() == 0 || src.height() == 0 {
        return GrayImage::new(width, height);
    }
    resize_linear(src, width, height)
}

fn resize_linear(src: &GrayImage, width: u32, height: u32) -> GrayImage {
    let mut dst = GrayImage::new(width, height);
    let sx = src.width() as f32 / width as f32;
    let sy = src.height() as f32 / height as f32;
    let max_x = src.width() - 1;
    let max_y = src.height() - 1;

    dst.as_mut()
        .par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let fy = ((y as f32 + 0.5) * sy - 0.5).clamp(0.0, max_y as f32);
            let y0 = fy as u32;
            let y1 = (y0 + 1).min(max_y);
            let dy = fy - y0 as f32;

            for (x, out) in row.iter_mut().enumerate() {
                let fx = ((x as f32 + 0.5) * sx - 0.5).clamp(0.0, max_x as f32);
                let x0 = fx as u32;
                let x1 = (x0 + 1).min(max_x);
                let dx = fx - x0 as f32;

                let v00 = src.get_pixel(x0, y0)[0] as f32;
                let v10 = src.get_pixel(x1, y0)[0] as f32;
                let v01 = src.get_pixel(x0, y1)[0] as f32;
                let v11 = src.get_pixel(x1, y1)[0] as f32;

                let v0 = v00 * (1.0 - dx) + v10 * dx;
                let v1 = v01 * (1.0 - dx) + v11 * dx;
                let v = v0 * (1.0 - dy) + v1 * dy;

                *out = v.round().clamp(0.0, 255.0) as u8;
            }
        });

    dst
}
