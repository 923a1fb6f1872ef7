use image::GrayImage;

/// Harris corner response at `(x, y)` over a `block_size` window of 3x3
/// Sobel gradients, normalised so that the value is independent of the
/// block size and of the 8-bit intensity range.
///
/// The caller keeps `(x, y)` at least `block_size / 2 + 1` pixels from the border.
pub fn harris_response(image: &GrayImage, x: i32, y: i32, block_size: i32, k: f64) -> f64 {
    let width = image.width() as i32;
    let raw = image.as_raw();
    let at = |px: i32, py: i32| raw[(py * width + px) as usize] as i32;
    let r = block_size / 2;

    let mut a = 0i64;
    let mut b = 0i64;
    let mut c = 0i64;
    for py in y - r..y - r + block_size {
        for px in x - r..x - r + block_size {
            let ix = (at(px + 1, py) - at(px - 1, py)) * 2 + (at(px + 1, py - 1) - at(px - 1, py - 1))
                + (at(px + 1, py + 1) - at(px - 1, py + 1));
            let iy = (at(px, py + 1) - at(px, py - 1)) * 2 + (at(px - 1, py + 1) - at(px - 1, py - 1))
                + (at(px + 1, py + 1) - at(px + 1, py - 1));
            a += (ix * ix) as i64;
            b += (iy * iy) as i64;
            c += (ix * iy) as i64;
        }
    }

    let scale = 1.0 / (4.0 * block_size as f64 * 255.0);
    let scale_sq_sq = scale.powi(4);
    let (a, b, c) = (a as f64, b as f64, c as f64);
    (a * b - c * c - k * (a + b) * (a + b)) * scale_sq_sq
}
