use image::GrayImage;
use pano_core::KeyPoint;
use rayon::prelude::*;

/// Bresenham circle of radius 3, clockwise from 12 o'clock.
pub const CIRCLE_OFFSETS: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Contiguous arc length required by FAST-9.
pub const ARC_LENGTH: usize = 9;

/// Largest threshold at which `(x, y)` is still a FAST-9 corner, i.e. the
/// point passes for every `threshold <= fast_score`. Negative when the point
/// is not a corner at any threshold. The caller keeps `(x, y)` at least 3
/// pixels from the border.
pub fn fast_score(image: &GrayImage, x: i32, y: i32) -> i32 {
    let width = image.width() as usize;
    let raw = image.as_raw();
    let p = raw[y as usize * width + x as usize] as i32;

    let mut diff = [0i32; 16];
    for (d, &(dx, dy)) in diff.iter_mut().zip(&CIRCLE_OFFSETS) {
        *d = raw[(y + dy) as usize * width + (x + dx) as usize] as i32 - p;
    }

    let mut best = i32::MIN;
    for start in 0..16 {
        let mut min_bright = i32::MAX;
        let mut min_dark = i32::MAX;
        for k in 0..ARC_LENGTH {
            let d = diff[(start + k) % 16];
            min_bright = min_bright.min(d);
            min_dark = min_dark.min(-d);
        }
        best = best.max(min_bright).max(min_dark);
    }
    best - 1
}

/// Cheap necessary condition: a 9-arc covers at least two of the four
/// compass points.
#[inline]
fn passes_compass_test(image: &GrayImage, x: i32, y: i32, threshold: i32) -> bool {
    let width = image.width() as usize;
    let raw = image.as_raw();
    let p = raw[y as usize * width + x as usize] as i32;
    let mut brighter = 0;
    let mut darker = 0;
    for &(dx, dy) in [(0, -3), (3, 0), (0, 3), (-3, 0)].iter() {
        let v = raw[(y + dy) as usize * width + (x + dx) as usize] as i32;
        if v > p + threshold {
            brighter += 1;
        } else if v < p - threshold {
            darker += 1;
        }
    }
    brighter >= 2 || darker >= 2
}

pub fn is_corner(image: &GrayImage, x: i32, y: i32, threshold: u8) -> bool {
    passes_compass_test(image, x, y, threshold as i32) && fast_score(image, x, y) >= threshold as i32
}

/// FAST-9 detection with 3x3 non-maximum suppression on the corner score.
///
/// Only pixels at least `border` (>= 3) away from every edge are tested.
/// Keypoints come back in row-major order with `response` set to the score.
pub fn fast_detect(image: &GrayImage, threshold: u8, border: u32) -> Vec<KeyPoint> {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let border = border.max(3) as i32;
    if width <= 2 * border || height <= 2 * border {
        return Vec::new();
    }

    let mut scores = vec![0i32; (width * height) as usize];
    scores
        .par_chunks_mut(width as usize)
        .enumerate()
        .skip(border as usize)
        .take((height - 2 * border) as usize)
        .for_each(|(y, row)| {
            let y = y as i32;
            for x in border..width - border {
                if is_corner(image, x, y, threshold) {
                    // Shift by one so that a zero score still marks a corner.
                    row[x as usize] = fast_score(image, x, y) + 1;
                }
            }
        });

    let mut keypoints = Vec::new();
    for y in border..height - border {
        for x in border..width - border {
            let s = scores[(y * width + x) as usize];
            if s <= 0 {
                continue;
            }
            let mut is_max = true;
            'nms: for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let n = scores[((y + dy) * width + (x + dx)) as usize];
                    // Ties are broken towards the earlier pixel in raster order.
                    if n > s || (n == s && (dy < 0 || (dy == 0 && dx < 0))) {
                        is_max = false;
                        break 'nms;
                    }
                }
            }
            if is_max {
                keypoints.push(KeyPoint::new(x as f64, y as f64).with_response((s - 1) as f64));
            }
        }
    }

    keypoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn square(size: u32, x0: u32, y0: u32, side: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let inside = x >= x0 && x < x0 + side && y >= y0 && y < y0 + side;
            Luma([if inside { 200 } else { 30 }])
        })
    }

    #[test]
    fn flat_image_has_no_corners() {
        let img = GrayImage::from_pixel(40, 40, Luma([128]));
        assert!(fast_detect(&img, 20, 3).is_empty());
    }

    #[test]
    fn square_corners_are_detected() {
        let img = square(64, 20, 20, 24);
        let kps = fast_detect(&img, 20, 3);
        assert!(!kps.is_empty());
        for (cx, cy) in [(20.0, 20.0), (43.0, 20.0), (20.0, 43.0), (43.0, 43.0)] {
            assert!(
                kps.iter().any(|k| (k.x - cx).abs() <= 2.0 && (k.y - cy).abs() <= 2.0),
                "missing corner near ({cx}, {cy})"
            );
        }
        // The middle of an edge is not a corner.
        assert!(!kps.iter().any(|k| (k.x - 32.0).abs() < 3.0 && (k.y - 20.0).abs() < 2.0));
    }

    #[test]
    fn score_reflects_contrast() {
        let img = square(64, 20, 20, 24);
        let score = fast_score(&img, 20, 20);
        assert!(score >= 20);
        assert!(is_corner(&img, 20, 20, 20));
        assert!(!is_corner(&img, 20, 20, 200));
    }
}
