use image::{imageops, GrayImage, RgbImage};
use pano_core::Rect;
use pano_imgproc::{convert_rgb_to_gray, largest_component, Connectivity};

/// Non-black pixels of `image` as a binary mask.
fn foreground(image: &RgbImage) -> GrayImage {
    let mut gray = convert_rgb_to_gray(image);
    for p in gray.pixels_mut() {
        p.0[0] = if p.0[0] >= 1 { 255 } else { 0 };
    }
    gray
}

/// Bounding box of the largest 8-connected non-black region, `None` for an
/// all-black image.
pub fn black_border_rect(image: &RgbImage) -> Option<Rect> {
    let stats = largest_component(&foreground(image), Connectivity::Eight)?;
    let (x, y, w, h) = stats.bbox;
    Some(Rect::new(x as i32, y as i32, w, h))
}

pub fn crop_black_borders(image: &RgbImage) -> RgbImage {
    match black_border_rect(image) {
        Some(r) => imageops::crop_imm(image, r.x as u32, r.y as u32, r.width, r.height).to_image(),
        None => image.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn crops_to_content() {
        let mut img = RgbImage::new(30, 20);
        for y in 4..15 {
            for x in 6..25 {
                img.put_pixel(x, y, Rgb([90, 120, 30]));
            }
        }
        // A speck smaller than the main region is ignored.
        img.put_pixel(1, 1, Rgb([255, 255, 255]));

        assert_eq!(black_border_rect(&img), Some(Rect::new(6, 4, 19, 11)));
        let cropped = crop_black_borders(&img);
        assert_eq!(cropped.dimensions(), (19, 11));
        assert!(cropped.pixels().all(|p| *p == Rgb([90, 120, 30])));
    }

    #[test]
    fn all_black_is_unchanged() {
        let img = RgbImage::new(8, 8);
        assert_eq!(black_border_rect(&img), None);
        assert_eq!(crop_black_borders(&img), img);
    }
}
