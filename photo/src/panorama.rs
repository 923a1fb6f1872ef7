use crate::crop::black_border_rect;
use image::{imageops, GrayImage, RgbImage};
use pano_core::Rect;

/// A composed panorama.
#[derive(Debug, Clone, PartialEq)]
pub struct Panorama {
    pub image: RgbImage,
    /// 255 where at least one input contributed.
    pub mask: GrayImage,
    /// Images that took part in the composition, ascending.
    pub indices: Vec<usize>,
    /// Canvas rectangle in the anchor's frame (surface coordinates in
    /// panoramic mode).
    pub bounds: Rect,
    /// Footprint of each image in `indices` on the canvas, same frame as `bounds`.
    pub rois: Vec<Rect>,
}

impl Panorama {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Fraction of canvas pixels covered by at least one image.
    pub fn coverage(&self) -> f64 {
        let total = self.mask.as_raw().len();
        if total == 0 {
            return 0.0;
        }
        self.mask.as_raw().iter().filter(|&&v| v > 0).count() as f64 / total as f64
    }

    /// Crops image and mask to the largest non-black region; unchanged when
    /// the image is entirely black.
    pub fn crop_black_borders(self) -> Panorama {
        let Some(r) = black_border_rect(&self.image) else {
            return self;
        };
        let (x, y) = (r.x as u32, r.y as u32);
        Panorama {
            image: imageops::crop_imm(&self.image, x, y, r.width, r.height).to_image(),
            mask: imageops::crop_imm(&self.mask, x, y, r.width, r.height).to_image(),
            indices: self.indices,
            bounds: Rect::new(self.bounds.x + r.x, self.bounds.y + r.y, r.width, r.height),
            rois: self.rois,
        }
    }
}
