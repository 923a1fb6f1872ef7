//! ORB (Oriented FAST and Rotated BRIEF) implementation
//!
//! FAST-9 corners are detected on every level of a scale pyramid, ranked by
//! Harris response, oriented by the intensity centroid of their patch and
//! described by a steered BRIEF test pattern evaluated on a smoothed copy of
//! the level. The test pattern is drawn once from a fixed-seed generator, so
//! extraction is a pure function of the image and the configuration.

use crate::fast::fast_detect;
use crate::harris::harris_response;
use image::GrayImage;
use pano_core::{Descriptor, Descriptors, FeatureConfig, ImageFeatures, KeyPoint, KeyPoints};
use pano_imgproc::{gaussian_blur, resize};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Number of binary tests per descriptor (256 bits = 32 bytes).
pub const DESCRIPTOR_BITS: usize = 256;
const PATTERN_SEED: u64 = 0x0_b12f;
const HARRIS_BLOCK: i32 = 7;
const HARRIS_K: f64 = 0.04;
const DESCRIPTOR_SIGMA: f32 = 2.0;

type PointPair = ((f32, f32), (f32, f32));

/// ORB feature detector and descriptor
#[derive(Debug, Clone)]
pub struct Orb {
    config: FeatureConfig,
    pattern: Vec<PointPair>,
}

/// One pyramid level: the resized image and its scale relative to level 0.
struct Level {
    image: GrayImage,
    scale_x: f64,
    scale_y: f64,
    scale: f64,
}

impl Default for Orb {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

impl Orb {
    pub fn new(config: FeatureConfig) -> Self {
        let pattern = generate_brief_pattern(config.patch_size);
        Self { config, pattern }
    }

    pub fn with_max_features(mut self, n: usize) -> Self {
        self.config.max_features = n;
        self
    }

    pub fn with_n_levels(mut self, n: usize) -> Self {
        self.config.n_levels = n;
        self
    }

    pub fn with_fast_threshold(mut self, threshold: u8) -> Self {
        self.config.fast_threshold = threshold;
        self
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    fn half_patch(&self) -> i32 {
        (self.config.patch_size / 2) as i32
    }

    /// Keypoint budget of each pyramid level; sums to `max_features`.
    pub fn level_budgets(&self) -> Vec<usize> {
        let levels = self.config.n_levels.max(1);
        let n = self.config.max_features;
        let inv = 1.0 / self.config.scale_factor.max(1.0001) as f64;
        let first = n as f64 * (1.0 - inv) / (1.0 - inv.powi(levels as i32));

        let mut budgets = Vec::with_capacity(levels);
        let mut assigned = 0usize;
        let mut desired = first;
        for _ in 0..levels - 1 {
            let b = (desired.round() as usize).min(n - assigned);
            budgets.push(b);
            assigned += b;
            desired *= inv;
        }
        budgets.push(n - assigned);
        budgets
    }

    fn build_pyramid(&self, image: &GrayImage) -> Vec<Level> {
        let (w, h) = image.dimensions();
        let min_side = 2 * (self.half_patch() as u32 + 1) + 1;
        let mut levels = Vec::with_capacity(self.config.n_levels);
        let mut scale = 1.0f64;

        for l in 0..self.config.n_levels.max(1) {
            let lw = (w as f64 / scale).round() as u32;
            let lh = (h as f64 / scale).round() as u32;
            if lw < min_side || lh < min_side {
                break;
            }
            let level_image = if l == 0 {
                image.clone()
            } else {
                resize(image, lw, lh)
            };
            levels.push(Level {
                image: level_image,
                scale_x: w as f64 / lw as f64,
                scale_y: h as f64 / lh as f64,
                scale,
            });
            scale *= self.config.scale_factor as f64;
        }
        levels
    }

    /// Detect, orient and describe. Keypoints and descriptors are parallel,
    /// ordered by pyramid level and then by decreasing Harris response.
    pub fn detect_and_compute(&self, image: &GrayImage) -> (KeyPoints, Descriptors) {
        let budgets = self.level_budgets();
        let pyramid = self.build_pyramid(image);
        // The Harris window and its Sobel taps reach further than a small patch.
        let border = (self.half_patch() + 1).max(HARRIS_BLOCK / 2 + 2) as u32;

        let mut keypoints = KeyPoints::new();
        let mut descriptors = Descriptors::new();

        for (level_idx, level) in pyramid.iter().enumerate() {
            let budget = budgets.get(level_idx).copied().unwrap_or(0);
            if budget == 0 {
                continue;
            }

            let mut candidates = fast_detect(&level.image, self.config.fast_threshold, border);
            // Stable sorts keep raster order among equal scores.
            candidates.sort_by(|a, b| b.response.total_cmp(&a.response));
            candidates.truncate(budget * 2);
            for kp in &mut candidates {
                kp.response = harris_response(&level.image, kp.x as i32, kp.y as i32, HARRIS_BLOCK, HARRIS_K);
            }
            candidates.sort_by(|a, b| b.response.total_cmp(&a.response));
            candidates.truncate(budget);

            let smoothed = gaussian_blur(&level.image, DESCRIPTOR_SIGMA);
            for kp in &candidates {
                let (x, y) = (kp.x as i32, kp.y as i32);
                let angle = intensity_centroid_angle(&level.image, x, y, self.half_patch());
                let desc = self.describe(&smoothed, x, y, angle);

                keypoints.push(
                    KeyPoint::new(
                        (kp.x + 0.5) * level.scale_x - 0.5,
                        (kp.y + 0.5) * level.scale_y - 0.5,
                    )
                    .with_size(self.config.patch_size as f64 * level.scale)
                    .with_angle(angle)
                    .with_response(kp.response)
                    .with_octave(level_idx as i32),
                );
                descriptors.push(desc);
            }
            debug!(level = level_idx, kept = candidates.len(), budget, "orb level");
        }

        (keypoints, descriptors)
    }

    /// Steered BRIEF: rotate every test pair by the keypoint angle and
    /// compare the smoothed intensities. Bit `i` lives in byte `i / 8`, LSB first.
    fn describe(&self, smoothed: &GrayImage, x: i32, y: i32, angle_deg: f64) -> Descriptor {
        let (sin_a, cos_a) = (angle_deg.to_radians() as f32).sin_cos();
        let width = smoothed.width() as i32;
        let raw = smoothed.as_raw();
        let at = |dx: f32, dy: f32| {
            let rx = (cos_a * dx - sin_a * dy).round() as i32;
            let ry = (sin_a * dx + cos_a * dy).round() as i32;
            raw[((y + ry) * width + (x + rx)) as usize]
        };

        let mut data = vec![0u8; DESCRIPTOR_BITS / 8];
        for (i, &((x1, y1), (x2, y2))) in self.pattern.iter().enumerate() {
            if at(x1, y1) < at(x2, y2) {
                data[i / 8] |= 1 << (i % 8);
            }
        }
        Descriptor::new(data)
    }
}

/// Orientation in degrees `[0, 360)` of the vector from `(x, y)` to the
/// intensity centroid of the disk of radius `radius` around it.
pub fn intensity_centroid_angle(image: &GrayImage, x: i32, y: i32, radius: i32) -> f64 {
    let width = image.width() as i32;
    let raw = image.as_raw();
    let r2 = radius * radius;

    let mut m01 = 0i64;
    let mut m10 = 0i64;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let v = raw[((y + dy) * width + (x + dx)) as usize] as i64;
            m10 += v * dx as i64;
            m01 += v * dy as i64;
        }
    }

    let angle = (m01 as f64).atan2(m10 as f64).to_degrees();
    if angle < 0.0 {
        angle + 360.0
    } else {
        angle
    }
}

/// `DESCRIPTOR_BITS` point pairs drawn uniformly from the disk of radius
/// `patch_size / 2`. Rotations keep the points inside the same disk.
fn generate_brief_pattern(patch_size: u32) -> Vec<PointPair> {
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    let radius = (patch_size / 2) as f32;
    let mut point = || loop {
        let x = rng.gen_range(-radius..=radius);
        let y = rng.gen_range(-radius..=radius);
        if x * x + y * y <= radius * radius {
            return (x, y);
        }
    };

    (0..DESCRIPTOR_BITS).map(|_| (point(), point())).collect()
}

/// Run ORB with `config` and package the result.
pub fn extract(image: &GrayImage, config: &FeatureConfig) -> ImageFeatures {
    let (keypoints, descriptors) = Orb::new(config.clone()).detect_and_compute(image);
    ImageFeatures {
        image_idx: 0,
        width: image.width(),
        height: image.height(),
        keypoints,
        descriptors,
    }
}
