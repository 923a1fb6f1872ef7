use image::{imageops, Rgb, RgbImage};
use nalgebra::{Matrix3, Point2, Vector3};
use pano_core::{project_point, rotation_from_vector, CameraParams, StitchError};
use pano_imgproc::warp_perspective_rgb;
use pano_photo::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random coloured rectangles on a gray background.
fn rectangle_scene(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = RgbImage::from_pixel(width, height, Rgb([110, 120, 130]));
    let count = (width * height) / 2300;
    for _ in 0..count {
        let w = rng.gen_range(10..60);
        let h = rng.gen_range(10..60);
        let x0 = rng.gen_range(0..width);
        let y0 = rng.gen_range(0..height);
        let color = Rgb([rng.gen(), rng.gen(), rng.gen()]);
        for y in y0..(y0 + h).min(height) {
            for x in x0..(x0 + w).min(width) {
                img.put_pixel(x, y, color);
            }
        }
    }
    img
}

fn overlapping_scans() -> Vec<RgbImage> {
    // 800x600 views with 30% horizontal overlap.
    let scene = rectangle_scene(1360, 600, 11);
    vec![
        imageops::crop_imm(&scene, 0, 0, 800, 600).to_image(),
        imageops::crop_imm(&scene, 560, 0, 800, 600).to_image(),
    ]
}

#[test]
fn test_planar_scans_stitch_to_scene_extent() {
    let images = overlapping_scans();
    let stitcher = Stitcher::new(StitcherConfig::default());

    let features = stitcher.extract_all(&images).unwrap();
    let pairs = stitcher.match_pairs(&features).unwrap();
    assert_eq!(pairs.len(), 1);
    assert!(pairs[0].num_inliers() >= 40, "{} inliers", pairs[0].num_inliers());
    let h = pairs[0].homography();
    assert!((h[(0, 2)] + 560.0).abs() < 3.0, "x shift {}", h[(0, 2)]);
    assert!(h[(1, 2)].abs() < 3.0, "y shift {}", h[(1, 2)]);

    let pano = stitcher.compose(&images, &pairs).unwrap();
    assert_eq!(pano.indices, vec![0, 1]);
    assert!(pano.width() > 1300 && pano.width() < 1420, "width {}", pano.width());
    assert!(pano.height().abs_diff(600) <= 60, "height {}", pano.height());
    assert!(pano.coverage() > 0.9);
}

#[test]
fn test_perspective_scan_is_recovered() {
    let scene = rectangle_scene(1100, 600, 13);
    let left = imageops::crop_imm(&scene, 0, 0, 800, 600).to_image();
    let right = imageops::crop_imm(&scene, 300, 0, 800, 600).to_image();
    // Mild keystone, as from a slightly tilted scanner lid.
    let keystone = Matrix3::new(1.0, 0.03, 4.0, -0.02, 1.0, 6.0, 2e-5, 1e-5, 1.0);
    let right = warp_perspective_rgb(&right, &keystone, 800, 600);

    let stitcher = Stitcher::default();
    let features = stitcher.extract_all(&[left.clone(), right.clone()]).unwrap();
    let pairs = stitcher.match_pairs(&features).unwrap();
    let h = pairs[0].homography();
    // Scene point (500, 300) is left pixel (500, 300) and right pixel keystone(200, 300).
    let expected = project_point(&keystone, &Point2::new(200.0, 300.0)).unwrap();
    let mapped = project_point(h, &Point2::new(500.0, 300.0)).unwrap();
    assert!((mapped - expected).norm() < 3.0, "{mapped} vs {expected}");

    let pano = stitcher.compose(&[left, right], &pairs).unwrap();
    assert!(pano.width() > 1000 && pano.width() < 1250, "width {}", pano.width());
}

#[test]
fn test_stitching_is_reproducible() {
    let images = overlapping_scans();
    let stitcher = Stitcher::new(StitcherConfig::default().with_max_features(1500));
    let first = stitcher.stitch(&images).unwrap();
    let second = stitcher.stitch(&images).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_crop_never_grows_the_panorama() {
    let images = overlapping_scans();
    let plain = Stitcher::new(StitcherConfig::default().with_max_features(1500))
        .stitch(&images)
        .unwrap();
    let cropped = Stitcher::new(StitcherConfig::default().with_max_features(1500).with_crop(true))
        .stitch(&images)
        .unwrap();
    assert!(cropped.width() <= plain.width());
    assert!(cropped.height() <= plain.height());
    assert_eq!(cropped.image.dimensions(), cropped.mask.dimensions());
}

#[test]
fn test_disjoint_scenes_fail() {
    let images = vec![rectangle_scene(640, 480, 21), rectangle_scene(640, 480, 22)];
    let err = Stitcher::default().stitch(&images).unwrap_err();
    assert!(
        matches!(
            err,
            StitchError::HomographyEstimationFailed(_) | StitchError::InsufficientMatches { .. }
        ),
        "unexpected error {err:?}"
    );
}

#[test]
fn test_textureless_image_has_too_few_features() {
    let images = vec![rectangle_scene(640, 480, 5), RgbImage::from_pixel(640, 480, Rgb([90, 90, 90]))];
    let err = Stitcher::default().stitch(&images).unwrap_err();
    assert_eq!(
        err,
        StitchError::InsufficientFeatures {
            image: 1,
            found: 0,
            required: 50
        }
    );
    assert_eq!(err.status_code(), 1);
}

/// Renders a pinhole view of an environment texture laid out in yaw/pitch
/// angles at `texels_per_radian`, centred on the texture.
fn render_view(texture: &RgbImage, texels_per_radian: f64, camera: &CameraParams, width: u32, height: u32) -> RgbImage {
    let (tw, th) = (texture.width() as f64, texture.height() as f64);
    RgbImage::from_fn(width, height, |x, y| {
        let ray = camera.pixel_to_ray(&Point2::new(x as f64, y as f64));
        let theta = ray.x.atan2(ray.z);
        let phi = ray.y.atan2(ray.x.hypot(ray.z));
        let u = (theta * texels_per_radian + tw / 2.0).round();
        let v = (phi * texels_per_radian + th / 2.0).round();
        if u < 0.0 || v < 0.0 || u >= tw || v >= th {
            Rgb([0, 0, 0])
        } else {
            *texture.get_pixel(u as u32, v as u32)
        }
    })
}

#[test]
fn test_rotating_camera_panorama() {
    let texture = rectangle_scene(2000, 600, 31);
    let views: Vec<RgbImage> = [-0.45, 0.0, 0.45]
        .iter()
        .map(|&yaw| {
            let camera = CameraParams::centered(350.0, 400, 300)
                .with_rotation(rotation_from_vector(&Vector3::new(0.0, yaw, 0.0)));
            render_view(&texture, 400.0, &camera, 400, 300)
        })
        .collect();

    let config = StitcherConfig::default().with_mode(StitchMode::panoramic());
    let pano = Stitcher::new(config).stitch(&views).unwrap();
    assert_eq!(pano.indices, vec![0, 1, 2]);
    assert_eq!(pano.rois.len(), 3);
    assert!(pano.width() > pano.height(), "{}x{}", pano.width(), pano.height());
    assert!(pano.width() > 400);
    assert!(pano.coverage() > 0.5);
}
