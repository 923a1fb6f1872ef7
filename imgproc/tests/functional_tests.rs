use image::{GrayImage, Luma, Rgb, RgbImage};
use nalgebra::Matrix3;
use pano_imgproc::*;

#[test]
fn test_resize_functional() {
    let mut img = GrayImage::new(100, 100);
    img.put_pixel(50, 50, Luma([255]));

    let up = resize(&img, 200, 200);
    assert_eq!(up.dimensions(), (200, 200));

    let down = resize(&img, 50, 50);
    assert_eq!(down.dimensions(), (50, 50));
    assert!(down.pixels().any(|p| p.0[0] > 0));
}

#[test]
fn test_blur_preserves_mean_of_flat_regions() {
    let img = GrayImage::from_pixel(64, 48, Luma([77]));
    let blurred = gaussian_blur(&img, 2.0);
    assert!(blurred.pixels().all(|p| p.0[0] == 77));
}

#[test]
fn test_gray_conversion_feeds_pyramid() {
    let rgb = RgbImage::from_fn(40, 30, |x, y| Rgb([(x * 6) as u8, (y * 8) as u8, 128]));
    let gray = convert_rgb_to_gray(&rgb);
    let pyramid = gaussian_pyramid(&Plane::from_gray(&gray), 3);
    let sizes: Vec<_> = pyramid.iter().map(|p| (p.width, p.height)).collect();
    assert_eq!(sizes, vec![(40, 30), (20, 15), (10, 8), (5, 4)]);

    let bands = laplacian_pyramid(&Plane::from_gray(&gray), 3);
    assert_eq!(collapse_laplacian(&bands).to_gray(), gray);
}

#[test]
fn test_geometry_warp_identity() {
    let img = GrayImage::from_fn(10, 10, |x, y| Luma([(x * 10 + y) as u8]));
    let identity = Matrix3::identity();
    let warped = warp_perspective(&img, &identity, 10, 10);
    assert_eq!(warped, img);
}

#[test]
fn test_rgb_warp_translation() {
    let img = RgbImage::from_fn(20, 10, |x, _| Rgb([x as u8 * 10, 0, 255]));
    let shift = Matrix3::new(1.0, 0.0, 5.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
    let warped = warp_perspective_rgb(&img, &shift, 30, 10);
    assert_eq!(warped.get_pixel(5, 3), img.get_pixel(0, 3));
    assert_eq!(warped.get_pixel(24, 3), img.get_pixel(19, 3));
    assert_eq!(warped.get_pixel(2, 3), &Rgb([0, 0, 0]));
    assert_eq!(warped.get_pixel(29, 3), &Rgb([0, 0, 0]));
}

#[test]
fn test_largest_component_of_thresholded_image() {
    let mut img = GrayImage::new(30, 20);
    for y in 2..18 {
        for x in 3..12 {
            img.put_pixel(x, y, Luma([200]));
        }
    }
    for y in 5..8 {
        for x in 20..24 {
            img.put_pixel(x, y, Luma([200]));
        }
    }
    let best = largest_component(&img, Connectivity::Eight).unwrap();
    assert_eq!(best.area, 9 * 16);
    assert_eq!(best.bbox, (3, 2, 9, 16));
}
