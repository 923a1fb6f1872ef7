//! Feature extraction, descriptor matching and geometric verification.
//!
//! The three stages are independent pure functions:
//! [`extract`] turns a grayscale image into ORB keypoints and descriptors,
//! [`match_descriptors`] pairs descriptors of two images by Hamming distance,
//! and [`verify`] fits a homography to the matches with seeded RANSAC.

pub mod fast;
pub mod harris;
pub mod homography;
pub mod matcher;
pub mod orb;

pub use fast::*;
pub use harris::*;
pub use homography::*;
pub use matcher::*;
pub use orb::*;

pub use pano_core::{Result, StitchError};
