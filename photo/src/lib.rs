//! Panorama composition on top of `pano-features`.
//!
//! The pipeline runs in stages, each usable on its own:
//!
//! - [`Stitcher::extract_all`] and [`Stitcher::match_pairs`] turn input
//!   images into [`VerifiedPair`]s.
//! - [`compose`] builds the image graph, aligns the biggest connected
//!   component in the chosen [`StitchMode`], warps every image onto the
//!   canvas and blends them into a [`Panorama`].
//!
//! # Example
//!
//! ```no_run
//! use image::RgbImage;
//! use pano_photo::{StitchMode, Stitcher, StitcherConfig};
//!
//! let images = vec![RgbImage::new(800, 600), RgbImage::new(800, 600)];
//! let stitcher = Stitcher::new(StitcherConfig::default().with_mode(StitchMode::panoramic()));
//! match stitcher.stitch(&images) {
//!     Ok(pano) => println!("{}x{}", pano.width(), pano.height()),
//!     Err(err) => eprintln!("{} failed: {err}", err.stage()),
//! }
//! ```

pub use pano_core::{Result, StitchError};

/// Global alignment per stitch mode
pub mod alignment;
pub mod blend;
/// Rotation-only bundle adjustment
pub mod bundle;
pub mod compose;
pub mod crop;
/// Pair graph and spanning tree
pub mod graph;
pub mod pair;
pub mod panorama;
pub mod stitcher;
/// Plane, spherical and cylindrical warpers
pub mod warp;

pub use alignment::*;
pub use blend::*;
pub use bundle::*;
pub use compose::*;
pub use crop::*;
pub use graph::*;
pub use pair::*;
pub use panorama::*;
pub use stitcher::*;
pub use warp::*;
