//! Pixel-level building blocks shared by the feature and composition crates:
//! colour conversion, separable Gaussian filtering, resizing, float
//! pyramids, bilinear sampling, perspective warps and connected components.
//!
//! Every function allocates its output and leaves its inputs untouched.
//! Row-parallel loops run on the global rayon pool.

pub mod color;
pub mod contours;
pub mod convolve;
pub mod geometry;
pub mod pyramid;
pub mod resize;

pub use color::*;
pub use contours::*;
pub use convolve::*;
pub use geometry::*;
pub use pyramid::*;
pub use resize::*;
