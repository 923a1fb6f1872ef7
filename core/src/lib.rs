pub mod config;
pub mod descriptor;
pub mod error;
pub mod geometry;
pub mod keypoint;
pub mod robust;

pub use config::*;
pub use descriptor::*;
pub use error::*;
pub use geometry::*;
pub use keypoint::*;
pub use robust::*;
