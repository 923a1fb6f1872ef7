//! Feature-based image stitching.
//!
//! Re-exports the workspace crates under short names and provides the
//! process-wide thread pool setup used by the `panostitch` binary.

pub use pano_core as core;
pub use pano_features as features;
pub use pano_imgproc as imgproc;
pub use pano_optimize as optimize;
pub use pano_photo as photo;

pub use pano_core::{Result, StitchError};
pub use pano_photo::{Panorama, StitchMode, Stitcher, StitcherConfig};

use rayon::ThreadPoolBuilder;
use std::env;
use std::sync::OnceLock;

pub const THREADS_ENV: &str = "PANOSTITCH_THREADS";

static THREAD_POOL_INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Initialize the global Rayon thread pool used by every parallel stage.
///
/// Priority:
/// 1. `num_threads` argument
/// 2. `PANOSTITCH_THREADS` environment variable
/// 3. Rayon default
///
/// Only the first call has an effect; later calls return its result.
pub fn init_thread_pool(num_threads: Option<usize>) -> std::result::Result<(), String> {
    THREAD_POOL_INIT
        .get_or_init(|| {
            let configured = match num_threads {
                Some(n) => Some(n),
                None => threads_from_env()?,
            };
            let mut builder = ThreadPoolBuilder::new();
            if let Some(n) = configured {
                if n == 0 {
                    return Err(format!("{THREADS_ENV} must be >= 1"));
                }
                builder = builder.num_threads(n);
            }
            builder.build_global().map_err(|e| e.to_string())
        })
        .clone()
}

fn threads_from_env() -> std::result::Result<Option<usize>, String> {
    match env::var(THREADS_ENV) {
        Ok(raw) => parse_threads(&raw).map(Some),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(format!("failed to read {THREADS_ENV}: {e}")),
    }
}

fn parse_threads(raw: &str) -> std::result::Result<usize, String> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(format!("{THREADS_ENV} must be >= 1")),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("{THREADS_ENV} must be a positive integer, got '{raw}'")),
    }
}
