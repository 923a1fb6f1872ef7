//! Robust Estimation Module
//!
//! A generic, seeded RANSAC engine usable for any model estimation task.
//! Sampling draws from a `StdRng` seeded by the configuration, so a run is a
//! pure function of its inputs.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Configuration for robust estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    /// Maximum residual (pixels) for a datum to count as an inlier.
    pub reprojection_threshold: f64,
    pub max_iterations: usize,
    /// Probability of drawing at least one all-inlier sample; drives the adaptive stop.
    pub confidence: f64,
    /// Minimum support for a model to be accepted by callers.
    pub min_inliers: usize,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            reprojection_threshold: 3.0,
            max_iterations: 2000,
            confidence: 0.995,
            min_inliers: 8,
            seed: 0x5eed,
        }
    }
}

impl RansacConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.reprojection_threshold = threshold;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Result of robust estimation
#[derive(Debug, Clone, PartialEq)]
pub struct RobustResult<M> {
    pub model: Option<M>,
    /// Inlier mask parallel to the input data.
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
    /// RMS residual over the inliers.
    pub residual: f64,
    pub iterations: usize,
}

impl<M> RobustResult<M> {
    fn empty(n: usize) -> Self {
        Self {
            model: None,
            inliers: vec![false; n],
            num_inliers: 0,
            residual: f64::INFINITY,
            iterations: 0,
        }
    }
}

/// Trait for models that can be estimated robustly
pub trait RobustModel<D> {
    type Model: Clone;

    /// Minimum number of data points required to estimate the model
    fn min_sample_size(&self) -> usize;

    /// Estimate model from a minimal sample
    fn estimate(&self, data: &[&D]) -> Option<Self::Model>;

    /// Compute error for a single data point against the model
    fn compute_error(&self, model: &Self::Model, data: &D) -> f64;

    /// Reject samples that cannot produce a well-posed model.
    fn is_degenerate(&self, _sample: &[&D]) -> bool {
        false
    }

    /// Re-estimate from the full inlier set. Defaults to the minimal solver.
    fn refine(&self, inliers: &[&D]) -> Option<Self::Model> {
        self.estimate(inliers)
    }
}

/// Generic RANSAC engine
pub struct Ransac<D, M: RobustModel<D>> {
    config: RansacConfig,
    _phantom: PhantomData<(D, M)>,
}

impl<D, M: RobustModel<D>> Ransac<D, M> {
    pub fn new(config: RansacConfig) -> Self {
        Self {
            config,
            _phantom: PhantomData,
        }
    }

    pub fn run(&self, estimator: &M, data: &[D]) -> RobustResult<M::Model> {
        let n = data.len();
        let k = estimator.min_sample_size();

        if n < k || k == 0 {
            return RobustResult::empty(n);
        }

        let mut best = RobustResult::empty(n);
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut max_iterations = self.config.max_iterations;
        let mut iteration = 0;

        while iteration < max_iterations {
            iteration += 1;

            let sample: Vec<&D> = index::sample(&mut rng, n, k)
                .into_iter()
                .map(|i| &data[i])
                .collect();
            if estimator.is_degenerate(&sample) {
                continue;
            }
            let Some(model) = estimator.estimate(&sample) else {
                continue;
            };

            let (inliers, num_inliers, residual) = self.score(estimator, &model, data);
            let better = num_inliers > best.num_inliers
                || (num_inliers == best.num_inliers && num_inliers > 0 && residual < best.residual);
            if better {
                best = RobustResult {
                    model: Some(model),
                    inliers,
                    num_inliers,
                    residual,
                    iterations: 0,
                };
                let ratio = num_inliers as f64 / n as f64;
                max_iterations = required_iterations(self.config.confidence, ratio, k)
                    .min(self.config.max_iterations);
            }
        }
        best.iterations = iteration;

        if best.num_inliers >= k {
            let inlier_data: Vec<&D> = data
                .iter()
                .zip(&best.inliers)
                .filter(|(_, &is_inlier)| is_inlier)
                .map(|(d, _)| d)
                .collect();
            if let Some(refined) = estimator.refine(&inlier_data) {
                let (inliers, num_inliers, residual) = self.score(estimator, &refined, data);
                if num_inliers >= best.num_inliers {
                    best.model = Some(refined);
                    best.inliers = inliers;
                    best.num_inliers = num_inliers;
                    best.residual = residual;
                }
            }
        }

        best
    }

    fn score(&self, estimator: &M, model: &M::Model, data: &[D]) -> (Vec<bool>, usize, f64) {
        let mut inliers = vec![false; data.len()];
        let mut num_inliers = 0;
        let mut sq_sum = 0.0;

        for (j, d) in data.iter().enumerate() {
            let err = estimator.compute_error(model, d);
            if err < self.config.reprojection_threshold {
                inliers[j] = true;
                num_inliers += 1;
                sq_sum += err * err;
            }
        }

        let rms = if num_inliers > 0 {
            (sq_sum / num_inliers as f64).sqrt()
        } else {
            f64::INFINITY
        };
        (inliers, num_inliers, rms)
    }
}

/// Number of iterations needed to draw an all-inlier sample of size `k` with
/// the given confidence when a fraction `inlier_ratio` of the data are inliers.
pub fn required_iterations(confidence: f64, inlier_ratio: f64, k: usize) -> usize {
    if inlier_ratio <= 0.0 {
        return usize::MAX;
    }
    let p_good = inlier_ratio.min(1.0).powi(k as i32);
    let denom = (1.0 - p_good).ln();
    if denom == f64::NEG_INFINITY {
        return 1;
    }
    if denom >= 0.0 {
        return usize::MAX;
    }
    let numer = (1.0 - confidence.clamp(0.0, 1.0 - f64::EPSILON)).ln();
    let iterations = (numer / denom).ceil();
    if iterations.is_finite() {
        (iterations as usize).max(1)
    } else {
        usize::MAX
    }
}
