use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LMConfig {
    pub max_iters: usize,
    /// Initial damping factor.
    pub lambda: f64,
    /// Stop once the gradient or the relative step falls below this.
    pub tolerance: f64,
    /// Forward-difference step of the numerical Jacobian.
    pub jacobian_step: f64,
}

impl Default for LMConfig {
    fn default() -> Self {
        Self {
            max_iters: 50,
            lambda: 0.001,
            tolerance: 1e-6,
            jacobian_step: 1e-6,
        }
    }
}

impl LMConfig {
    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }
}

/// A residual function `r(p)` whose squared norm is to be minimised.
pub trait LeastSquaresProblem: Sync {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;

    fn jacobian(&self, params: &DVector<f64>, step: f64) -> DMatrix<f64> {
        numerical_jacobian(self, params, step)
    }
}

/// Forward-difference Jacobian, one parallel task per parameter.
pub fn numerical_jacobian<P: LeastSquaresProblem + ?Sized>(
    problem: &P,
    params: &DVector<f64>,
    step: f64,
) -> DMatrix<f64> {
    let base = problem.residuals(params);
    let columns: Vec<DVector<f64>> = (0..params.len())
        .into_par_iter()
        .map(|k| {
            let h = step * params[k].abs().max(1.0);
            let mut perturbed = params.clone();
            perturbed[k] += h;
            (problem.residuals(&perturbed) - &base) / h
        })
        .collect();

    let mut j = DMatrix::zeros(base.len(), params.len());
    for (k, col) in columns.iter().enumerate() {
        j.set_column(k, col);
    }
    j
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Gradient or step below tolerance.
    Converged,
    MaxIterations,
    /// Damping grew without finding a descent step.
    Stalled,
}

#[derive(Debug, Clone)]
pub struct LMReport {
    pub params: DVector<f64>,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub iterations: usize,
    pub termination: Termination,
}

impl LMReport {
    pub fn is_finite(&self) -> bool {
        self.final_cost.is_finite() && self.params.iter().all(|v| v.is_finite())
    }
}

fn cost(r: &DVector<f64>) -> f64 {
    let c = r.norm_squared();
    if c.is_finite() {
        c
    } else {
        f64::INFINITY
    }
}

pub fn levenberg_marquardt<P: LeastSquaresProblem + ?Sized>(
    problem: &P,
    initial: DVector<f64>,
    config: &LMConfig,
) -> LMReport {
    let mut current_params = initial;
    let mut current_residuals = problem.residuals(&current_params);
    let mut current_err = cost(&current_residuals);
    let initial_cost = current_err;
    let mut lambda = config.lambda;
    let mut termination = Termination::MaxIterations;
    let mut iterations = 0;

    if current_params.is_empty() || current_residuals.is_empty() {
        return LMReport {
            params: current_params,
            initial_cost,
            final_cost: current_err,
            iterations,
            termination: Termination::Converged,
        };
    }

    while iterations < config.max_iters {
        iterations += 1;
        let j = problem.jacobian(&current_params, config.jacobian_step);
        let jtj = j.transpose() * &j;
        let jtr = j.transpose() * &current_residuals;
        if jtr.amax() < config.tolerance {
            termination = Termination::Converged;
            break;
        }
        let neg_jtr = -&jtr;

        let mut lhs = jtj.clone();
        for i in 0..lhs.nrows() {
            lhs[(i, i)] += lambda * jtj[(i, i)].max(1e-9);
        }

        let delta = match lhs.clone().cholesky() {
            Some(ch) => ch.solve(&neg_jtr),
            None => match lhs.lu().solve(&neg_jtr) {
                Some(d) => d,
                None => {
                    lambda *= 10.0;
                    continue;
                }
            },
        };

        let next_params = &current_params + &delta;
        let next_residuals = problem.residuals(&next_params);
        let next_err = cost(&next_residuals);
        trace!(iteration = iterations, lambda, cost = current_err, next_cost = next_err, "lm step");

        if next_err < current_err {
            let small_step = delta.norm() < config.tolerance * (current_params.norm() + config.tolerance);
            current_params = next_params;
            current_residuals = next_residuals;
            current_err = next_err;
            lambda = (lambda / 10.0).max(1e-12);

            if small_step {
                termination = Termination::Converged;
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                termination = Termination::Stalled;
                break;
            }
        }
    }

    LMReport {
        params: current_params,
        initial_cost,
        final_cost: current_err,
        iterations,
        termination,
    }
}
