//! Dense Levenberg-Marquardt for small nonlinear least-squares problems.
//!
//! A problem exposes its residual vector as a function of a parameter
//! vector; the Jacobian defaults to forward differences evaluated column by
//! column in parallel. Each iteration solves the damped normal equations
//! `(J^T J + lambda diag(J^T J)) delta = -J^T r` by Cholesky, falling back
//! to LU, and adapts `lambda` by a factor of 10.

pub mod lm;

pub use lm::*;
