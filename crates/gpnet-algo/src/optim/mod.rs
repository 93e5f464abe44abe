//! # Optimal Control
//!
//! Formulates the multi-step control problem of an [`OptimizableProblem`] as a
//! nonlinear program and solves it with an NLP backend.
//!
//! ## Formulations
//!
//! | Formulation | Decision vector | Equality constraints |
//! |-------------|-----------------|----------------------|
//! | [`ReducedOptimizer`] | controls `U` | none, states come from Newton solves |
//! | [`ImplicitOptimizer`] | `[U; X_1 … X_N]` | `E_i(x_{i-1}, x_i, u(t_i)) = 0` |
//!
//! Both minimize `Σ_{i≥1} w_i c(t_i, x_i, u(t_i))` with trapezoidal weights
//! `w_i` and keep the declared constraints `g(τ_k, x_k, u(τ_k))` within their
//! bounds at every constraint time `τ_k`.
//!
//! ## Backends
//!
//! Formulations implement the solver-agnostic [`Optimizer`] callback surface:
//!
//! - [`PenaltyLbfgsSolver`]: quadratic penalty method with argmin's L-BFGS,
//!   always available.
//! - `IpoptAdaptor`: interior point through IPOPT (feature `solver-ipopt`),
//!   limited-memory Hessian.
//!
//! A backend reports infeasibility or a failed restoration as
//! [`NumericalProblem`](gpnet_core::NumericalProblem) and never retries.
//!
//! [`OptimizableProblem`]: crate::problem::OptimizableProblem

#[cfg(test)]
pub(crate) mod fixtures;
pub mod grid;
pub mod implicit;
pub mod initial;
#[cfg(feature = "solver-ipopt")]
pub mod interior_point;
pub mod penalty;
pub mod reduced;

pub use grid::{index_lambda, trapezoid_weights, TimeGrids};
pub use implicit::ImplicitOptimizer;
pub use initial::{InitialValues, UNBOUNDED};
#[cfg(feature = "solver-ipopt")]
pub use interior_point::{solve_with_ipopt, IpoptAdaptor, IpoptConfig, IpoptSolver};
pub use penalty::{PenaltyConfig, PenaltyLbfgsSolver};
pub use reduced::ReducedOptimizer;

use crate::linear::LinearSolveError;
use gpnet_core::{GpnetError, GpnetResult, InterpolatingVector, NumericalProblem, NumericalProblemKind};
use serde::{Deserialize, Serialize};

/// NLP callback surface shared by all formulations.
///
/// Evaluations take `&mut self` because formulations memoize states and
/// derivatives between calls at the same point.
pub trait Optimizer {
    fn variable_count(&self) -> usize;
    fn constraint_count(&self) -> usize;
    /// Entries of the constraint Jacobian pattern.
    fn jacobian_nnz(&self) -> usize;

    fn initial_point(&self, x: &mut [f64]) -> GpnetResult<()>;
    fn variable_bounds(&self, lower: &mut [f64], upper: &mut [f64]) -> GpnetResult<()>;
    fn constraint_bounds(&self, lower: &mut [f64], upper: &mut [f64]) -> GpnetResult<()>;

    /// The solver moved to a new point; memoized results may be dropped.
    fn new_x(&mut self);
    fn objective(&mut self, x: &[f64]) -> GpnetResult<f64>;
    fn objective_gradient(&mut self, x: &[f64], gradient: &mut [f64]) -> GpnetResult<()>;
    fn constraints(&mut self, x: &[f64], values: &mut [f64]) -> GpnetResult<()>;
    /// Row and column of every Jacobian entry; fixed for the optimizer's lifetime.
    fn jacobian_indices(&self, rows: &mut [usize], cols: &mut [usize]) -> GpnetResult<()>;
    fn jacobian_values(&mut self, x: &[f64], values: &mut [f64]) -> GpnetResult<()>;

    /// States on the state grid at decision vector `x`.
    fn state_trajectory(&mut self, x: &[f64]) -> GpnetResult<InterpolatingVector>;
    /// Controls on the control grid at decision vector `x`.
    fn control_trajectory(&self, x: &[f64]) -> GpnetResult<InterpolatingVector>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NlpStatus {
    Optimal,
    /// Within a relaxed tolerance.
    Acceptable,
    /// Iteration budget used up before convergence; the point is the last iterate.
    IterationLimit,
}

/// Result of an NLP solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NlpSolution {
    pub status: NlpStatus,
    pub objective: f64,
    pub decision: Vec<f64>,
    pub constraints: Vec<f64>,
    /// L-BFGS iterations for the penalty backend; objective gradient
    /// evaluations for IPOPT.
    pub iterations: usize,
}

/// Largest distance of `values` to the box `[lower, upper]`.
pub fn bound_violation(values: &[f64], lower: &[f64], upper: &[f64]) -> f64 {
    values
        .iter()
        .zip(lower.iter().zip(upper))
        .map(|(v, (l, u))| (l - v).max(v - u).max(0.0))
        .fold(0.0, f64::max)
}

fn check_length(what: &str, got: usize, expected: usize) -> GpnetResult<()> {
    if got != expected {
        return Err(GpnetError::Validation(format!(
            "{what} has length {got}, expected {expected}"
        )));
    }
    Ok(())
}

fn adjoint_failure(error: LinearSolveError, step: usize) -> GpnetError {
    let magnitude = match &error {
        LinearSolveError::Singular(relative) => *relative,
        _ => f64::NAN,
    };
    tracing::debug!(%error, step, "adjoint solve failed");
    NumericalProblem::new(NumericalProblemKind::SingularJacobian, 0, magnitude)
        .with_step(step)
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_is_distance_to_box() {
        let v = bound_violation(&[0.5, 3.0, -2.0], &[0.0, 0.0, -1.0], &[1.0, 2.5, 1.0]);
        assert!((v - 1.0).abs() < 1e-15);
        assert_eq!(bound_violation(&[0.5], &[0.0], &[1.0]), 0.0);
    }
}
