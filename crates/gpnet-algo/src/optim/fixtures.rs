//! Small controlled problem shared by the optimizer unit tests.

use crate::model::{PointContext, StepContext};
use crate::problem::OptimizableProblem;
use crate::sparse::MatrixHandler;
use gpnet_core::{GpnetResult, InterpolatingMut, InterpolatingVector};

/// Tank level `x` with inflow `u` and quadratic drain, implicit Euler:
/// `x_new - x_last - dt (u - 0.1 x_new²) = 0`.
///
/// Cost `x² + u²/2`, one constraint `g = x + u`.
pub(crate) struct Tank;

impl OptimizableProblem for Tank {
    fn number_of_equations(&self) -> usize {
        1
    }
    fn number_of_states(&self) -> usize {
        1
    }
    fn number_of_controls_per_step(&self) -> usize {
        1
    }
    fn number_of_constraints_per_step(&self) -> usize {
        1
    }

    fn evaluate(&self, residual: &mut [f64], ctx: &StepContext<'_>) -> GpnetResult<()> {
        let x = ctx.new_state[0];
        residual[0] = x - ctx.last_state[0] - ctx.delta_t() * (ctx.control[0] - 0.1 * x * x);
        Ok(())
    }
    fn d_evaluate_d_new_state(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        handler.set_coefficient(0, 0, 1.0 + ctx.delta_t() * 0.2 * ctx.new_state[0]);
        Ok(())
    }
    fn d_evaluate_d_last_state(
        &self,
        handler: &mut dyn MatrixHandler,
        _ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        handler.set_coefficient(0, 0, -1.0);
        Ok(())
    }
    fn d_evaluate_d_control(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        handler.set_coefficient(0, 0, -ctx.delta_t());
        Ok(())
    }

    fn evaluate_cost(&self, ctx: &PointContext<'_>) -> f64 {
        ctx.state[0] * ctx.state[0] + 0.5 * ctx.control[0] * ctx.control[0]
    }
    fn d_cost_d_state(&self, gradient: &mut [f64], ctx: &PointContext<'_>) {
        gradient[0] += 2.0 * ctx.state[0];
    }
    fn d_cost_d_control(&self, gradient: &mut [f64], ctx: &PointContext<'_>) {
        gradient[0] += ctx.control[0];
    }

    fn evaluate_constraint(&self, out: &mut [f64], ctx: &PointContext<'_>) -> GpnetResult<()> {
        out[0] = ctx.state[0] + ctx.control[0];
        Ok(())
    }
    fn d_constraint_d_state(
        &self,
        handler: &mut dyn MatrixHandler,
        _ctx: &PointContext<'_>,
    ) -> GpnetResult<()> {
        handler.set_coefficient(0, 0, 1.0);
        Ok(())
    }
    fn d_constraint_d_control(
        &self,
        handler: &mut dyn MatrixHandler,
        _ctx: &PointContext<'_>,
    ) -> GpnetResult<()> {
        handler.set_coefficient(0, 0, 1.0);
        Ok(())
    }

    fn set_initial_values(&self, state: &mut [f64]) -> GpnetResult<()> {
        state[0] = 1.0;
        Ok(())
    }
    fn set_initial_controls(&self, controls: &mut InterpolatingVector) -> GpnetResult<()> {
        controls.all_values_mut().fill(0.5);
        Ok(())
    }
    fn set_lower_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()> {
        bounds.all_values_mut().fill(-10.0);
        Ok(())
    }
    fn set_upper_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()> {
        bounds.all_values_mut().fill(10.0);
        Ok(())
    }
    fn set_constraint_lower_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()> {
        bounds.all_values_mut().fill(-5.0);
        Ok(())
    }
    fn set_constraint_upper_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()> {
        bounds.all_values_mut().fill(5.0);
        Ok(())
    }
}

/// Central finite difference of `f` at `x` in direction `e_j`.
pub(crate) fn central_difference(
    mut f: impl FnMut(&[f64]) -> f64,
    x: &[f64],
    j: usize,
    h: f64,
) -> f64 {
    let mut plus = x.to_vec();
    let mut minus = x.to_vec();
    plus[j] += h;
    minus[j] -= h;
    (f(&plus) - f(&minus)) / (2.0 * h)
}
