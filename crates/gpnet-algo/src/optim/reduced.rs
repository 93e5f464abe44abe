//! Reduced-space formulation: controls are the only decision variables.
//!
//! States follow from a forward simulation through the [`ControlStateCache`].
//! Derivatives come from one backward adjoint sweep that serves the objective
//! gradient and the whole constraint Jacobian:
//!
//! ```text
//! A_i = ∂E_i/∂x_i,  B_i = ∂E_i/∂x_{i-1},  C_i = ∂E_i/∂u_i
//!
//! objective:    A_iᵀ ξ_i = -(w_i ∂c/∂x_i + B_{i+1}ᵀ ξ_{i+1})
//!               ∂F/∂u_i  =  w_i ∂c/∂u_i + C_iᵀ ξ_i
//! constraints:  A_iᵀ Λ_i = -((∂g_k/∂x)ᵀ if i = i_k) - B_{i+1}ᵀ Λ_{i+1}
//!               ∂G/∂u_i  =  Λ_iᵀ C_i (+ ∂g_k/∂u if i = i_k)
//! ```
//!
//! `∂/∂u_i` is the derivative with respect to the interpolated control at
//! `t_i`; it is split onto the two surrounding control points with weights
//! `λ` and `1 - λ`.

use super::grid::{distribute, trapezoid_weights, TimeGrids};
use super::initial::InitialValues;
use super::{adjoint_failure, check_length, Optimizer};
use crate::cache::{
    ConstraintJacobian, ConstraintJacobianLayout, ControlStateCache, EquationDerivativeCache,
    Fingerprint, FingerprintHasher, StateCache,
};
use crate::evolver::{control_at, TimeEvolver};
use crate::linear::DenseLu;
use crate::model::{PointContext, StepContext};
use crate::problem::OptimizableProblem;
use crate::sparse::{MatrixHandler, TripletHandler};
use faer::Mat;
use gpnet_core::{
    GpnetError, GpnetResult, Interpolating, InterpolatingVector, InterpolatingView,
};
use sprs::CsMat;
use tracing::debug;

pub struct ReducedOptimizer<P> {
    problem: P,
    grids: TimeGrids,
    initial_state: Vec<f64>,
    init: InitialValues,
    weights: Vec<f64>,
    lambdas: Vec<(usize, f64)>,
    states: ControlStateCache,
    derivatives: EquationDerivativeCache,
    hasher: FingerprintHasher,
    /// Decision vector the gradient and Jacobian below belong to.
    derived_at: Option<Fingerprint>,
    gradient: Vec<f64>,
    jacobian: ConstraintJacobian,
}

impl<P> std::fmt::Debug for ReducedOptimizer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducedOptimizer")
            .field("grids", &self.grids)
            .field("controls", &self.gradient.len())
            .field("jacobian_nnz", &self.jacobian.layout().nnz())
            .finish()
    }
}

fn controls_view<'a>(
    grids: &'a TimeGrids,
    width: usize,
    x: &'a [f64],
) -> GpnetResult<InterpolatingView<'a>> {
    check_length("control vector", x.len(), grids.control_times().len() * width)?;
    InterpolatingView::new(grids.control_times(), width, x)
}

fn assemble(
    rows: usize,
    cols: usize,
    write: impl FnOnce(&mut dyn MatrixHandler) -> GpnetResult<()>,
) -> GpnetResult<CsMat<f64>> {
    let mut handler = TripletHandler::new(rows, cols);
    write(&mut handler)?;
    Ok(handler.into_parts()?.0)
}

impl<P: OptimizableProblem> ReducedOptimizer<P> {
    pub fn new(problem: P, grids: TimeGrids, initial_state: Vec<f64>) -> GpnetResult<Self> {
        check_length("initial state", initial_state.len(), problem.number_of_states())?;
        if problem.number_of_equations() != problem.number_of_states() {
            return Err(GpnetError::Validation(format!(
                "problem has {} equations but {} states",
                problem.number_of_equations(),
                problem.number_of_states()
            )));
        }
        let init = InitialValues::from_problem(&problem, &grids)?;
        let m = problem.number_of_controls_per_step();
        let layout = ConstraintJacobianLayout::new(
            problem.number_of_constraints_per_step(),
            m,
            grids.constraint_times(),
            grids.control_times(),
        );
        Ok(Self {
            weights: trapezoid_weights(grids.state_times()),
            lambdas: grids.state_index_lambdas(),
            gradient: vec![0.0; grids.control_times().len() * m],
            jacobian: ConstraintJacobian::new(layout),
            states: ControlStateCache::default(),
            derivatives: EquationDerivativeCache::new(),
            hasher: FingerprintHasher::default(),
            derived_at: None,
            problem,
            grids,
            initial_state,
            init,
        })
    }

    /// Simulate with a differently configured Newton solver.
    pub fn with_evolver(mut self, evolver: TimeEvolver) -> Self {
        self.states = ControlStateCache::new(evolver);
        self.derived_at = None;
        self
    }

    pub fn problem(&self) -> &P {
        &self.problem
    }

    pub fn grids(&self) -> &TimeGrids {
        &self.grids
    }

    pub fn initial_values(&self) -> &InitialValues {
        &self.init
    }

    pub fn state_cache(&self) -> &ControlStateCache {
        &self.states
    }

    pub fn derivative_cache(&self) -> &EquationDerivativeCache {
        &self.derivatives
    }

    pub fn constraint_jacobian(&self) -> &ConstraintJacobian {
        &self.jacobian
    }

    /// Gradient and constraint Jacobian at `x`, unless already current.
    fn derive(&mut self, x: &[f64]) -> GpnetResult<()> {
        let key = Fingerprint::of(&self.hasher, &[x]);
        if let Some(done) = &self.derived_at {
            if done.matches(&key)? {
                return Ok(());
            }
        }
        self.derived_at = None;

        let Self {
            problem,
            grids,
            initial_state,
            weights,
            lambdas,
            states,
            derivatives,
            gradient,
            jacobian,
            ..
        } = self;
        let problem: &dyn OptimizableProblem = &*problem;
        let n = problem.number_of_states();
        let m = problem.number_of_controls_per_step();
        let h = problem.number_of_constraints_per_step();
        let controls = controls_view(grids, m, x)?;
        let trajectory =
            states.compute_states(problem, &controls, grids.state_times(), initial_state)?;

        gradient.fill(0.0);
        let mut jac = jacobian.as_mapped();
        jac.set_zero();

        let steps = grids.constraint_steps();
        let all_columns = steps.len() * h;
        let mut rhs_f = vec![0.0; n];
        let mut rhs_g = Mat::<f64>::zeros(n, all_columns);
        // constraints `active..` are at or after the current step
        let mut active = steps.len();
        let mut u = Vec::new();
        let mut dc_dx = vec![0.0; n];
        let mut dc_du = vec![0.0; m];

        for i in (1..trajectory.size()).rev() {
            let new_time = trajectory.interpolation_point_at_index(i);
            control_at(problem, &controls, new_time, &mut u)?;
            let ctx = StepContext {
                last_time: trajectory.interpolation_point_at_index(i - 1),
                new_time,
                last_state: trajectory.vector_at_index(i - 1),
                new_state: trajectory.vector_at_index(i),
                control: &u,
            };
            let step = derivatives.get(problem, i, &ctx)?;
            let lu = DenseLu::factorize_transposed(&step.d_new).map_err(|e| adjoint_failure(e, i))?;
            let point = PointContext {
                time: new_time,
                state: ctx.new_state,
                control: &u,
            };

            dc_dx.fill(0.0);
            dc_du.fill(0.0);
            problem.d_cost_d_state(&mut dc_dx, &point);
            problem.d_cost_d_control(&mut dc_du, &point);
            for (r, d) in rhs_f.iter_mut().zip(&dc_dx) {
                *r -= weights[i] * d;
            }
            let xi = lu.solve(&rhs_f).map_err(|e| adjoint_failure(e, i))?;
            rhs_f.fill(0.0);
            for (v, (r, c)) in step.d_last.iter() {
                rhs_f[c] -= v * xi[r];
            }
            let mut du: Vec<f64> = dc_du.iter().map(|d| weights[i] * d).collect();
            for (v, (r, c)) in step.d_control.iter() {
                du[c] += v * xi[r];
            }
            distribute(gradient, m, lambdas[i], &du);

            let fresh = active > 0 && steps[active - 1] == i;
            if fresh {
                active -= 1;
                let dg_dx = assemble(h, n, |handler| problem.d_constraint_d_state(handler, &point))?;
                for (v, (r, c)) in dg_dx.iter() {
                    let col = active * h + r;
                    rhs_g.write(c, col, rhs_g.read(c, col) - v);
                }
            }
            if active == steps.len() {
                continue;
            }

            let first = active * h;
            let width = all_columns - first;
            let block = Mat::from_fn(n, width, |r, q| rhs_g.read(r, first + q));
            let multipliers = lu.solve_many(&block).map_err(|e| adjoint_failure(e, i))?;

            let mut dg = vec![0.0; width * m];
            for (v, (r, c)) in step.d_control.iter() {
                for q in 0..width {
                    dg[q * m + c] += v * multipliers.read(r, q);
                }
            }
            if fresh {
                let dg_du =
                    assemble(h, m, |handler| problem.d_constraint_d_control(handler, &point))?;
                for (v, (r, c)) in dg_du.iter() {
                    dg[r * m + c] += v;
                }
            }
            let (upper, lambda) = lambdas[i];
            for q in 0..width {
                let row = first + q;
                for c in 0..m {
                    let value = dg[q * m + c];
                    jac.add(row, upper * m + c, lambda * value)?;
                    if lambda < 1.0 && upper > 0 {
                        jac.add(row, (upper - 1) * m + c, (1.0 - lambda) * value)?;
                    }
                }
            }

            for q in 0..width {
                for r in 0..n {
                    rhs_g.write(r, first + q, 0.0);
                }
            }
            for (v, (r, c)) in step.d_last.iter() {
                for q in 0..width {
                    let col = first + q;
                    rhs_g.write(c, col, rhs_g.read(c, col) - v * multipliers.read(r, q));
                }
            }
        }

        debug!(
            steps = trajectory.size().saturating_sub(1),
            constraints = steps.len(),
            "adjoint sweep done"
        );
        self.derived_at = Some(key);
        Ok(())
    }
}

impl<P: OptimizableProblem> Optimizer for ReducedOptimizer<P> {
    fn variable_count(&self) -> usize {
        self.gradient.len()
    }

    fn constraint_count(&self) -> usize {
        self.jacobian.layout().rows()
    }

    fn jacobian_nnz(&self) -> usize {
        self.jacobian.layout().nnz()
    }

    fn initial_point(&self, x: &mut [f64]) -> GpnetResult<()> {
        check_length("initial point", x.len(), self.variable_count())?;
        x.copy_from_slice(self.init.controls.all_values());
        Ok(())
    }

    fn variable_bounds(&self, lower: &mut [f64], upper: &mut [f64]) -> GpnetResult<()> {
        check_length("lower bounds", lower.len(), self.variable_count())?;
        check_length("upper bounds", upper.len(), self.variable_count())?;
        lower.copy_from_slice(self.init.lower_bounds.all_values());
        upper.copy_from_slice(self.init.upper_bounds.all_values());
        Ok(())
    }

    fn constraint_bounds(&self, lower: &mut [f64], upper: &mut [f64]) -> GpnetResult<()> {
        check_length("constraint lower bounds", lower.len(), self.constraint_count())?;
        check_length("constraint upper bounds", upper.len(), self.constraint_count())?;
        lower.copy_from_slice(self.init.constraint_lower_bounds.all_values());
        upper.copy_from_slice(self.init.constraint_upper_bounds.all_values());
        Ok(())
    }

    fn new_x(&mut self) {
        self.derived_at = None;
    }

    fn objective(&mut self, x: &[f64]) -> GpnetResult<f64> {
        let m = self.problem.number_of_controls_per_step();
        let controls = controls_view(&self.grids, m, x)?;
        let states = self.states.compute_states(
            &self.problem,
            &controls,
            self.grids.state_times(),
            &self.initial_state,
        )?;
        let mut u = Vec::new();
        let mut total = 0.0;
        for i in 1..states.size() {
            let time = states.interpolation_point_at_index(i);
            control_at(&self.problem, &controls, time, &mut u)?;
            total += self.weights[i]
                * self.problem.evaluate_cost(&PointContext {
                    time,
                    state: states.vector_at_index(i),
                    control: &u,
                });
        }
        Ok(total)
    }

    fn objective_gradient(&mut self, x: &[f64], gradient: &mut [f64]) -> GpnetResult<()> {
        check_length("gradient", gradient.len(), self.variable_count())?;
        self.derive(x)?;
        gradient.copy_from_slice(&self.gradient);
        Ok(())
    }

    fn constraints(&mut self, x: &[f64], values: &mut [f64]) -> GpnetResult<()> {
        check_length("constraint values", values.len(), self.constraint_count())?;
        let m = self.problem.number_of_controls_per_step();
        let h = self.problem.number_of_constraints_per_step();
        let controls = controls_view(&self.grids, m, x)?;
        let states = self.states.compute_states(
            &self.problem,
            &controls,
            self.grids.state_times(),
            &self.initial_state,
        )?;
        values.fill(0.0);
        let mut u = Vec::new();
        for (k, &i) in self.grids.constraint_steps().iter().enumerate() {
            let time = states.interpolation_point_at_index(i);
            control_at(&self.problem, &controls, time, &mut u)?;
            self.problem.evaluate_constraint(
                &mut values[k * h..(k + 1) * h],
                &PointContext {
                    time,
                    state: states.vector_at_index(i),
                    control: &u,
                },
            )?;
        }
        Ok(())
    }

    fn jacobian_indices(&self, rows: &mut [usize], cols: &mut [usize]) -> GpnetResult<()> {
        self.jacobian.supply_indices(rows, cols)
    }

    fn jacobian_values(&mut self, x: &[f64], values: &mut [f64]) -> GpnetResult<()> {
        check_length("jacobian values", values.len(), self.jacobian_nnz())?;
        self.derive(x)?;
        values.copy_from_slice(self.jacobian.values());
        Ok(())
    }

    fn state_trajectory(&mut self, x: &[f64]) -> GpnetResult<InterpolatingVector> {
        let m = self.problem.number_of_controls_per_step();
        let controls = controls_view(&self.grids, m, x)?;
        let states = self.states.compute_states(
            &self.problem,
            &controls,
            self.grids.state_times(),
            &self.initial_state,
        )?;
        Ok(states.clone())
    }

    fn control_trajectory(&self, x: &[f64]) -> GpnetResult<InterpolatingVector> {
        let m = self.problem.number_of_controls_per_step();
        check_length("control vector", x.len(), self.variable_count())?;
        InterpolatingVector::from_parts(self.grids.control_times().to_vec(), m, x.to_vec())
    }
}
