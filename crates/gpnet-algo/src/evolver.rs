//! # Time Evolver
//!
//! Forward simulation: one Newton solve per time step, each starting from
//! the previous converged state.
//!
//! Step `i` solves `E(tᵢ₋₁, tᵢ, xᵢ₋₁, xᵢ, u(tᵢ)) = 0` for `xᵢ`. Failures carry
//! the index of the step at which they occurred.

use crate::model::StepContext;
use crate::newton::{NewtonConfig, NewtonReport, NewtonSolver, NonlinearSystem};
use crate::problem::OptimizableProblem;
use crate::sparse::MatrixHandler;
use gpnet_core::{GpnetError, GpnetResult, Interpolating, InterpolatingMut, InterpolatingVector};
use tracing::info;

/// One implicit step seen as a nonlinear system in the new state.
struct StepSystem<'a> {
    problem: &'a dyn OptimizableProblem,
    last_time: f64,
    new_time: f64,
    last_state: &'a [f64],
    control: &'a [f64],
}

impl StepSystem<'_> {
    fn context<'s>(&'s self, new_state: &'s [f64]) -> StepContext<'s> {
        StepContext {
            last_time: self.last_time,
            new_time: self.new_time,
            last_state: self.last_state,
            new_state,
            control: self.control,
        }
    }
}

impl NonlinearSystem for StepSystem<'_> {
    fn size(&self) -> usize {
        self.problem.number_of_states()
    }

    fn residual(&mut self, x: &[f64], out: &mut [f64]) -> GpnetResult<()> {
        self.problem.evaluate(out, &self.context(x))
    }

    fn jacobian(&mut self, x: &[f64], handler: &mut dyn MatrixHandler) -> GpnetResult<()> {
        self.problem.d_evaluate_d_new_state(handler, &self.context(x))
    }
}

/// Initial state vector as declared by the components.
pub fn initial_state(problem: &dyn OptimizableProblem) -> GpnetResult<Vec<f64>> {
    let mut state = vec![0.0; problem.number_of_states()];
    problem.set_initial_values(&mut state)?;
    Ok(state)
}

/// Control values at time `t`, or nothing if the problem has no controls.
pub(crate) fn control_at(
    problem: &dyn OptimizableProblem,
    controls: &dyn Interpolating,
    t: f64,
    out: &mut Vec<f64>,
) -> GpnetResult<()> {
    out.clear();
    out.resize(problem.number_of_controls_per_step(), 0.0);
    if !out.is_empty() {
        controls.evaluate_into(t, out)?;
    }
    Ok(())
}

fn check_square(problem: &dyn OptimizableProblem) -> GpnetResult<()> {
    if problem.number_of_equations() != problem.number_of_states() {
        return Err(GpnetError::Validation(format!(
            "problem has {} equations but {} states",
            problem.number_of_equations(),
            problem.number_of_states()
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct TimeEvolver {
    solver: NewtonSolver,
}

impl TimeEvolver {
    pub fn new(config: NewtonConfig) -> Self {
        Self {
            solver: NewtonSolver::new(config),
        }
    }

    pub fn with_solver(solver: NewtonSolver) -> Self {
        Self { solver }
    }

    pub fn solver(&self) -> &NewtonSolver {
        &self.solver
    }

    /// Solve one step. `new_state` holds the initial guess on entry.
    pub fn step(
        &mut self,
        problem: &dyn OptimizableProblem,
        last_time: f64,
        new_time: f64,
        last_state: &[f64],
        new_state: &mut [f64],
        control: &[f64],
    ) -> GpnetResult<NewtonReport> {
        check_square(problem)?;
        let mut system = StepSystem {
            problem,
            last_time,
            new_time,
            last_state,
            control,
        };
        self.solver.solve(&mut system, new_state)
    }

    /// Fill `states` at all of its time points.
    ///
    /// The first time point receives `initial_state`; every later one is
    /// solved from its predecessor with the controls interpolated at its time.
    pub fn simulate(
        &mut self,
        problem: &dyn OptimizableProblem,
        initial_state: &[f64],
        controls: &dyn Interpolating,
        states: &mut InterpolatingVector,
    ) -> GpnetResult<Vec<NewtonReport>> {
        check_square(problem)?;
        let n = problem.number_of_states();
        if states.inner_length() != n || initial_state.len() != n {
            return Err(GpnetError::Validation(format!(
                "state storage has width {} and initial state length {}, problem has {n} states",
                states.inner_length(),
                initial_state.len()
            )));
        }
        if problem.number_of_controls_per_step() > 0
            && controls.inner_length() != problem.number_of_controls_per_step()
        {
            return Err(GpnetError::Validation(format!(
                "controls have width {}, problem has {} per step",
                controls.inner_length(),
                problem.number_of_controls_per_step()
            )));
        }
        if states.size() == 0 {
            return Ok(Vec::new());
        }

        states.mut_timestep(0).copy_from_slice(initial_state);
        let mut reports = Vec::with_capacity(states.size() - 1);
        let mut last = initial_state.to_vec();
        let mut control = Vec::new();
        for i in 1..states.size() {
            let last_time = states.interpolation_point_at_index(i - 1);
            let new_time = states.interpolation_point_at_index(i);
            control_at(problem, controls, new_time, &mut control)?;
            let mut next = last.clone();
            let report = self
                .step(problem, last_time, new_time, &last, &mut next, &control)
                .map_err(|e| e.at_step(i))?;
            info!(
                step = i,
                time = new_time,
                residual = report.residual_norm,
                iterations = report.iterations,
                "time step converged"
            );
            states.mut_timestep(i).copy_from_slice(&next);
            reports.push(report);
            last = next;
        }
        Ok(reports)
    }
}
