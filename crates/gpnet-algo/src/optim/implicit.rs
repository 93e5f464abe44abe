//! Full-space formulation: controls and states are both decision variables.
//!
//! The decision vector is `[U; X_1 … X_N]`; the initial state `x_0` is fixed.
//! Every step's equations become equality constraints, followed by the
//! declared constraints:
//!
//! ```text
//! rows (i-1)·n .. i·n       E_i(t_{i-1}, t_i, x_{i-1}, x_i, u(t_i)) = 0
//! rows N·n + k·h ..         g(τ_k, x_{i_k}, u(τ_k)) ∈ [g_l, g_u]
//! ```
//!
//! The Jacobian pattern is fixed once by a triplet pass at the initial point;
//! every later evaluation refreshes values through the reference backend.

use super::grid::{distribute, trapezoid_weights, TimeGrids};
use super::initial::{InitialValues, UNBOUNDED};
use super::{check_length, Optimizer};
use crate::evolver::{control_at, TimeEvolver};
use crate::model::{PointContext, StepContext};
use crate::problem::OptimizableProblem;
use crate::sparse::{MatrixHandler, OffsetHandler, ReferenceHandler, TripletHandler, WriteSequence};
use gpnet_core::{
    GpnetError, GpnetResult, Interpolating, InterpolatingMut, InterpolatingVector,
    InterpolatingView,
};
use sprs::CsMat;
use tracing::warn;

/// Everything the callbacks need except the Jacobian storage.
struct Formulation<P> {
    problem: P,
    grids: TimeGrids,
    initial_state: Vec<f64>,
    init: InitialValues,
    weights: Vec<f64>,
    lambdas: Vec<(usize, f64)>,
}

impl<P: OptimizableProblem> Formulation<P> {
    fn states_per_step(&self) -> usize {
        self.problem.number_of_states()
    }

    fn controls_per_step(&self) -> usize {
        self.problem.number_of_controls_per_step()
    }

    fn constraints_per_step(&self) -> usize {
        self.problem.number_of_constraints_per_step()
    }

    fn steps(&self) -> usize {
        self.grids.state_times().len() - 1
    }

    /// First state column.
    fn state_offset(&self) -> usize {
        self.grids.control_times().len() * self.controls_per_step()
    }

    fn variable_count(&self) -> usize {
        self.state_offset() + self.steps() * self.states_per_step()
    }

    fn constraint_count(&self) -> usize {
        self.steps() * self.states_per_step()
            + self.grids.constraint_times().len() * self.constraints_per_step()
    }

    fn controls<'a>(&'a self, z: &'a [f64]) -> GpnetResult<InterpolatingView<'a>> {
        check_length("decision vector", z.len(), self.variable_count())?;
        InterpolatingView::new(
            self.grids.control_times(),
            self.controls_per_step(),
            &z[..self.state_offset()],
        )
    }

    fn state<'a>(&'a self, z: &'a [f64], i: usize) -> &'a [f64] {
        if i == 0 {
            return &self.initial_state;
        }
        let n = self.states_per_step();
        let start = self.state_offset() + (i - 1) * n;
        &z[start..start + n]
    }

    fn step_context<'a>(&'a self, z: &'a [f64], i: usize, control: &'a [f64]) -> StepContext<'a> {
        let times = self.grids.state_times();
        StepContext {
            last_time: times[i - 1],
            new_time: times[i],
            last_state: self.state(z, i - 1),
            new_state: self.state(z, i),
            control,
        }
    }

    /// Write a control derivative block split onto the two surrounding control points.
    fn write_control_block(
        &self,
        handler: &mut dyn MatrixHandler,
        row: usize,
        step: usize,
        write: impl Fn(&mut dyn MatrixHandler) -> GpnetResult<()>,
    ) -> GpnetResult<()> {
        let m = self.controls_per_step();
        let (upper, lambda) = self.lambdas[step];
        write(&mut OffsetHandler::new(&mut *handler, row, upper * m).with_scale(lambda))?;
        if lambda < 1.0 && upper > 0 {
            write(&mut OffsetHandler::new(&mut *handler, row, (upper - 1) * m).with_scale(1.0 - lambda))?;
        }
        Ok(())
    }

    fn write_jacobian(&self, handler: &mut dyn MatrixHandler, z: &[f64]) -> GpnetResult<()> {
        let n = self.states_per_step();
        let h = self.constraints_per_step();
        let offset = self.state_offset();
        let controls = self.controls(z)?;
        let problem: &dyn OptimizableProblem = &self.problem;
        let mut u = Vec::new();
        for i in 1..=self.steps() {
            control_at(problem, &controls, self.grids.state_times()[i], &mut u)?;
            let ctx = self.step_context(z, i, &u);
            let row = (i - 1) * n;
            problem.d_evaluate_d_new_state(
                &mut OffsetHandler::new(&mut *handler, row, offset + (i - 1) * n),
                &ctx,
            )?;
            if i > 1 {
                problem.d_evaluate_d_last_state(
                    &mut OffsetHandler::new(&mut *handler, row, offset + (i - 2) * n),
                    &ctx,
                )?;
            }
            self.write_control_block(handler, row, i, |block| {
                problem.d_evaluate_d_control(block, &ctx)
            })?;
        }
        let base = self.steps() * n;
        for (k, &i) in self.grids.constraint_steps().iter().enumerate() {
            let time = self.grids.state_times()[i];
            control_at(problem, &controls, time, &mut u)?;
            let point = PointContext {
                time,
                state: self.state(z, i),
                control: &u,
            };
            let row = base + k * h;
            problem.d_constraint_d_state(
                &mut OffsetHandler::new(&mut *handler, row, offset + (i - 1) * n),
                &point,
            )?;
            self.write_control_block(handler, row, i, |block| {
                problem.d_constraint_d_control(block, &point)
            })?;
        }
        Ok(())
    }
}

/// Full-space NLP over controls and states.
pub struct ImplicitOptimizer<P> {
    form: Formulation<P>,
    start: Vec<f64>,
    jacobian: CsMat<f64>,
    sequence: WriteSequence,
}

impl<P> std::fmt::Debug for ImplicitOptimizer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImplicitOptimizer")
            .field("grids", &self.form.grids)
            .field("variables", &self.start.len())
            .field("jacobian_nnz", &self.jacobian.nnz())
            .finish()
    }
}

impl<P: OptimizableProblem> ImplicitOptimizer<P> {
    /// Set up the formulation. The state part of the starting point is a
    /// forward simulation under the initial controls, or `x_0` repeated if that
    /// simulation fails.
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
        let form = Formulation {
            weights: trapezoid_weights(grids.state_times()),
            lambdas: grids.state_index_lambdas(),
            problem,
            grids,
            initial_state,
            init,
        };
        let start = starting_point(&form)?;

        let mut triplets = TripletHandler::new(form.constraint_count(), form.variable_count());
        form.write_jacobian(&mut triplets, &start)?;
        let (jacobian, sequence) = triplets.into_parts()?;
        tracing::debug!(
            variables = start.len(),
            constraints = form.constraint_count(),
            nnz = jacobian.nnz(),
            "full-space jacobian pattern fixed"
        );
        Ok(Self {
            form,
            start,
            jacobian,
            sequence,
        })
    }

    pub fn problem(&self) -> &P {
        &self.form.problem
    }

    pub fn grids(&self) -> &TimeGrids {
        &self.form.grids
    }

    /// Assembled constraint Jacobian of the last evaluation.
    pub fn jacobian(&self) -> &CsMat<f64> {
        &self.jacobian
    }
}

fn starting_point<P: OptimizableProblem>(form: &Formulation<P>) -> GpnetResult<Vec<f64>> {
    let n = form.states_per_step();
    let offset = form.state_offset();
    let mut z = vec![0.0; form.variable_count()];
    z[..offset].copy_from_slice(form.init.controls.all_values());

    let mut states = InterpolatingVector::new(form.grids.state_times().to_vec(), n)?;
    let simulated = TimeEvolver::default().simulate(
        &form.problem,
        &form.initial_state,
        &form.init.controls,
        &mut states,
    );
    match simulated {
        Ok(_) => z[offset..].copy_from_slice(&states.all_values()[n..]),
        Err(error) => {
            warn!(%error, "initial simulation failed, starting from the initial state");
            for block in z[offset..].chunks_mut(n.max(1)) {
                block.copy_from_slice(&form.initial_state[..block.len()]);
            }
        }
    }
    Ok(z)
}

impl<P: OptimizableProblem> Optimizer for ImplicitOptimizer<P> {
    fn variable_count(&self) -> usize {
        self.form.variable_count()
    }

    fn constraint_count(&self) -> usize {
        self.form.constraint_count()
    }

    fn jacobian_nnz(&self) -> usize {
        self.jacobian.nnz()
    }

    fn initial_point(&self, x: &mut [f64]) -> GpnetResult<()> {
        check_length("initial point", x.len(), self.start.len())?;
        x.copy_from_slice(&self.start);
        Ok(())
    }

    fn variable_bounds(&self, lower: &mut [f64], upper: &mut [f64]) -> GpnetResult<()> {
        check_length("lower bounds", lower.len(), self.variable_count())?;
        check_length("upper bounds", upper.len(), self.variable_count())?;
        let offset = self.form.state_offset();
        lower[..offset].copy_from_slice(self.form.init.lower_bounds.all_values());
        upper[..offset].copy_from_slice(self.form.init.upper_bounds.all_values());
        lower[offset..].fill(-UNBOUNDED);
        upper[offset..].fill(UNBOUNDED);
        Ok(())
    }

    fn constraint_bounds(&self, lower: &mut [f64], upper: &mut [f64]) -> GpnetResult<()> {
        check_length("constraint lower bounds", lower.len(), self.constraint_count())?;
        check_length("constraint upper bounds", upper.len(), self.constraint_count())?;
        let base = self.form.steps() * self.form.states_per_step();
        lower[..base].fill(0.0);
        upper[..base].fill(0.0);
        lower[base..].copy_from_slice(self.form.init.constraint_lower_bounds.all_values());
        upper[base..].copy_from_slice(self.form.init.constraint_upper_bounds.all_values());
        Ok(())
    }

    /// Nothing is memoized between points.
    fn new_x(&mut self) {}

    fn objective(&mut self, x: &[f64]) -> GpnetResult<f64> {
        let form = &self.form;
        let controls = form.controls(x)?;
        let mut u = Vec::new();
        let mut total = 0.0;
        for i in 1..=form.steps() {
            let time = form.grids.state_times()[i];
            control_at(&form.problem, &controls, time, &mut u)?;
            total += form.weights[i]
                * form.problem.evaluate_cost(&PointContext {
                    time,
                    state: form.state(x, i),
                    control: &u,
                });
        }
        Ok(total)
    }

    fn objective_gradient(&mut self, x: &[f64], gradient: &mut [f64]) -> GpnetResult<()> {
        let form = &self.form;
        check_length("gradient", gradient.len(), form.variable_count())?;
        let controls = form.controls(x)?;
        let n = form.states_per_step();
        let m = form.controls_per_step();
        let offset = form.state_offset();
        gradient.fill(0.0);
        let mut u = Vec::new();
        let mut dc_dx = vec![0.0; n];
        let mut dc_du = vec![0.0; m];
        for i in 1..=form.steps() {
            let time = form.grids.state_times()[i];
            control_at(&form.problem, &controls, time, &mut u)?;
            let point = PointContext {
                time,
                state: form.state(x, i),
                control: &u,
            };
            dc_dx.fill(0.0);
            dc_du.fill(0.0);
            form.problem.d_cost_d_state(&mut dc_dx, &point);
            form.problem.d_cost_d_control(&mut dc_du, &point);
            let w = form.weights[i];
            let start = offset + (i - 1) * n;
            for (g, d) in gradient[start..start + n].iter_mut().zip(&dc_dx) {
                *g += w * d;
            }
            dc_du.iter_mut().for_each(|d| *d *= w);
            distribute(&mut gradient[..offset], m, form.lambdas[i], &dc_du);
        }
        Ok(())
    }

    fn constraints(&mut self, x: &[f64], values: &mut [f64]) -> GpnetResult<()> {
        let form = &self.form;
        check_length("constraint values", values.len(), form.constraint_count())?;
        let controls = form.controls(x)?;
        let n = form.states_per_step();
        let h = form.constraints_per_step();
        values.fill(0.0);
        let mut u = Vec::new();
        for i in 1..=form.steps() {
            control_at(&form.problem, &controls, form.grids.state_times()[i], &mut u)?;
            let ctx = form.step_context(x, i, &u);
            form.problem
                .evaluate(&mut values[(i - 1) * n..i * n], &ctx)?;
        }
        let base = form.steps() * n;
        for (k, &i) in form.grids.constraint_steps().iter().enumerate() {
            let time = form.grids.state_times()[i];
            control_at(&form.problem, &controls, time, &mut u)?;
            let rows = base + k * h..base + (k + 1) * h;
            form.problem.evaluate_constraint(
                &mut values[rows],
                &PointContext {
                    time,
                    state: form.state(x, i),
                    control: &u,
                },
            )?;
        }
        Ok(())
    }

    fn jacobian_indices(&self, rows: &mut [usize], cols: &mut [usize]) -> GpnetResult<()> {
        check_length("row indices", rows.len(), self.jacobian_nnz())?;
        check_length("column indices", cols.len(), self.jacobian_nnz())?;
        for (k, (_, (row, col))) in self.jacobian.iter().enumerate() {
            rows[k] = row;
            cols[k] = col;
        }
        Ok(())
    }

    fn jacobian_values(&mut self, x: &[f64], values: &mut [f64]) -> GpnetResult<()> {
        check_length("jacobian values", values.len(), self.jacobian_nnz())?;
        let mut handler = ReferenceHandler::new(&mut self.jacobian, &self.sequence);
        self.form.write_jacobian(&mut handler, x)?;
        handler.set_matrix()?;
        values.copy_from_slice(self.jacobian.data());
        Ok(())
    }

    fn state_trajectory(&mut self, x: &[f64]) -> GpnetResult<InterpolatingVector> {
        check_length("decision vector", x.len(), self.variable_count())?;
        let n = self.form.states_per_step();
        let mut states = InterpolatingVector::new(self.form.grids.state_times().to_vec(), n)?;
        for i in 0..states.size() {
            states.mut_timestep(i).copy_from_slice(self.form.state(x, i));
        }
        Ok(states)
    }

    fn control_trajectory(&self, x: &[f64]) -> GpnetResult<InterpolatingVector> {
        check_length("decision vector", x.len(), self.variable_count())?;
        InterpolatingVector::from_parts(
            self.form.grids.control_times().to_vec(),
            self.form.controls_per_step(),
            x[..self.form.state_offset()].to_vec(),
        )
    }
}
