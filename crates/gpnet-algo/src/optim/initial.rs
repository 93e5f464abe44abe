//! Initial controls and bounds gathered from the problem's components.

use super::grid::TimeGrids;
use crate::problem::OptimizableProblem;
use gpnet_core::{GpnetError, GpnetResult, Interpolating, InterpolatingMut, InterpolatingVector};

/// Bound magnitude treated as "no bound" by NLP solvers.
pub const UNBOUNDED: f64 = 1e20;

/// Starting controls plus control and constraint bounds on their grids.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialValues {
    pub controls: InterpolatingVector,
    pub lower_bounds: InterpolatingVector,
    pub upper_bounds: InterpolatingVector,
    pub constraint_lower_bounds: InterpolatingVector,
    pub constraint_upper_bounds: InterpolatingVector,
}

fn filled(points: &[f64], width: usize, value: f64) -> GpnetResult<InterpolatingVector> {
    let mut vector = InterpolatingVector::new(points.to_vec(), width)?;
    vector.all_values_mut().fill(value);
    Ok(vector)
}

impl InitialValues {
    /// Query every control and constraint component. Slots nobody bounds
    /// stay at `±UNBOUNDED`.
    pub fn from_problem(problem: &dyn OptimizableProblem, grids: &TimeGrids) -> GpnetResult<Self> {
        let w = problem.number_of_controls_per_step();
        let h = problem.number_of_constraints_per_step();
        let controls_at = grids.control_times();
        let constraints_at = grids.constraint_times();

        let mut values = Self {
            controls: filled(controls_at, w, 0.0)?,
            lower_bounds: filled(controls_at, w, -UNBOUNDED)?,
            upper_bounds: filled(controls_at, w, UNBOUNDED)?,
            constraint_lower_bounds: filled(constraints_at, h, -UNBOUNDED)?,
            constraint_upper_bounds: filled(constraints_at, h, UNBOUNDED)?,
        };
        problem.set_initial_controls(&mut values.controls)?;
        problem.set_lower_bounds(&mut values.lower_bounds)?;
        problem.set_upper_bounds(&mut values.upper_bounds)?;
        problem.set_constraint_lower_bounds(&mut values.constraint_lower_bounds)?;
        problem.set_constraint_upper_bounds(&mut values.constraint_upper_bounds)?;
        values.validate()?;
        Ok(values)
    }

    fn validate(&self) -> GpnetResult<()> {
        let pairs = [
            (&self.lower_bounds, &self.upper_bounds, "control"),
            (
                &self.constraint_lower_bounds,
                &self.constraint_upper_bounds,
                "constraint",
            ),
        ];
        for (lower, upper, what) in pairs {
            let crossed = lower
                .all_values()
                .iter()
                .zip(upper.all_values())
                .position(|(l, u)| l > u);
            if let Some(slot) = crossed {
                return Err(GpnetError::Validation(format!(
                    "{what} slot {slot}: lower bound exceeds upper bound"
                )));
            }
        }
        Ok(())
    }
}
