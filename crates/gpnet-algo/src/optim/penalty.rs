//! Exterior quadratic penalty method with L-BFGS inner solves.
//!
//! ```text
//! P_μ(x) = f(x) + μ Σ dist(g_r(x), [g_l, g_u])² + μ Σ dist(x_j, [l_j, u_j])²
//! ```
//!
//! Each outer round minimizes `P_μ` from the previous iterate, then checks the
//! largest violation. `μ` grows geometrically until the violation drops below
//! the tolerance or the rounds run out. The final iterate is projected onto
//! the variable box.

use super::{bound_violation, NlpSolution, NlpStatus, Optimizer};
use argmin::core::{CostFunction, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use gpnet_core::{GpnetError, GpnetResult, NumericalProblem, NumericalProblemKind};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// L-BFGS iterations over all rounds, split evenly.
    pub max_iterations: usize,
    /// Largest accepted constraint or bound violation.
    pub tolerance: f64,
    pub initial_penalty: f64,
    pub penalty_growth: f64,
    pub outer_rounds: usize,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-6,
            initial_penalty: 1e3,
            penalty_growth: 10.0,
            outer_rounds: 5,
        }
    }
}

impl PenaltyConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_initial_penalty(mut self, penalty: f64) -> Self {
        self.initial_penalty = penalty;
        self
    }

    pub fn with_penalty_growth(mut self, growth: f64) -> Self {
        self.penalty_growth = growth;
        self
    }

    pub fn with_outer_rounds(mut self, rounds: usize) -> Self {
        self.outer_rounds = rounds;
        self
    }
}

/// Bounds and Jacobian pattern, fetched once per solve.
struct Frame {
    lower: Vec<f64>,
    upper: Vec<f64>,
    constraint_lower: Vec<f64>,
    constraint_upper: Vec<f64>,
    rows: Vec<usize>,
    cols: Vec<usize>,
}

impl Frame {
    fn of(optimizer: &dyn Optimizer) -> GpnetResult<Self> {
        let n = optimizer.variable_count();
        let m = optimizer.constraint_count();
        let nnz = optimizer.jacobian_nnz();
        let mut frame = Self {
            lower: vec![0.0; n],
            upper: vec![0.0; n],
            constraint_lower: vec![0.0; m],
            constraint_upper: vec![0.0; m],
            rows: vec![0; nnz],
            cols: vec![0; nnz],
        };
        optimizer.variable_bounds(&mut frame.lower, &mut frame.upper)?;
        optimizer.constraint_bounds(&mut frame.constraint_lower, &mut frame.constraint_upper)?;
        optimizer.jacobian_indices(&mut frame.rows, &mut frame.cols)?;
        Ok(frame)
    }
}

/// Signed excess of `v` over `[lower, upper]`, zero inside.
fn excess(v: f64, lower: f64, upper: f64) -> f64 {
    v - v.clamp(lower, upper)
}

struct PenaltyProblem<'a, 'o> {
    optimizer: &'a RefCell<&'o mut dyn Optimizer>,
    frame: &'a Frame,
    penalty: f64,
}

impl PenaltyProblem<'_, '_> {
    fn constraint_values(&self, x: &[f64]) -> GpnetResult<Vec<f64>> {
        let mut values = vec![0.0; self.frame.constraint_lower.len()];
        self.optimizer.borrow_mut().constraints(x, &mut values)?;
        Ok(values)
    }
}

impl CostFunction for PenaltyProblem<'_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let frame = self.frame;
        let g = self.constraint_values(x)?;
        let mut cost = self.optimizer.borrow_mut().objective(x)?;
        for (r, v) in g.iter().enumerate() {
            let e = excess(*v, frame.constraint_lower[r], frame.constraint_upper[r]);
            cost += self.penalty * e * e;
        }
        for (j, v) in x.iter().enumerate() {
            let e = excess(*v, frame.lower[j], frame.upper[j]);
            cost += self.penalty * e * e;
        }
        Ok(cost)
    }
}

impl Gradient for PenaltyProblem<'_, '_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, x: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let frame = self.frame;
        let g = self.constraint_values(x)?;
        let mut gradient = vec![0.0; x.len()];
        let mut jacobian = vec![0.0; frame.rows.len()];
        {
            let mut optimizer = self.optimizer.borrow_mut();
            optimizer.objective_gradient(x, &mut gradient)?;
            optimizer.jacobian_values(x, &mut jacobian)?;
        }
        for ((&r, &c), d) in frame.rows.iter().zip(&frame.cols).zip(&jacobian) {
            let e = excess(g[r], frame.constraint_lower[r], frame.constraint_upper[r]);
            gradient[c] += 2.0 * self.penalty * e * d;
        }
        for (j, v) in x.iter().enumerate() {
            gradient[j] += 2.0 * self.penalty * excess(*v, frame.lower[j], frame.upper[j]);
        }
        Ok(gradient)
    }
}

/// Penalty/L-BFGS backend; needs no native libraries.
#[derive(Debug, Clone, Default)]
pub struct PenaltyLbfgsSolver {
    config: PenaltyConfig,
}

impl PenaltyLbfgsSolver {
    pub fn new(config: PenaltyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PenaltyConfig {
        &self.config
    }

    /// Solve from the optimizer's initial point.
    ///
    /// Fails with [`NumericalProblemKind::Infeasible`] when the projected
    /// final iterate still violates a constraint by more than ten times the
    /// tolerance. Errors raised by the optimizer itself, such as a failed
    /// simulation, are returned as they are; only argmin's own terminations
    /// are tolerated.
    pub fn solve(&self, optimizer: &mut dyn Optimizer) -> GpnetResult<NlpSolution> {
        let config = &self.config;
        let frame = Frame::of(&*optimizer)?;
        let mut x = vec![0.0; optimizer.variable_count()];
        optimizer.initial_point(&mut x)?;

        let rounds = config.outer_rounds.max(1);
        let inner_budget = (config.max_iterations / rounds).max(1) as u64;
        let mut penalty = config.initial_penalty;
        let mut total_iterations = 0;
        let mut budget_exhausted = false;

        let cell = RefCell::new(optimizer);
        for round in 0..rounds {
            let problem = PenaltyProblem {
                optimizer: &cell,
                frame: &frame,
                penalty,
            };
            let solver = LBFGS::new(MoreThuenteLineSearch::new(), 7);
            let result = Executor::new(problem, solver)
                .configure(|state| state.param(x.clone()).max_iters(inner_budget))
                .run();
            match result {
                Ok(res) => {
                    let iterations = res.state().get_iter();
                    total_iterations += iterations as usize;
                    budget_exhausted = iterations >= inner_budget;
                    if let Some(best) = res.state().get_best_param() {
                        x = best.clone();
                    }
                }
                Err(error) => match error.downcast::<GpnetError>() {
                    Ok(failure) => {
                        warn!(round, %failure, "model evaluation failed inside L-BFGS");
                        return Err(failure);
                    }
                    Err(error) => {
                        warn!(round, %error, "inner L-BFGS solve stopped early, keeping the last iterate");
                    }
                },
            }

            cell.borrow_mut().new_x();
            let violation = violation_at(&mut **cell.borrow_mut(), &frame, &x)?;
            debug!(round, penalty, violation, "penalty round finished");
            if violation < config.tolerance {
                break;
            }
            penalty *= config.penalty_growth;
        }

        let optimizer = cell.into_inner();
        for ((v, l), u) in x.iter_mut().zip(&frame.lower).zip(&frame.upper) {
            *v = v.clamp(*l, *u);
        }
        optimizer.new_x();
        let mut constraints = vec![0.0; optimizer.constraint_count()];
        optimizer.constraints(&x, &mut constraints)?;
        let violation = bound_violation(&constraints, &frame.constraint_lower, &frame.constraint_upper);
        if violation >= 10.0 * config.tolerance {
            return Err(NumericalProblem::new(
                NumericalProblemKind::Infeasible,
                total_iterations,
                violation,
            )
            .into());
        }

        let status = if violation >= config.tolerance {
            NlpStatus::Acceptable
        } else if budget_exhausted {
            NlpStatus::IterationLimit
        } else {
            NlpStatus::Optimal
        };
        let objective = optimizer.objective(&x)?;
        info!(?status, objective, iterations = total_iterations, "penalty solve finished");
        Ok(NlpSolution {
            status,
            objective,
            decision: x,
            constraints,
            iterations: total_iterations,
        })
    }
}

fn violation_at(optimizer: &mut dyn Optimizer, frame: &Frame, x: &[f64]) -> GpnetResult<f64> {
    let mut g = vec![0.0; frame.constraint_lower.len()];
    optimizer.constraints(x, &mut g)?;
    Ok(bound_violation(&g, &frame.constraint_lower, &frame.constraint_upper)
        .max(bound_violation(x, &frame.lower, &frame.upper)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpnet_core::InterpolatingVector;

    /// `min (x0 - 2)² + (x1 - 1)²` with `x0 + x1 ∈ [-∞, 2]` and `x1 ≤ 0.25`.
    #[derive(Default)]
    struct Quadratic {
        rows_infeasible: bool,
        /// Objective fails anywhere but at the origin.
        breaks_after_start: bool,
    }

    impl Optimizer for Quadratic {
        fn variable_count(&self) -> usize {
            2
        }
        fn constraint_count(&self) -> usize {
            1
        }
        fn jacobian_nnz(&self) -> usize {
            2
        }
        fn initial_point(&self, x: &mut [f64]) -> GpnetResult<()> {
            x.fill(0.0);
            Ok(())
        }
        fn variable_bounds(&self, lower: &mut [f64], upper: &mut [f64]) -> GpnetResult<()> {
            lower.copy_from_slice(&[-10.0, -10.0]);
            upper.copy_from_slice(&[10.0, 0.25]);
            Ok(())
        }
        fn constraint_bounds(&self, lower: &mut [f64], upper: &mut [f64]) -> GpnetResult<()> {
            if self.rows_infeasible {
                lower[0] = 30.0;
                upper[0] = 40.0;
            } else {
                lower[0] = -1e20;
                upper[0] = 2.0;
            }
            Ok(())
        }
        fn new_x(&mut self) {}
        fn objective(&mut self, x: &[f64]) -> GpnetResult<f64> {
            if self.breaks_after_start && x.iter().any(|v| *v != 0.0) {
                return Err(NumericalProblem::new(NumericalProblemKind::SingularJacobian, 3, 0.0)
                    .with_step(2)
                    .into());
            }
            Ok((x[0] - 2.0).powi(2) + (x[1] - 1.0).powi(2))
        }
        fn objective_gradient(&mut self, x: &[f64], gradient: &mut [f64]) -> GpnetResult<()> {
            gradient[0] = 2.0 * (x[0] - 2.0);
            gradient[1] = 2.0 * (x[1] - 1.0);
            Ok(())
        }
        fn constraints(&mut self, x: &[f64], values: &mut [f64]) -> GpnetResult<()> {
            values[0] = x[0] + x[1];
            Ok(())
        }
        fn jacobian_indices(&self, rows: &mut [usize], cols: &mut [usize]) -> GpnetResult<()> {
            rows.copy_from_slice(&[0, 0]);
            cols.copy_from_slice(&[0, 1]);
            Ok(())
        }
        fn jacobian_values(&mut self, _x: &[f64], values: &mut [f64]) -> GpnetResult<()> {
            values.fill(1.0);
            Ok(())
        }
        fn state_trajectory(&mut self, _x: &[f64]) -> GpnetResult<InterpolatingVector> {
            InterpolatingVector::new(vec![0.0], 0)
        }
        fn control_trajectory(&self, x: &[f64]) -> GpnetResult<InterpolatingVector> {
            InterpolatingVector::from_parts(vec![0.0], 2, x.to_vec())
        }
    }

    #[test]
    fn finds_the_bounded_minimum() {
        let mut problem = Quadratic::default();
        let solver = PenaltyLbfgsSolver::new(PenaltyConfig::default().with_max_iterations(1000));
        let solution = solver.solve(&mut problem).unwrap();
        // x1 sits on its bound, x0 on the row bound.
        assert!((solution.decision[1] - 0.25).abs() < 1e-4, "{:?}", solution.decision);
        assert!((solution.decision[0] - 1.75).abs() < 1e-4, "{:?}", solution.decision);
        assert!(solution.constraints[0] <= 2.0 + 1e-5);
    }

    #[test]
    fn reports_infeasibility() {
        let mut problem = Quadratic {
            rows_infeasible: true,
            ..Quadratic::default()
        };
        let err = PenaltyLbfgsSolver::default().solve(&mut problem).unwrap_err();
        match err {
            GpnetError::Numerical(problem) => {
                assert_eq!(problem.kind, NumericalProblemKind::Infeasible);
                assert!(problem.magnitude > 1.0);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn penalty_gradient_matches_finite_differences() {
        let mut quadratic = Quadratic::default();
        let frame = Frame::of(&quadratic).unwrap();
        let optimizer: &mut dyn Optimizer = &mut quadratic;
        let cell = RefCell::new(optimizer);
        let problem = PenaltyProblem {
            optimizer: &cell,
            frame: &frame,
            penalty: 100.0,
        };
        let x = vec![3.0, 0.5];
        let gradient = problem.gradient(&x).unwrap();
        for j in 0..2 {
            let mut plus = x.clone();
            let mut minus = x.clone();
            plus[j] += 1e-6;
            minus[j] -= 1e-6;
            let fd = (problem.cost(&plus).unwrap() - problem.cost(&minus).unwrap()) / 2e-6;
            assert!((gradient[j] - fd).abs() < 1e-3, "component {j}");
        }
    }

    #[test]
    fn model_failures_are_not_retried() {
        let mut problem = Quadratic {
            breaks_after_start: true,
            ..Quadratic::default()
        };
        let err = PenaltyLbfgsSolver::default().solve(&mut problem).unwrap_err();
        match err {
            GpnetError::Numerical(problem) => {
                assert_eq!(problem.kind, NumericalProblemKind::SingularJacobian);
                assert_eq!(problem.step, Some(2));
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
