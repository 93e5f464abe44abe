//! IPOPT backend.
//!
//! Forwards the [`Optimizer`] callbacks to IPOPT's C interface. Second
//! derivatives are never formed; IPOPT runs with its limited-memory
//! Hessian approximation.

use super::{NlpSolution, NlpStatus, Optimizer};
use gpnet_core::{GpnetError, GpnetResult, NumericalProblem, NumericalProblemKind};
use ipopt::{BasicProblem, ConstrainedProblem, Index, Ipopt, Number, SolveStatus};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpoptConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// IPOPT console verbosity, 0 to 12.
    pub print_level: i32,
}

impl Default for IpoptConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-6,
            print_level: 0,
        }
    }
}

/// Presents an [`Optimizer`] as an IPOPT problem.
///
/// IPOPT callbacks take `&self`; the optimizer memoizes through `&mut self`,
/// hence the `RefCell`.
pub struct IpoptAdaptor<'a, 'o> {
    optimizer: &'a RefCell<&'o mut dyn Optimizer>,
    gradient_evaluations: Cell<usize>,
}

impl<'a, 'o> IpoptAdaptor<'a, 'o> {
    pub fn new(optimizer: &'a RefCell<&'o mut dyn Optimizer>) -> Self {
        Self {
            optimizer,
            gradient_evaluations: Cell::new(0),
        }
    }

    /// Objective gradient callbacks so far. IPOPT asks for roughly one
    /// gradient per iteration, so this follows its iteration count without
    /// being equal to it.
    pub fn gradient_evaluations(&self) -> usize {
        self.gradient_evaluations.get()
    }

    /// Run a callback, turning a failure into IPOPT's `false`.
    fn call(&self, what: &str, new_x: bool, f: impl FnOnce(&mut dyn Optimizer) -> GpnetResult<()>) -> bool {
        let mut optimizer = self.optimizer.borrow_mut();
        if new_x {
            optimizer.new_x();
        }
        match f(&mut **optimizer) {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, callback = what, "evaluation failed");
                false
            }
        }
    }
}

fn to_index(value: usize) -> Index {
    value as Index
}

impl BasicProblem for IpoptAdaptor<'_, '_> {
    fn num_variables(&self) -> usize {
        self.optimizer.borrow().variable_count()
    }

    fn bounds(&self, x_l: &mut [Number], x_u: &mut [Number]) -> bool {
        self.call("bounds", false, |o| o.variable_bounds(x_l, x_u))
    }

    fn initial_point(&self, x: &mut [Number]) -> bool {
        self.call("initial_point", false, |o| o.initial_point(x))
    }

    fn objective(&self, x: &[Number], new_x: bool, obj: &mut Number) -> bool {
        self.call("objective", new_x, |o| {
            *obj = o.objective(x)?;
            Ok(())
        })
    }

    fn objective_grad(&self, x: &[Number], new_x: bool, grad_f: &mut [Number]) -> bool {
        self.gradient_evaluations.set(self.gradient_evaluations.get() + 1);
        self.call("objective_grad", new_x, |o| o.objective_gradient(x, grad_f))
    }
}

impl ConstrainedProblem for IpoptAdaptor<'_, '_> {
    fn num_constraints(&self) -> usize {
        self.optimizer.borrow().constraint_count()
    }

    fn num_constraint_jacobian_non_zeros(&self) -> usize {
        self.optimizer.borrow().jacobian_nnz()
    }

    fn constraint_bounds(&self, g_l: &mut [Number], g_u: &mut [Number]) -> bool {
        self.call("constraint_bounds", false, |o| o.constraint_bounds(g_l, g_u))
    }

    fn constraint(&self, x: &[Number], new_x: bool, g: &mut [Number]) -> bool {
        self.call("constraint", new_x, |o| o.constraints(x, g))
    }

    fn constraint_jacobian_indices(&self, irow: &mut [Index], jcol: &mut [Index]) -> bool {
        self.call("constraint_jacobian_indices", false, |o| {
            let nnz = o.jacobian_nnz();
            let (mut rows, mut cols) = (vec![0; nnz], vec![0; nnz]);
            o.jacobian_indices(&mut rows, &mut cols)?;
            for (k, (r, c)) in rows.into_iter().zip(cols).enumerate() {
                irow[k] = to_index(r);
                jcol[k] = to_index(c);
            }
            Ok(())
        })
    }

    fn constraint_jacobian_values(&self, x: &[Number], new_x: bool, vals: &mut [Number]) -> bool {
        self.call("constraint_jacobian_values", new_x, |o| o.jacobian_values(x, vals))
    }

    // Limited-memory approximation: no exact Hessian entries.
    fn num_hessian_non_zeros(&self) -> usize {
        0
    }

    fn hessian_indices(&self, _irow: &mut [Index], _jcol: &mut [Index]) -> bool {
        true
    }

    fn hessian_values(
        &self,
        _x: &[Number],
        _new_x: bool,
        _obj_factor: Number,
        _lambda: &[Number],
        _vals: &mut [Number],
    ) -> bool {
        true
    }
}

fn failure(kind: NumericalProblemKind, gradient_evaluations: usize) -> GpnetError {
    NumericalProblem::new(kind, gradient_evaluations, f64::NAN).into()
}

/// Solve with IPOPT. Infeasibility and failed restoration are reported as
/// numerical problems; no retry is attempted.
///
/// The returned [`NlpSolution::iterations`] counts objective gradient
/// evaluations, not IPOPT iterations.
pub fn solve_with_ipopt(optimizer: &mut dyn Optimizer, config: &IpoptConfig) -> GpnetResult<NlpSolution> {
    let cell = RefCell::new(optimizer);
    let adaptor = IpoptAdaptor::new(&cell);
    let mut solver = Ipopt::new(adaptor).map_err(|e| {
        failure(
            NumericalProblemKind::SolverFailure(format!("IPOPT setup failed: {e:?}")),
            0,
        )
    })?;
    solver.set_option("max_iter", config.max_iterations as i32);
    solver.set_option("tol", config.tolerance);
    solver.set_option("print_level", config.print_level);
    solver.set_option("sb", "yes");
    solver.set_option("hessian_approximation", "limited-memory");

    let (status, objective, decision, constraints) = {
        let result = solver.solve();
        (
            result.status,
            result.objective_value,
            result.solver_data.solution.primal_variables.to_vec(),
            result.constraint_values.to_vec(),
        )
    };
    let gradient_evaluations = solver.solver_data().problem.gradient_evaluations();

    let status = match status {
        SolveStatus::SolveSucceeded => NlpStatus::Optimal,
        SolveStatus::SolvedToAcceptableLevel => NlpStatus::Acceptable,
        SolveStatus::MaximumIterationsExceeded => NlpStatus::IterationLimit,
        SolveStatus::InfeasibleProblemDetected => {
            return Err(failure(NumericalProblemKind::Infeasible, gradient_evaluations))
        }
        SolveStatus::RestorationFailed => {
            return Err(failure(NumericalProblemKind::RestorationFailed, gradient_evaluations))
        }
        SolveStatus::DivergingIterates => {
            return Err(failure(NumericalProblemKind::Diverged, gradient_evaluations))
        }
        other => {
            return Err(failure(
                NumericalProblemKind::SolverFailure(format!("{other:?}")),
                gradient_evaluations,
            ))
        }
    };
    info!(?status, objective, gradient_evaluations, "IPOPT solve finished");
    Ok(NlpSolution {
        status,
        objective,
        decision,
        constraints,
        iterations: gradient_evaluations,
    })
}

/// Backend handle mirroring [`PenaltyLbfgsSolver`](super::PenaltyLbfgsSolver).
#[derive(Debug, Clone, Default)]
pub struct IpoptSolver {
    config: IpoptConfig,
}

impl IpoptSolver {
    pub fn new(config: IpoptConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IpoptConfig {
        &self.config
    }

    pub fn solve(&self, optimizer: &mut dyn Optimizer) -> GpnetResult<NlpSolution> {
        solve_with_ipopt(optimizer, &self.config)
    }
}
