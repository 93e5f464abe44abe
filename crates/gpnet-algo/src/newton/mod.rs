//! # Newton Solver
//!
//! Solves one algebraic system `F(x) = 0` per call. Each iteration:
//!
//! 1. assembles the Jacobian `J(x)` through the sparse assembly layer,
//! 2. solves `J Δ = -F(x)` with a dense LU factorization,
//! 3. hands `Δ` to the configured [`StepPolicy`] (full step by default),
//! 4. recomputes the residual norm and checks it against the tolerance.
//!
//! ```text
//!               ┌──────────── norm > tol ────────────┐
//!               ▼                                    │
//!  start ──► Iterating ──► norm ≤ tol ──► Converged  │
//!               │  └─────────────────────────────────┘
//!               ├── non-finite norm ──► Diverged
//!               └── budget spent ─────► MaxIterationsReached
//! ```
//!
//! Failures are reported as [`NumericalProblem`] and never retried here; step
//! size reduction across time steps is a caller decision.
//!
//! The first Jacobian of a solver instance is assembled with the triplet
//! backend. Its pattern is kept and later Jacobians go through the reference
//! backend. Should a later evaluation write outside that pattern, the solver
//! falls back to a fresh triplet pass.

pub mod policy;

pub use policy::{DeuflhardDamping, FullStep, StepPolicy, MINIMAL_STEPSIZE};

use crate::linear::{DenseLu, LinearSolveError};
use crate::sparse::{MatrixHandler, ReferenceHandler, TripletHandler, WriteSequence};
use gpnet_core::{GpnetError, GpnetResult, NumericalProblem, NumericalProblemKind};
use serde::{Deserialize, Serialize};
use sprs::CsMat;
use tracing::{debug, trace};

/// A square nonlinear system the Newton solver can drive to zero.
pub trait NonlinearSystem {
    fn size(&self) -> usize;

    fn residual(&mut self, x: &[f64], out: &mut [f64]) -> GpnetResult<()>;

    /// Write `dF/dx` at `x` into `handler`. Must not call `set_matrix`.
    fn jacobian(&mut self, x: &[f64], handler: &mut dyn MatrixHandler) -> GpnetResult<()>;
}

/// Norm used for the convergence test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResidualNorm {
    #[default]
    Infinity,
    Euclidean,
    One,
}

impl ResidualNorm {
    pub fn apply(&self, v: &[f64]) -> f64 {
        match self {
            ResidualNorm::Infinity => v.iter().fold(0.0f64, |acc, x| acc.max(x.abs())),
            ResidualNorm::Euclidean => v.iter().map(|x| x * x).sum::<f64>().sqrt(),
            ResidualNorm::One => v.iter().map(|x| x.abs()).sum(),
        }
    }
}

/// Newton solver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    pub tolerance: f64,
    pub max_iterations: usize,
    pub norm: ResidualNorm,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            max_iterations: 50,
            norm: ResidualNorm::Infinity,
        }
    }
}

impl NewtonConfig {
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_norm(mut self, norm: ResidualNorm) -> Self {
        self.norm = norm;
        self
    }
}

/// Solver state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewtonState {
    Iterating,
    Converged,
    Diverged,
    MaxIterationsReached,
}

/// Outcome of a converged solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonReport {
    pub iterations: usize,
    pub residual_norm: f64,
}

/// Newton solver with a pluggable step policy.
pub struct NewtonSolver {
    config: NewtonConfig,
    policy: Box<dyn StepPolicy>,
    pattern: Option<(CsMat<f64>, WriteSequence)>,
}

impl std::fmt::Debug for NewtonSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewtonSolver")
            .field("config", &self.config)
            .field("policy", &self.policy.name())
            .field("has_pattern", &self.pattern.is_some())
            .finish()
    }
}

impl Default for NewtonSolver {
    fn default() -> Self {
        Self::new(NewtonConfig::default())
    }
}

impl NewtonSolver {
    pub fn new(config: NewtonConfig) -> Self {
        Self {
            config,
            policy: Box::new(FullStep),
            pattern: None,
        }
    }

    pub fn with_policy(mut self, policy: impl StepPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn config(&self) -> &NewtonConfig {
        &self.config
    }

    /// Assemble `J(x)`, reusing the stored pattern when it fits.
    fn assemble_jacobian(
        &mut self,
        system: &mut dyn NonlinearSystem,
        x: &[f64],
    ) -> GpnetResult<&CsMat<f64>> {
        let n = system.size();
        let reusable = matches!(&self.pattern, Some((m, _)) if m.shape() == (n, n));
        if reusable {
            if let Some((matrix, sequence)) = self.pattern.as_mut() {
                let mut handler = ReferenceHandler::new(matrix, sequence);
                system.jacobian(x, &mut handler)?;
                if handler.set_matrix().is_ok() {
                    trace!("jacobian assembled through reference backend");
                } else {
                    debug!("jacobian pattern changed, reassembling from triplets");
                    self.pattern = None;
                }
            }
        } else {
            self.pattern = None;
        }

        if self.pattern.is_none() {
            let mut handler = TripletHandler::new(n, n);
            system.jacobian(x, &mut handler)?;
            self.pattern = Some(handler.into_parts()?);
        }
        match &self.pattern {
            Some((matrix, _)) => Ok(matrix),
            None => Err(GpnetError::Validation("jacobian was not assembled".to_string())),
        }
    }

    /// Drive `system` to zero starting from `x`; `x` holds the root on success.
    pub fn solve(
        &mut self,
        system: &mut dyn NonlinearSystem,
        x: &mut [f64],
    ) -> GpnetResult<NewtonReport> {
        let n = system.size();
        if x.len() != n {
            return Err(GpnetError::Validation(format!(
                "initial guess has length {}, system has {} unknowns",
                x.len(),
                n
            )));
        }

        let mut residual = vec![0.0; n];
        system.residual(x, &mut residual)?;
        let mut norm = self.config.norm.apply(&residual);
        let mut iteration = 0;
        let mut state = Self::classify(norm, self.config.tolerance);

        while state == NewtonState::Iterating {
            if iteration >= self.config.max_iterations {
                state = NewtonState::MaxIterationsReached;
                break;
            }
            iteration += 1;

            let jacobian = self.assemble_jacobian(system, x)?;
            let lu = DenseLu::factorize(jacobian).map_err(|e| singular(e, iteration, norm))?;
            let rhs: Vec<f64> = residual.iter().map(|r| -r).collect();
            let delta = lu.solve(&rhs).map_err(|e| singular(e, iteration, norm))?;

            let step = self.policy.accept(system, &lu, x, &delta, iteration)?;
            system.residual(x, &mut residual)?;
            norm = self.config.norm.apply(&residual);
            debug!(iteration, residual = norm, step, "newton iteration");
            state = Self::classify(norm, self.config.tolerance);
        }

        match state {
            NewtonState::Converged => Ok(NewtonReport {
                iterations: iteration,
                residual_norm: norm,
            }),
            NewtonState::Diverged => {
                Err(NumericalProblem::new(NumericalProblemKind::Diverged, iteration, norm).into())
            }
            _ => Err(NumericalProblem::new(
                NumericalProblemKind::IterationBudgetExhausted,
                iteration,
                norm,
            )
            .into()),
        }
    }

    fn classify(norm: f64, tolerance: f64) -> NewtonState {
        if !norm.is_finite() {
            NewtonState::Diverged
        } else if norm <= tolerance {
            NewtonState::Converged
        } else {
            NewtonState::Iterating
        }
    }
}

fn singular(error: LinearSolveError, iteration: usize, norm: f64) -> GpnetError {
    debug!(%error, iteration, "linear correction failed");
    NumericalProblem::new(NumericalProblemKind::SingularJacobian, iteration, norm).into()
}
