//! Unified error types for network construction, simulation and optimization
//!
//! [`GpnetError`] is returned by every fallible operation in the workspace.
//! Domain-specific errors convert into it with `?`.
//!
//! # Example
//!
//! ```ignore
//! use gpnet_core::{GpnetError, GpnetResult};
//!
//! fn run(records: &[ComponentRecord]) -> GpnetResult<()> {
//!     let mut problem = NetworkProblem::build(&factory, records)?;
//!     evolver.simulate(&initial, &controls, &mut problem, &mut states)?;
//!     Ok(())
//! }
//! ```

use crate::ComponentId;
use thiserror::Error;

/// Unified error type for all gpnet operations.
#[derive(Error, Debug)]
pub enum GpnetError {
    /// Network could not be assembled from its records
    #[error("Construction error: {0}")]
    Construction(#[from] ConstructionError),

    /// Newton solve or NLP solve broke down
    #[error("Numerical problem: {0}")]
    Numerical(#[from] NumericalProblem),

    /// Cache key collided without the underlying input matching.
    ///
    /// This signals a defect, not a recoverable condition.
    #[error("Cache inconsistency: {0}")]
    CacheInconsistency(String),

    /// Shape or consistency check on caller supplied data failed
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Convenience type alias for Results using GpnetError.
pub type GpnetResult<T> = Result<T, GpnetError>;

impl From<String> for GpnetError {
    fn from(s: String) -> Self {
        GpnetError::Validation(s)
    }
}

impl From<&str> for GpnetError {
    fn from(s: &str) -> Self {
        GpnetError::Validation(s.to_string())
    }
}

/// Errors raised while building a network from declarative records.
#[derive(Error, Debug)]
pub enum ConstructionError {
    #[error("component {id}: unknown type tag '{type_tag}'")]
    UnknownType { id: ComponentId, type_tag: String },

    #[error("component id {0} is used more than once")]
    DuplicateId(ComponentId),

    #[error("component {id} references non-existent component {reference}")]
    DanglingReference {
        id: ComponentId,
        reference: ComponentId,
    },

    #[error("component {id}: invalid parameters: {source}")]
    InvalidParameters {
        id: ComponentId,
        #[source]
        source: anyhow::Error,
    },
}

/// What went wrong numerically.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericalProblemKind {
    /// Linear correction could not be computed
    SingularJacobian,
    /// Newton ran out of iterations without meeting the tolerance
    IterationBudgetExhausted,
    /// Residual norm became non-finite
    Diverged,
    /// Damped step length fell below the admissible minimum
    MinimalStepsize,
    /// NLP solver reported an infeasible problem
    Infeasible,
    /// NLP solver failed in its restoration phase
    RestorationFailed,
    /// Any other solver-reported failure
    SolverFailure(String),
    /// A callback could not evaluate the model at the requested point
    EvaluationFailed,
}

impl std::fmt::Display for NumericalProblemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SingularJacobian => write!(f, "singular Jacobian"),
            Self::IterationBudgetExhausted => write!(f, "iteration budget exhausted"),
            Self::Diverged => write!(f, "diverged"),
            Self::MinimalStepsize => write!(f, "minimal stepsize reached"),
            Self::Infeasible => write!(f, "infeasible problem"),
            Self::RestorationFailed => write!(f, "restoration failed"),
            Self::SolverFailure(msg) => write!(f, "solver failure: {msg}"),
            Self::EvaluationFailed => write!(f, "evaluation failed"),
        }
    }
}

/// Numerical breakdown with enough context to locate it.
///
/// `magnitude` is the residual norm (Newton) or the constraint violation
/// (NLP) at the point of failure.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} at step {} after {iteration} iterations (magnitude {magnitude:e})", .step.map_or_else(|| "-".to_string(), |s| s.to_string()))]
pub struct NumericalProblem {
    pub kind: NumericalProblemKind,
    pub step: Option<usize>,
    pub iteration: usize,
    pub magnitude: f64,
}

impl NumericalProblem {
    pub fn new(kind: NumericalProblemKind, iteration: usize, magnitude: f64) -> Self {
        Self {
            kind,
            step: None,
            iteration,
            magnitude,
        }
    }

    /// Attach the time-step index at which the problem occurred.
    pub fn with_step(mut self, step: usize) -> Self {
        self.step = Some(step);
        self
    }
}

impl GpnetError {
    /// Tag a numerical problem with its time step; other errors pass through.
    pub fn at_step(self, step: usize) -> Self {
        match self {
            GpnetError::Numerical(problem) => GpnetError::Numerical(problem.with_step(step)),
            other => other,
        }
    }

    pub fn is_numerical(&self) -> bool {
        matches!(self, GpnetError::Numerical(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numerical_problem_carries_step() {
        let err: GpnetError =
            NumericalProblem::new(NumericalProblemKind::SingularJacobian, 3, 1.5).into();
        match err.at_step(7) {
            GpnetError::Numerical(p) => {
                assert_eq!(p.step, Some(7));
                assert_eq!(p.iteration, 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn display_mentions_kind_and_step() {
        let p = NumericalProblem::new(NumericalProblemKind::Diverged, 2, f64::INFINITY).with_step(1);
        let text = p.to_string();
        assert!(text.contains("diverged"), "{text}");
        assert!(text.contains("step 1"), "{text}");
    }

    #[test]
    fn construction_error_converts() {
        let err: GpnetError = ConstructionError::DuplicateId(ComponentId::new(4)).into();
        assert!(matches!(
            err,
            GpnetError::Construction(ConstructionError::DuplicateId(_))
        ));
    }
}
