//! # Cache Layer
//!
//! Keeps repeated NLP callback evaluations cheap:
//!
//! - [`EquationDerivativeCache`]: step Jacobians keyed by the step inputs.
//! - [`ControlStateCache`]: Newton-solved state trajectories with per-step
//!   invalidation (see [`StateCache`]).
//! - [`ConstraintJacobian`]: constraint Jacobian with a pattern fixed once from
//!   the time grids, refreshed by value only.
//!
//! Every cache entry is tagged with a [`Fingerprint`] of exactly the input
//! that determines it. An entry is returned only if its fingerprint matches
//! the current input bit for bit.

pub mod derivative;
pub mod fingerprint;
pub mod jacobian;
pub mod state;

pub use derivative::{EquationDerivativeCache, StepDerivatives};
pub use fingerprint::{Fingerprint, FingerprintHasher};
pub use jacobian::{ConstraintJacobian, ConstraintJacobianLayout, MappedConstraintJacobian};
pub use state::{ControlStateCache, StateCache};
