//! # gpnet-algo: Simulation and Optimal Control of Gas/Power Networks
//!
//! Turns a declarative network description into a system of implicit
//! time-step equations, simulates it forward with Newton's method and
//! optimizes its controls over a time horizon.
//!
//! ## Pipeline
//!
//! | Stage | Module | Entry point |
//! |-------|--------|-------------|
//! | records to components | [`factory`] | [`ComponentFactory::build`] |
//! | index allocation and linking | [`problem`] | [`NetworkProblem::new`] |
//! | one time step | [`newton`] | [`NewtonSolver::solve`] |
//! | forward simulation | [`evolver`] | [`TimeEvolver::simulate`] |
//! | optimal control | [`optim`] | [`ReducedOptimizer`], [`ImplicitOptimizer`] |
//!
//! ## Components
//!
//! Gas: `Source`, `Sink`, `Innode`, `ConstraintSink`, `Pipe`, `Shortpipe`,
//! `Controlvalve`, `Compressorstation`. Power: `Vphinode`, `PQnode`, `PVnode`,
//! `Transmissionline`. Coupling: `Gaspowerconnection`, a gas-fired plant
//! from a gas node to a power bus. See [`model`] for the capability traits
//! every component declares a subset of.
//!
//! ## Sparse Assembly
//!
//! Jacobians are written coefficient by coefficient through
//! [`sparse::MatrixHandler`]. The first assembly records a pattern with the
//! triplet backend; later ones refresh values in place through the reference
//! backend. [`sparse::OffsetHandler`] places a component's block inside a
//! larger matrix.
//!
//! ## Solvers
//!
//! The penalty/L-BFGS backend ([`optim::PenaltyLbfgsSolver`], argmin) is always
//! available. IPOPT is behind the `solver-ipopt` feature and needs a native
//! `libipopt`.
//!
//! ## Logging
//!
//! All diagnostics go through `tracing`. Install any subscriber to see them,
//! for example `tracing_subscriber::fmt().with_env_filter("gpnet_algo=debug")`.

pub mod cache;
pub mod evolver;
pub mod factory;
pub mod linear;
pub mod model;
pub mod newton;
pub mod optim;
pub mod problem;
pub mod sparse;

pub use cache::{ConstraintJacobian, ControlStateCache, EquationDerivativeCache, StateCache};
pub use evolver::{initial_state, TimeEvolver};
pub use factory::{ComponentFactory, ComponentKind, ComponentNetwork, ComponentRecord};
pub use linear::{DenseLu, LinearSolveError};
pub use model::{Component, PointContext, StepContext};
pub use newton::{NewtonConfig, NewtonReport, NewtonSolver, NonlinearSystem, ResidualNorm};
pub use optim::{
    ImplicitOptimizer, NlpSolution, NlpStatus, Optimizer, PenaltyConfig, PenaltyLbfgsSolver,
    ReducedOptimizer, TimeGrids,
};
pub use problem::{IndexRange, NetworkProblem, OptimizableProblem};
