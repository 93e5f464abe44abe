//! # gpnet-core: Network Topology and Time Series Core
//!
//! Provides the foundational data structures for simulating and optimizing
//! coupled gas/power transport networks.
//!
//! ## Design Philosophy
//!
//! Networks are modeled as **directed graphs** where every node and every edge
//! carries an [`IdObject`] drawn from one shared id space:
//! - **Nodes**: junctions, sources, sinks, buses
//! - **Edges**: pipes, valves, compressors, transmission lines
//!
//! Topology is built once and never mutated afterwards. Each node keeps ordered
//! lists of the edges that start and end at it, so physical components can rely
//! on a stable attachment order when they write their balance equations.
//!
//! ## Quick Start
//!
//! ```rust
//! use gpnet_core::{ComponentId, IdObject, Network};
//!
//! let mut network: Network<&str, &str> = Network::new();
//! network.add_node(IdObject::new(ComponentId::new(1), "source"), "node").unwrap();
//! network.add_node(IdObject::new(ComponentId::new(2), "sink"), "node").unwrap();
//! network
//!     .add_edge(
//!         IdObject::new(ComponentId::new(3), "pipe"),
//!         ComponentId::new(1),
//!         ComponentId::new(2),
//!         "edge",
//!     )
//!     .unwrap();
//! assert_eq!(network.node_count(), 2);
//! ```
//!
//! ## Core Data Structures
//!
//! - [`Network`] - Topology container backed by petgraph `DiGraph`
//! - [`InterpolatingVector`] - Time-indexed value blocks with linear interpolation
//! - [`InterpolatingView`] / [`InterpolatingViewMut`] - Borrowed views over external storage
//! - [`TimeData`] - Uniform time grid derived from a start, end and desired step
//!
//! ## Errors
//!
//! All fallible operations return [`GpnetResult`]. Construction problems are
//! reported through [`ConstructionError`], numerical breakdowns through
//! [`NumericalProblem`].

use serde::{Deserialize, Serialize};

pub mod error;
pub mod interpolating;
pub mod network;
pub mod time;

pub use error::{
    ConstructionError, GpnetError, GpnetResult, NumericalProblem, NumericalProblemKind,
};
pub use interpolating::{
    have_same_structure, Interpolating, InterpolatingMut, InterpolatingVector, InterpolatingView,
    InterpolatingViewMut, TimedValues,
};
pub use network::{EdgeEntry, Element, Network, NodeEntry};
pub use petgraph::graph::{EdgeIndex, NodeIndex};
pub use time::TimeData;

/// Identifier shared by nodes and edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(usize);

impl ComponentId {
    #[inline]
    pub fn new(value: usize) -> Self {
        ComponentId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id and human readable name of a node or edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdObject {
    pub id: ComponentId,
    pub name: String,
}

impl IdObject {
    pub fn new(id: ComponentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}
