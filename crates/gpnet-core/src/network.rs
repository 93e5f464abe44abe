//! Network topology storage.
//!
//! [`Network`] owns every node and edge payload together with its [`IdObject`].
//! Insertion validates ids up front, so a network that was built successfully
//! never contains dangling endpoint references. There is no deletion: indices
//! handed out by `add_node`/`add_edge` stay valid for the lifetime of the
//! network.

use crate::{ComponentId, ConstructionError, GpnetResult, IdObject};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

/// A node together with its ordered incident-edge lists.
#[derive(Debug, Clone)]
pub struct NodeEntry<N> {
    pub object: IdObject,
    pub payload: N,
    starting: Vec<EdgeIndex>,
    ending: Vec<EdgeIndex>,
}

impl<N> NodeEntry<N> {
    /// Edges whose `from` endpoint is this node, in insertion order.
    pub fn starting_edges(&self) -> &[EdgeIndex] {
        &self.starting
    }

    /// Edges whose `to` endpoint is this node, in insertion order.
    pub fn ending_edges(&self) -> &[EdgeIndex] {
        &self.ending
    }
}

/// An edge with its ordered endpoint pair.
#[derive(Debug, Clone)]
pub struct EdgeEntry<E> {
    pub object: IdObject,
    pub payload: E,
    pub from: ComponentId,
    pub to: ComponentId,
}

/// Result of an id lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Node(NodeIndex),
    Edge(EdgeIndex),
}

/// Directed network of node payloads `N` and edge payloads `E`.
#[derive(Debug, Clone)]
pub struct Network<N, E> {
    graph: DiGraph<NodeEntry<N>, EdgeEntry<E>>,
    ids: HashMap<ComponentId, Element>,
}

impl<N, E> Default for Network<N, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N, E> Network<N, E> {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            ids: HashMap::new(),
        }
    }

    pub fn add_node(&mut self, object: IdObject, payload: N) -> GpnetResult<NodeIndex> {
        if self.ids.contains_key(&object.id) {
            return Err(ConstructionError::DuplicateId(object.id).into());
        }
        let id = object.id;
        let index = self.graph.add_node(NodeEntry {
            object,
            payload,
            starting: Vec::new(),
            ending: Vec::new(),
        });
        self.ids.insert(id, Element::Node(index));
        Ok(index)
    }

    /// Insert an edge between two existing nodes.
    ///
    /// Both endpoints are resolved before anything is inserted, so a failed
    /// call leaves the network untouched.
    pub fn add_edge(
        &mut self,
        object: IdObject,
        from: ComponentId,
        to: ComponentId,
        payload: E,
    ) -> GpnetResult<EdgeIndex> {
        if self.ids.contains_key(&object.id) {
            return Err(ConstructionError::DuplicateId(object.id).into());
        }
        let from_index = self.resolve_node(object.id, from)?;
        let to_index = self.resolve_node(object.id, to)?;

        let id = object.id;
        let index = self.graph.add_edge(
            from_index,
            to_index,
            EdgeEntry {
                object,
                payload,
                from,
                to,
            },
        );
        self.graph[from_index].starting.push(index);
        self.graph[to_index].ending.push(index);
        self.ids.insert(id, Element::Edge(index));
        Ok(index)
    }

    fn resolve_node(&self, id: ComponentId, reference: ComponentId) -> GpnetResult<NodeIndex> {
        match self.ids.get(&reference) {
            Some(Element::Node(index)) => Ok(*index),
            _ => Err(ConstructionError::DanglingReference { id, reference }.into()),
        }
    }

    pub fn lookup(&self, id: ComponentId) -> Option<Element> {
        self.ids.get(&id).copied()
    }

    pub fn node_index(&self, id: ComponentId) -> Option<NodeIndex> {
        match self.lookup(id)? {
            Element::Node(index) => Some(index),
            Element::Edge(_) => None,
        }
    }

    pub fn edge_index(&self, id: ComponentId) -> Option<EdgeIndex> {
        match self.lookup(id)? {
            Element::Edge(index) => Some(index),
            Element::Node(_) => None,
        }
    }

    pub fn node(&self, index: NodeIndex) -> &NodeEntry<N> {
        &self.graph[index]
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut NodeEntry<N> {
        &mut self.graph[index]
    }

    pub fn edge(&self, index: EdgeIndex) -> &EdgeEntry<E> {
        &self.graph[index]
    }

    pub fn edge_mut(&mut self, index: EdgeIndex) -> &mut EdgeEntry<E> {
        &mut self.graph[index]
    }

    /// `(from, to)` node indices of an edge.
    pub fn endpoints(&self, index: EdgeIndex) -> Option<(NodeIndex, NodeIndex)> {
        self.graph.edge_endpoints(index)
    }

    /// Node indices in insertion order.
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Edge indices in insertion order.
    pub fn edge_indices(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.graph.edge_indices()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeEntry<N>> + '_ {
        self.graph.node_weights()
    }

    pub fn edges(&self) -> impl Iterator<Item = &EdgeEntry<E>> + '_ {
        self.graph.edge_weights()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut NodeEntry<N>> + '_ {
        self.graph.node_weights_mut()
    }

    pub fn edges_mut(&mut self) -> impl Iterator<Item = &mut EdgeEntry<E>> + '_ {
        self.graph.edge_weights_mut()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node ids adjacent to `index` over any incident edge, without duplicates.
    pub fn neighbours(&self, index: NodeIndex) -> Vec<ComponentId> {
        let mut out: Vec<ComponentId> = self
            .graph
            .edges_directed(index, petgraph::Direction::Outgoing)
            .map(|e| self.graph[e.target()].object.id)
            .chain(
                self.graph
                    .edges_directed(index, petgraph::Direction::Incoming)
                    .map(|e| self.graph[e.source()].object.id),
            )
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Number of weakly connected components.
    pub fn connected_component_count(&self) -> usize {
        petgraph::algo::connected_components(&self.graph)
    }
}
