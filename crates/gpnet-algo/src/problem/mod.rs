//! # Network Problem
//!
//! Owns the component network and the global index tables. Construction runs
//! three passes:
//!
//! 1. **Allocation**: every component reserves its equation, state, control
//!    and constraint slots. Nodes go first, then edges, each in insertion order,
//!    so each segment is partitioned into contiguous ranges covering
//!    `[0, total)`.
//! 2. **Linking**: each node receives [`Attachments`] describing its incident
//!    gas edge ends and power lines. They are collected from an immutable view
//!    of the network first and applied afterwards.
//! 3. **Checks**: a disconnected network is accepted with a warning.
//!
//! The aggregate operations of [`OptimizableProblem`] dispatch to every
//! component that declares the relevant capability.

pub mod index;

pub use index::{IndexAllocator, IndexRange};

use crate::factory::{ComponentFactory, ComponentNetwork, ComponentRecord};
use crate::model::{
    Attachments, Component, EdgeEnd, GasAttachment, PointContext, PowerAttachment, StateValue,
    StepContext,
};
use crate::sparse::MatrixHandler;
use gpnet_core::{
    ComponentId, Element, GpnetError, GpnetResult, InterpolatingVector, NodeIndex,
};
use serde::{Deserialize, Serialize};

/// Aggregated view of a problem as consumed by simulation and optimization.
///
/// Residual rows and Jacobian rows are global equation indices; columns are
/// global state indices or control indices within one control time point.
/// Constraint rows are indices within one constraint time point.
pub trait OptimizableProblem {
    fn number_of_equations(&self) -> usize;
    fn number_of_states(&self) -> usize;
    fn number_of_controls_per_step(&self) -> usize;
    fn number_of_constraints_per_step(&self) -> usize;

    fn evaluate(&self, residual: &mut [f64], ctx: &StepContext<'_>) -> GpnetResult<()>;
    fn d_evaluate_d_new_state(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &StepContext<'_>,
    ) -> GpnetResult<()>;
    fn d_evaluate_d_last_state(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &StepContext<'_>,
    ) -> GpnetResult<()>;
    fn d_evaluate_d_control(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &StepContext<'_>,
    ) -> GpnetResult<()>;

    fn evaluate_cost(&self, ctx: &PointContext<'_>) -> f64;
    fn d_cost_d_state(&self, gradient: &mut [f64], ctx: &PointContext<'_>);
    fn d_cost_d_control(&self, gradient: &mut [f64], ctx: &PointContext<'_>);

    fn evaluate_constraint(&self, out: &mut [f64], ctx: &PointContext<'_>) -> GpnetResult<()>;
    fn d_constraint_d_state(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &PointContext<'_>,
    ) -> GpnetResult<()>;
    fn d_constraint_d_control(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &PointContext<'_>,
    ) -> GpnetResult<()>;

    fn set_initial_values(&self, state: &mut [f64]) -> GpnetResult<()>;
    fn set_initial_controls(&self, controls: &mut InterpolatingVector) -> GpnetResult<()>;
    fn set_lower_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()>;
    fn set_upper_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()>;
    fn set_constraint_lower_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()>;
    fn set_constraint_upper_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()>;
}

/// Per-component slice of the global index tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComponentRanges {
    pub equations: IndexRange,
    pub states: IndexRange,
    pub controls: IndexRange,
    pub constraints: IndexRange,
}

/// Segment totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProblemCounts {
    pub equations: usize,
    pub states: usize,
    pub controls_per_step: usize,
    pub constraints_per_step: usize,
}

/// Solved values of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentReport {
    pub id: ComponentId,
    pub type_tag: String,
    pub values: Vec<StateValue>,
}

pub struct NetworkProblem {
    network: ComponentNetwork,
    counts: ProblemCounts,
}

impl std::fmt::Debug for NetworkProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkProblem")
            .field("nodes", &self.network.node_count())
            .field("edges", &self.network.edge_count())
            .field("counts", &self.counts)
            .finish()
    }
}

impl NetworkProblem {
    /// Build components with `factory` and set up the problem.
    pub fn from_records(
        factory: &ComponentFactory,
        records: &[ComponentRecord],
    ) -> GpnetResult<Self> {
        Self::new(factory.build(records)?)
    }

    pub fn new(mut network: ComponentNetwork) -> GpnetResult<Self> {
        let counts = allocate(&mut network);
        link(&mut network)?;
        let parts = network.connected_component_count();
        if parts > 1 {
            tracing::warn!(parts, "network is not connected");
        }
        tracing::debug!(
            equations = counts.equations,
            states = counts.states,
            controls = counts.controls_per_step,
            constraints = counts.constraints_per_step,
            "problem set up"
        );
        Ok(Self { network, counts })
    }

    pub fn network(&self) -> &ComponentNetwork {
        &self.network
    }

    pub fn counts(&self) -> ProblemCounts {
        self.counts
    }

    pub fn component(&self, id: ComponentId) -> Option<&dyn Component> {
        match self.network.lookup(id)? {
            Element::Node(index) => Some(&*self.network.node(index).payload),
            Element::Edge(index) => Some(&*self.network.edge(index).payload),
        }
    }

    /// Ranges allocated to the component `id`.
    pub fn ranges(&self, id: ComponentId) -> Option<ComponentRanges> {
        self.component(id).map(ranges_of)
    }

    /// All components with their ids, nodes first.
    pub fn components(
        &self,
    ) -> impl Iterator<Item = (ComponentId, &(dyn Component + 'static))> + '_ {
        self.network
            .nodes()
            .map(|n| (n.object.id, &*n.payload))
            .chain(self.network.edges().map(|e| (e.object.id, &*e.payload)))
    }

    /// `"<id>:<label>"` for every state slot, in global order.
    pub fn state_labels(&self) -> Vec<String> {
        let zeros = vec![0.0; self.counts.states];
        let mut labels = vec![String::new(); self.counts.states];
        for (id, component) in self.components() {
            if let Some(state) = component.as_state() {
                let range = state.state_range();
                for (slot, value) in range.indices().zip(state.state_values(&zeros)) {
                    labels[slot] = format!("{id}:{}", value.label);
                }
            }
        }
        labels
    }

    /// Human readable values of every state-holding component.
    pub fn state_report(&self, state: &[f64]) -> Vec<ComponentReport> {
        self.components()
            .filter_map(|(id, component)| {
                component.as_state().map(|s| ComponentReport {
                    id,
                    type_tag: component.type_tag().to_string(),
                    values: s.state_values(state),
                })
            })
            .collect()
    }

    fn each(&self) -> impl Iterator<Item = &(dyn Component + 'static)> + '_ {
        self.components().map(|(_, c)| c)
    }
}

fn ranges_of(component: &dyn Component) -> ComponentRanges {
    ComponentRanges {
        equations: component
            .as_equation()
            .map(|c| c.equation_range())
            .unwrap_or_default(),
        states: component
            .as_state()
            .map(|c| c.state_range())
            .unwrap_or_default(),
        controls: component
            .as_control()
            .map(|c| c.control_range())
            .unwrap_or_default(),
        constraints: component
            .as_constraint()
            .map(|c| c.constraint_range())
            .unwrap_or_default(),
    }
}

/// Reserve every segment in arena order: nodes, then edges.
fn allocate(network: &mut ComponentNetwork) -> ProblemCounts {
    let mut equations = IndexAllocator::new();
    let mut states = IndexAllocator::new();
    let mut controls = IndexAllocator::new();
    let mut constraints = IndexAllocator::new();
    let mut reserve = |component: &mut Box<dyn Component>| {
        if let Some(c) = component.as_equation_mut() {
            c.setup(&mut equations);
        }
        if let Some(c) = component.as_state_mut() {
            c.setup_states(&mut states);
        }
        if let Some(c) = component.as_control_mut() {
            c.setup_controls(&mut controls);
        }
        if let Some(c) = component.as_constraint_mut() {
            c.setup_constraints(&mut constraints);
        }
    };
    for node in network.nodes_mut() {
        reserve(&mut node.payload);
    }
    for edge in network.edges_mut() {
        reserve(&mut edge.payload);
    }
    ProblemCounts {
        equations: equations.total(),
        states: states.total(),
        controls_per_step: controls.total(),
        constraints_per_step: constraints.total(),
    }
}

fn collect_attachments(
    network: &ComponentNetwork,
    node: NodeIndex,
) -> GpnetResult<Attachments> {
    let entry = network.node(node);
    let incident = entry
        .starting_edges()
        .iter()
        .map(|e| (*e, EdgeEnd::Start))
        .chain(entry.ending_edges().iter().map(|e| (*e, EdgeEnd::End)));
    let mut attachments = Attachments::default();
    for (edge_index, end) in incident {
        let edge = network.edge(edge_index);
        if let (EdgeEnd::End, Some(plant)) = (end, edge.payload.plant()) {
            attachments.plants.push(plant);
        } else if let Some(gas) = edge.payload.as_gas_edge() {
            attachments.gas.push(GasAttachment {
                end,
                boundary: gas.boundary(end),
            });
        }
        if let Some(line) = edge.payload.as_power_line() {
            let neighbour_id = match end {
                EdgeEnd::Start => edge.to,
                EdgeEnd::End => edge.from,
            };
            let neighbour = network
                .node_index(neighbour_id)
                .map(|i| &*network.node(i).payload);
            let Some(states) = neighbour.and_then(|n| n.as_state()) else {
                return Err(GpnetError::Validation(format!(
                    "line {} connects {} to a node without voltage states",
                    edge.object.id, entry.object.id
                )));
            };
            let start = states.state_range().start;
            let (conductance, susceptance) = line.admittance();
            attachments.power.push(PowerAttachment {
                conductance,
                susceptance,
                neighbour_voltage: start,
                neighbour_angle: start + 1,
            });
        }
    }
    Ok(attachments)
}

fn link(network: &mut ComponentNetwork) -> GpnetResult<()> {
    let view: &ComponentNetwork = network;
    let collected = view
        .node_indices()
        .map(|node| collect_attachments(view, node).map(|a| (node, a)))
        .collect::<GpnetResult<Vec<_>>>()?;
    for (node, attachments) in collected {
        let entry = network.node_mut(node);
        let id = entry.object.id;
        entry.payload.attach(&attachments).map_err(|e| match e {
            GpnetError::Validation(msg) => GpnetError::Validation(format!("node {id}: {msg}")),
            other => other,
        })?;
    }
    Ok(())
}

impl OptimizableProblem for NetworkProblem {
    fn number_of_equations(&self) -> usize {
        self.counts.equations
    }

    fn number_of_states(&self) -> usize {
        self.counts.states
    }

    fn number_of_controls_per_step(&self) -> usize {
        self.counts.controls_per_step
    }

    fn number_of_constraints_per_step(&self) -> usize {
        self.counts.constraints_per_step
    }

    fn evaluate(&self, residual: &mut [f64], ctx: &StepContext<'_>) -> GpnetResult<()> {
        residual.fill(0.0);
        for c in self.each().filter_map(|c| c.as_equation()) {
            c.evaluate(residual, ctx)?;
        }
        Ok(())
    }

    fn d_evaluate_d_new_state(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        for c in self.each().filter_map(|c| c.as_equation()) {
            c.d_evaluate_d_new_state(handler, ctx)?;
        }
        Ok(())
    }

    fn d_evaluate_d_last_state(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        for c in self.each().filter_map(|c| c.as_equation()) {
            c.d_evaluate_d_last_state(handler, ctx)?;
        }
        Ok(())
    }

    fn d_evaluate_d_control(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        for c in self.each().filter_map(|c| c.as_equation()) {
            c.d_evaluate_d_control(handler, ctx)?;
        }
        Ok(())
    }

    fn evaluate_cost(&self, ctx: &PointContext<'_>) -> f64 {
        self.each()
            .filter_map(|c| c.as_cost())
            .map(|c| c.evaluate_cost(ctx))
            .sum()
    }

    fn d_cost_d_state(&self, gradient: &mut [f64], ctx: &PointContext<'_>) {
        for c in self.each().filter_map(|c| c.as_cost()) {
            c.d_cost_d_state(gradient, ctx);
        }
    }

    fn d_cost_d_control(&self, gradient: &mut [f64], ctx: &PointContext<'_>) {
        for c in self.each().filter_map(|c| c.as_cost()) {
            c.d_cost_d_control(gradient, ctx);
        }
    }

    fn evaluate_constraint(&self, out: &mut [f64], ctx: &PointContext<'_>) -> GpnetResult<()> {
        for c in self.each().filter_map(|c| c.as_constraint()) {
            c.evaluate_constraint(out, ctx)?;
        }
        Ok(())
    }

    fn d_constraint_d_state(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &PointContext<'_>,
    ) -> GpnetResult<()> {
        for c in self.each().filter_map(|c| c.as_constraint()) {
            c.d_constraint_d_state(handler, ctx)?;
        }
        Ok(())
    }

    fn d_constraint_d_control(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &PointContext<'_>,
    ) -> GpnetResult<()> {
        for c in self.each().filter_map(|c| c.as_constraint()) {
            c.d_constraint_d_control(handler, ctx)?;
        }
        Ok(())
    }

    fn set_initial_values(&self, state: &mut [f64]) -> GpnetResult<()> {
        if state.len() != self.counts.states {
            return Err(GpnetError::Validation(format!(
                "state vector has length {}, expected {}",
                state.len(),
                self.counts.states
            )));
        }
        for c in self.each().filter_map(|c| c.as_state()) {
            c.set_initial_values(state)?;
        }
        Ok(())
    }

    fn set_initial_controls(&self, controls: &mut InterpolatingVector) -> GpnetResult<()> {
        check_width(controls, self.counts.controls_per_step, "control")?;
        for c in self.each().filter_map(|c| c.as_control()) {
            c.set_initial_controls(controls)?;
        }
        Ok(())
    }

    fn set_lower_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()> {
        check_width(bounds, self.counts.controls_per_step, "control bound")?;
        for c in self.each().filter_map(|c| c.as_control()) {
            c.set_lower_bounds(bounds)?;
        }
        Ok(())
    }

    fn set_upper_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()> {
        check_width(bounds, self.counts.controls_per_step, "control bound")?;
        for c in self.each().filter_map(|c| c.as_control()) {
            c.set_upper_bounds(bounds)?;
        }
        Ok(())
    }

    fn set_constraint_lower_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()> {
        check_width(bounds, self.counts.constraints_per_step, "constraint bound")?;
        for c in self.each().filter_map(|c| c.as_constraint()) {
            c.set_constraint_lower_bounds(bounds)?;
        }
        Ok(())
    }

    fn set_constraint_upper_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()> {
        check_width(bounds, self.counts.constraints_per_step, "constraint bound")?;
        for c in self.each().filter_map(|c| c.as_constraint()) {
            c.set_constraint_upper_bounds(bounds)?;
        }
        Ok(())
    }
}

fn check_width(vector: &InterpolatingVector, expected: usize, what: &str) -> GpnetResult<()> {
    use gpnet_core::Interpolating;
    if vector.inner_length() != expected {
        return Err(GpnetError::Validation(format!(
            "{what} vector has width {}, expected {expected}",
            vector.inner_length()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_bus() -> NetworkProblem {
        let records: Vec<ComponentRecord> = serde_json::from_value(json!([
            {"id": 1, "type": "Vphinode", "params": {"boundary": [{"time": 0.0, "values": [1.0, 0.0]}]}},
            {"id": 2, "type": "PQnode", "params": {"boundary": [{"time": 0.0, "values": [-0.5, -0.2]}]}},
            {"id": 3, "type": "Transmissionline", "from": 1, "to": 2,
             "params": {"conductance": 0.99, "susceptance": -9.9}}
        ]))
        .unwrap();
        NetworkProblem::from_records(&ComponentFactory::power(), &records).unwrap()
    }

    #[test]
    fn segments_follow_arena_order() {
        let problem = two_bus();
        let counts = problem.counts();
        assert_eq!(counts.equations, 4);
        assert_eq!(counts.states, 4);
        assert_eq!(
            problem.ranges(ComponentId::new(2)).unwrap().states,
            IndexRange::new(2, 4)
        );
        assert!(problem
            .ranges(ComponentId::new(3))
            .unwrap()
            .states
            .is_empty());
    }

    #[test]
    fn labels_cover_every_state() {
        let labels = two_bus().state_labels();
        assert_eq!(labels, vec!["1:V", "1:phi", "2:V", "2:phi"]);
    }

    #[test]
    fn line_to_stateless_node_is_rejected() {
        let records: Vec<ComponentRecord> = serde_json::from_value(json!([
            {"id": 1, "type": "Vphinode", "params": {"boundary": [{"time": 0.0, "values": [1.0, 0.0]}]}},
            {"id": 2, "type": "Innode"},
            {"id": 3, "type": "Transmissionline", "from": 1, "to": 2,
             "params": {"conductance": 1.0, "susceptance": -1.0}}
        ]))
        .unwrap();
        assert!(NetworkProblem::from_records(&ComponentFactory::full(), &records).is_err());
    }
}
