//! # Component Factory
//!
//! Builds a heterogeneous network from declarative [`ComponentRecord`]s. The
//! factory is a registry from type tag to constructor; presets differ only in
//! which tags they register:
//!
//! | Preset | Tags |
//! |--------|------|
//! | [`ComponentFactory::gas`] | `Source`, `Sink`, `Innode`, `ConstraintSink`, `Pipe`, `Shortpipe`, `Controlvalve`, `Compressorstation` |
//! | [`ComponentFactory::power`] | `Vphinode`, `PQnode`, `PVnode`, `Transmissionline` |
//! | [`ComponentFactory::full`] | both, plus `Gaspowerconnection` |
//!
//! Nodes are inserted first, in record order, then edges in record order. The
//! resulting id-to-index mapping depends only on the record order.

use crate::model::coupling::Gaspowerconnection;
use crate::model::gas::{GasNode, GasNodeKind, Pipe, ShortEdge, ShortEdgeKind};
use crate::model::power::{PowerNode, PowerNodeKind, Transmissionline};
use crate::model::Component;
use anyhow::{anyhow, Context};
use gpnet_core::{ComponentId, ConstructionError, GpnetResult, IdObject, Network};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Network whose nodes and edges are boxed components.
pub type ComponentNetwork = Network<Box<dyn Component>, Box<dyn Component>>;

/// Builds one component from its record.
pub type Constructor = fn(&ComponentRecord) -> anyhow::Result<Box<dyn Component>>;

/// Declarative description of one node or edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub id: ComponentId,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ComponentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ComponentId>,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ComponentRecord {
    /// Deserialize `params` into a per-type parameter struct.
    pub fn parse_params<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let params = if self.params.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            self.params.clone()
        };
        serde_json::from_value(params)
            .with_context(|| format!("invalid parameters for {} {}", self.type_tag, self.id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Node,
    Edge,
}

/// Registry of constructors keyed by type tag.
#[derive(Clone, Default)]
pub struct ComponentFactory {
    constructors: BTreeMap<String, (ComponentKind, Constructor)>,
}

impl std::fmt::Debug for ComponentFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentFactory")
            .field("types", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn boxed<C: Component + 'static>(component: anyhow::Result<C>) -> anyhow::Result<Box<dyn Component>> {
    component.map(|c| Box::new(c) as Box<dyn Component>)
}

impl ComponentFactory {
    /// Factory without any registered type.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn gas() -> Self {
        let mut factory = Self::empty();
        factory.register_gas();
        factory
    }

    pub fn power() -> Self {
        let mut factory = Self::empty();
        factory.register_power();
        factory
    }

    pub fn full() -> Self {
        let mut factory = Self::empty();
        factory.register_gas();
        factory.register_power();
        factory.register("Gaspowerconnection", ComponentKind::Edge, |r| {
            boxed(Gaspowerconnection::from_record(r))
        });
        factory
    }

    fn register_gas(&mut self) {
        use ComponentKind::{Edge, Node};
        self.register("Source", Node, |r| {
            boxed(GasNode::from_record(GasNodeKind::Source, r))
        });
        self.register("Sink", Node, |r| boxed(GasNode::from_record(GasNodeKind::Sink, r)));
        self.register("Innode", Node, |r| {
            boxed(GasNode::from_record(GasNodeKind::Innode, r))
        });
        self.register("ConstraintSink", Node, |r| {
            boxed(GasNode::from_record(GasNodeKind::ConstraintSink, r))
        });
        self.register("Pipe", Edge, |r| boxed(Pipe::from_record(r)));
        self.register("Shortpipe", Edge, |r| {
            boxed(ShortEdge::from_record(ShortEdgeKind::Shortpipe, r))
        });
        self.register("Controlvalve", Edge, |r| {
            boxed(ShortEdge::from_record(ShortEdgeKind::Controlvalve, r))
        });
        self.register("Compressorstation", Edge, |r| {
            boxed(ShortEdge::from_record(ShortEdgeKind::Compressorstation, r))
        });
    }

    fn register_power(&mut self) {
        use ComponentKind::{Edge, Node};
        self.register("Vphinode", Node, |r| {
            boxed(PowerNode::from_record(PowerNodeKind::Vphinode, r))
        });
        self.register("PQnode", Node, |r| {
            boxed(PowerNode::from_record(PowerNodeKind::PQnode, r))
        });
        self.register("PVnode", Node, |r| {
            boxed(PowerNode::from_record(PowerNodeKind::PVnode, r))
        });
        self.register("Transmissionline", Edge, |r| {
            boxed(Transmissionline::from_record(r))
        });
    }

    /// Register (or replace) the constructor for `tag`.
    pub fn register(&mut self, tag: impl Into<String>, kind: ComponentKind, constructor: Constructor) {
        self.constructors.insert(tag.into(), (kind, constructor));
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    pub fn kind_of(&self, tag: &str) -> Option<ComponentKind> {
        self.constructors.get(tag).map(|(kind, _)| *kind)
    }

    /// Registered tags in sorted order.
    pub fn registered_types(&self) -> impl Iterator<Item = &str> + '_ {
        self.constructors.keys().map(String::as_str)
    }

    fn lookup(&self, record: &ComponentRecord) -> GpnetResult<(ComponentKind, Constructor)> {
        self.constructors
            .get(&record.type_tag)
            .copied()
            .ok_or_else(|| {
                ConstructionError::UnknownType {
                    id: record.id,
                    type_tag: record.type_tag.clone(),
                }
                .into()
            })
    }

    fn construct(record: &ComponentRecord, constructor: Constructor) -> GpnetResult<Box<dyn Component>> {
        constructor(record).map_err(|source| {
            ConstructionError::InvalidParameters {
                id: record.id,
                source,
            }
            .into()
        })
    }

    /// Build the network described by `records`.
    pub fn build(&self, records: &[ComponentRecord]) -> GpnetResult<ComponentNetwork> {
        let mut network = ComponentNetwork::new();
        let mut edges = Vec::new();
        for record in records {
            let (kind, constructor) = self.lookup(record)?;
            match kind {
                ComponentKind::Node => {
                    let component = Self::construct(record, constructor)?;
                    network.add_node(IdObject::new(record.id, record.name.clone()), component)?;
                }
                ComponentKind::Edge => edges.push((record, constructor)),
            }
        }
        for (record, constructor) in edges {
            let (Some(from), Some(to)) = (record.from, record.to) else {
                return Err(ConstructionError::InvalidParameters {
                    id: record.id,
                    source: anyhow!("edge {} needs both `from` and `to`", record.id),
                }
                .into());
            };
            let component = Self::construct(record, constructor)?;
            network.add_edge(IdObject::new(record.id, record.name.clone()), from, to, component)?;
        }
        tracing::debug!(
            nodes = network.node_count(),
            edges = network.edge_count(),
            "network built"
        );
        Ok(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpnet_core::GpnetError;
    use serde_json::json;

    fn records(value: serde_json::Value) -> Vec<ComponentRecord> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn presets_differ_only_in_tags() {
        assert!(ComponentFactory::gas().is_registered("Pipe"));
        assert!(!ComponentFactory::gas().is_registered("PQnode"));
        assert!(ComponentFactory::power().is_registered("PQnode"));
        let full = ComponentFactory::full();
        assert_eq!(full.registered_types().count(), 13);
        assert_eq!(full.kind_of("Transmissionline"), Some(ComponentKind::Edge));
        assert_eq!(full.kind_of("Gaspowerconnection"), Some(ComponentKind::Edge));
        assert!(!ComponentFactory::gas().is_registered("Gaspowerconnection"));
        assert!(!ComponentFactory::power().is_registered("Gaspowerconnection"));
    }

    #[test]
    fn unknown_tag_is_reported() {
        let recs = records(json!([{"id": 1, "type": "Windturbine"}]));
        let err = ComponentFactory::full().build(&recs).err().unwrap();
        assert!(matches!(
            err,
            GpnetError::Construction(ConstructionError::UnknownType { .. })
        ));
    }

    #[test]
    fn edge_without_endpoints_is_invalid() {
        let recs = records(json!([
            {"id": 1, "type": "Transmissionline", "params": {"conductance": 1.0, "susceptance": -1.0}}
        ]));
        let err = ComponentFactory::power().build(&recs).err().unwrap();
        assert!(matches!(
            err,
            GpnetError::Construction(ConstructionError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn bad_parameters_keep_their_cause() {
        let recs = records(json!([{"id": 5, "type": "Source", "params": {"boundary_type": "flow"}}]));
        let err = ComponentFactory::gas().build(&recs).err().unwrap();
        match err {
            GpnetError::Construction(ConstructionError::InvalidParameters { id, source }) => {
                assert_eq!(id, ComponentId::new(5));
                assert!(format!("{source:#}").contains("boundary"));
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
