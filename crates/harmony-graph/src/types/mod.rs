//! # Core Type Definitions
//!
//! This module contains the shared types of the graph kernel:
//! - Graph elements (`Node`, `Edge`) and the `GraphData` container
//! - Error types (`GraphError`, `ErrorKind`)
//!
//! ## Determinism Guarantees
//!
//! - Node and edge collections are `BTreeMap`s keyed by id
//! - Collections deserialize from either an id-keyed object or a list of
//!   `[id, value]` pairs, and always serialize as an id-keyed object

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

// =============================================================================
// GRAPH ELEMENTS
// =============================================================================

/// A typed node as held by the external graph store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier.
    #[serde(default)]
    pub id: String,

    /// Registered node type key. Empty means "missing".
    #[serde(rename = "type", default)]
    pub node_type: String,

    /// Typed property values checked against the schema.
    #[serde(default)]
    pub properties: Map<String, Value>,

    /// Free-form metadata, not schema-checked.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    /// Runtime state, not schema-checked.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub state: Map<String, Value>,
}

impl Node {
    /// Create a node with no properties.
    #[must_use]
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            ..Self::default()
        }
    }

    /// Builder-style property setter.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Get a property, treating JSON `null` as absent.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        present(&self.properties, name)
    }
}

/// A typed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Edge {
    /// Unique edge identifier.
    #[serde(default)]
    pub id: String,

    /// Registered edge type key. Empty means "missing".
    #[serde(rename = "type", default)]
    pub edge_type: String,

    /// Source node id.
    #[serde(default)]
    pub source: String,

    /// Target node id.
    #[serde(default)]
    pub target: String,

    /// Typed property values checked against the schema.
    #[serde(default)]
    pub properties: Map<String, Value>,

    /// Free-form metadata, not schema-checked.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Edge {
    /// Create an edge with no properties.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        edge_type: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            edge_type: edge_type.into(),
            source: source.into(),
            target: target.into(),
            ..Self::default()
        }
    }

    /// Builder-style property setter.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Get a property, treating JSON `null` as absent.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        present(&self.properties, name)
    }
}

fn present<'a>(properties: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    properties.get(name).filter(|value| !value.is_null())
}

// =============================================================================
// GRAPH DATA
// =============================================================================

/// The raw `{nodes, edges}` state supplied by the graph store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GraphData {
    /// Nodes keyed by id.
    #[serde(deserialize_with = "deserialize_nodes")]
    pub nodes: BTreeMap<String, Node>,

    /// Edges keyed by id.
    #[serde(deserialize_with = "deserialize_edges")]
    pub edges: BTreeMap<String, Edge>,
}

impl GraphData {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node keyed by its own id.
    pub fn insert_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Insert an edge keyed by its own id.
    pub fn insert_edge(&mut self, edge: Edge) {
        self.edges.insert(edge.id.clone(), edge);
    }

    /// Builder-style node insertion.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.insert_node(node);
        self
    }

    /// Builder-style edge insertion.
    #[must_use]
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.insert_edge(edge);
        self
    }
}

/// Either an id-keyed object or a list of `[id, value]` pairs.
#[derive(Deserialize)]
#[serde(untagged)]
enum Entries<T> {
    Map(BTreeMap<String, T>),
    Pairs(Vec<(String, T)>),
}

impl<T> Entries<T> {
    fn into_map(self) -> BTreeMap<String, T> {
        match self {
            Entries::Map(map) => map,
            Entries::Pairs(pairs) => pairs.into_iter().collect(),
        }
    }
}

pub(crate) fn deserialize_nodes<'de, D>(deserializer: D) -> Result<BTreeMap<String, Node>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut nodes = Entries::<Node>::deserialize(deserializer)?.into_map();
    for (key, node) in &mut nodes {
        if node.id.is_empty() {
            node.id.clone_from(key);
        }
    }
    Ok(nodes)
}

pub(crate) fn deserialize_edges<'de, D>(deserializer: D) -> Result<BTreeMap<String, Edge>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut edges = Entries::<Edge>::deserialize(deserializer)?.into_map();
    for (key, edge) in &mut edges {
        if edge.id.is_empty() {
            edge.id.clone_from(key);
        }
    }
    Ok(edges)
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Failure classes of the kernel.
///
/// Schema validation failures are not errors: they are returned as
/// `ValidationResult` values so every violation can be reported at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input, pattern mismatch, or duplicate id/type.
    Construction,
    /// A graph was refused because it failed schema validation.
    Validation,
    /// Snapshot checksum mismatch.
    Integrity,
    /// The stage graph of a plan cannot be ordered.
    CircularDependency,
    /// Registry indexes disagree with each other.
    Consistency,
    /// JSON encoding or decoding failed.
    Serialization,
    /// Configuration could not be parsed or is out of range.
    Config,
}

/// Errors that can occur in the graph kernel.
///
/// - No silent failures
/// - The kernel never panics; every failure is a `GraphError`
#[derive(Debug, Error)]
pub enum GraphError {
    /// A node type with this key is already registered.
    #[error("Node type already registered: {0}")]
    DuplicateNodeType(String),

    /// An edge type with this key is already registered.
    #[error("Edge type already registered: {0}")]
    DuplicateEdgeType(String),

    /// A schema constraint with this name is already registered.
    #[error("Constraint already registered: {0}")]
    DuplicateConstraint(String),

    /// A property declares a kind that is neither built in nor backed by a validator.
    #[error(
        "Property '{property}' of type '{type_name}' declares unknown kind '{kind}' without a custom validator"
    )]
    UnresolvedPropertyKind {
        type_name: String,
        property: String,
        kind: String,
    },

    /// A type definition is malformed.
    #[error("Invalid type definition: {0}")]
    InvalidTypeDefinition(String),

    /// Snapshot input lacks `nodes` or `edges`.
    #[error("Snapshot requires {0}")]
    MissingGraphData(&'static str),

    /// Caller metadata uses a key the snapshot writes itself.
    #[error("Snapshot metadata key '{0}' is reserved")]
    ReservedMetadataKey(String),

    /// The stored checksum disagrees with the recomputed one.
    #[error("Snapshot integrity check failed: stored {expected}, computed {actual}")]
    Integrity { expected: String, actual: String },

    /// A stage is malformed (for example, it has no nodes).
    #[error("Invalid stage: {0}")]
    InvalidStage(String),

    /// A stage depends on a stage that is not in the plan.
    #[error("Stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    /// Two stages share an id.
    #[error("Duplicate stage id: {0}")]
    DuplicateStage(String),

    /// Topological ordering made no progress over these stages.
    #[error("Circular dependency among stages: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    /// Two nodes of one stage touch the same binding.
    #[error("Stage '{stage}' has conflicting binding '{binding}'")]
    BindingConflict { stage: String, binding: String },

    /// The plan builder was driven out of order.
    #[error("Plan builder misuse: {0}")]
    Builder(String),

    /// A subscription failed construction-time validation.
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    /// A subscription with this id is already registered.
    #[error("Subscription already registered: {0}")]
    DuplicateSubscription(String),

    /// Registry indexes diverged.
    #[error("Registry inconsistency: {0}")]
    Consistency(String),

    /// A graph was refused because it failed schema validation.
    #[error("Graph failed validation with {} error(s)", .0.len())]
    InvalidGraph(Vec<String>),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// Configuration is malformed or out of range.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GraphError {
    /// Classify this error into the kernel's failure taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::DuplicateNodeType(_)
            | GraphError::DuplicateEdgeType(_)
            | GraphError::DuplicateConstraint(_)
            | GraphError::UnresolvedPropertyKind { .. }
            | GraphError::InvalidTypeDefinition(_)
            | GraphError::MissingGraphData(_)
            | GraphError::ReservedMetadataKey(_)
            | GraphError::InvalidStage(_)
            | GraphError::UnknownDependency { .. }
            | GraphError::DuplicateStage(_)
            | GraphError::BindingConflict { .. }
            | GraphError::Builder(_)
            | GraphError::InvalidSubscription(_)
            | GraphError::DuplicateSubscription(_) => ErrorKind::Construction,
            GraphError::InvalidGraph(_) => ErrorKind::Validation,
            GraphError::Integrity { .. } => ErrorKind::Integrity,
            GraphError::CircularDependency(_) => ErrorKind::CircularDependency,
            GraphError::Consistency(_) => ErrorKind::Consistency,
            GraphError::SerializationError(_) | GraphError::DeserializationError(_) => {
                ErrorKind::Serialization
            }
            GraphError::Config(_) => ErrorKind::Config,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn graph_data_accepts_keyed_object() {
        let raw = json!({
            "nodes": { "n1": { "type": "sensor", "properties": { "value": 5 } } },
            "edges": {}
        });
        let graph: GraphData = serde_json::from_value(raw).expect("parse");

        let node = graph.nodes.get("n1").expect("n1");
        assert_eq!(node.id, "n1");
        assert_eq!(node.node_type, "sensor");
        assert_eq!(node.property("value"), Some(&json!(5)));
    }

    #[test]
    fn graph_data_accepts_pairs() {
        let raw = json!({
            "nodes": [["a", { "type": "t" }], ["b", { "id": "b", "type": "t" }]],
            "edges": [["e", { "type": "link", "source": "a", "target": "b" }]]
        });
        let graph: GraphData = serde_json::from_value(raw).expect("parse");

        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.get("e").map(|e| e.id.as_str()), Some("e"));
    }

    #[test]
    fn null_property_is_absent() {
        let node = Node::new("n", "t").with_property("x", Value::Null);
        assert!(node.property("x").is_none());
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            GraphError::DuplicateNodeType("x".into()).kind(),
            ErrorKind::Construction
        );
        assert_eq!(
            GraphError::CircularDependency(vec!["a".into()]).kind(),
            ErrorKind::CircularDependency
        );
        assert_eq!(
            GraphError::Integrity {
                expected: "1".into(),
                actual: "2".into()
            }
            .kind(),
            ErrorKind::Integrity
        );
    }
}
