//! # Graph Snapshot
//!
//! An immutable, checksummed copy of the graph at one instant.
//!
//! Immutability is structural: fields are private, every accessor hands out
//! shared references, and no method takes `&mut self`. Nodes and edges sit
//! behind `Arc`, so snapshots are `Send + Sync` and can be read from any
//! number of threads without locking. `merge` shares untouched elements with
//! the source snapshot instead of copying them.

use super::checksum::snapshot_checksum;
use super::diff::SnapshotDiff;
use crate::primitives::SNAPSHOT_ID_PREFIX;
use crate::types::{deserialize_edges, deserialize_nodes};
use crate::{Edge, GraphData, GraphError, Node};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// METADATA
// =============================================================================

/// Metadata keys written by the snapshot itself; caller tags may not use them.
pub const RESERVED_METADATA_KEYS: [&str; 4] =
    ["nodeCount", "edgeCount", "capturedAt", "mergedFrom"];

/// Descriptive metadata captured alongside a snapshot.
///
/// Not covered by the checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub node_count: usize,
    pub edge_count: usize,
    /// RFC 3339 capture time.
    pub captured_at: String,
    /// Id of the snapshot this one was merged from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_from: Option<String>,
    /// Caller-supplied tags.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// =============================================================================
// SERIALIZED FORM
// =============================================================================

/// JSON form of a snapshot: `{id, timestamp, nodes, edges, metadata, checksum}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub timestamp: i64,
    #[serde(deserialize_with = "deserialize_nodes")]
    pub nodes: BTreeMap<String, Node>,
    #[serde(deserialize_with = "deserialize_edges")]
    pub edges: BTreeMap<String, Edge>,
    pub metadata: SnapshotMetadata,
    pub checksum: String,
}

// =============================================================================
// SNAPSHOT
// =============================================================================

#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    id: String,
    timestamp: i64,
    nodes: BTreeMap<String, Arc<Node>>,
    edges: BTreeMap<String, Arc<Edge>>,
    metadata: SnapshotMetadata,
    checksum: String,
}

impl GraphSnapshot {
    /// Capture `graph` at the current time.
    pub fn capture(graph: &GraphData) -> Result<Self, GraphError> {
        Self::capture_at(graph, now_millis(), Map::new())
    }

    /// Capture `graph` at an explicit timestamp (epoch millis) with extra metadata.
    pub fn capture_at(
        graph: &GraphData,
        timestamp: i64,
        extra: Map<String, Value>,
    ) -> Result<Self, GraphError> {
        if let Some(key) = extra
            .keys()
            .find(|key| RESERVED_METADATA_KEYS.contains(&key.as_str()))
        {
            return Err(GraphError::ReservedMetadataKey(key.clone()));
        }
        let nodes = graph
            .nodes
            .iter()
            .map(|(id, node)| (id.clone(), freeze_node(id, node)))
            .collect();
        let edges = graph
            .edges
            .iter()
            .map(|(id, edge)| (id.clone(), freeze_edge(id, edge)))
            .collect();
        Self::assemble(generate_id(timestamp), timestamp, nodes, edges, None, extra)
    }

    /// Capture from untyped JSON `{nodes, edges}`.
    ///
    /// Each collection may be an id-keyed object or a list of `[id, value]`
    /// pairs. Fails if either is absent.
    pub fn from_value(value: &Value) -> Result<Self, GraphError> {
        for field in ["nodes", "edges"] {
            if value.get(field).is_none_or(Value::is_null) {
                return Err(GraphError::MissingGraphData(field));
            }
        }
        let graph: GraphData = serde_json::from_value(value.clone())
            .map_err(|e| GraphError::DeserializationError(e.to_string()))?;
        Self::capture(&graph)
    }

    fn assemble(
        id: String,
        timestamp: i64,
        nodes: BTreeMap<String, Arc<Node>>,
        edges: BTreeMap<String, Arc<Edge>>,
        merged_from: Option<String>,
        extra: Map<String, Value>,
    ) -> Result<Self, GraphError> {
        let checksum = compute_checksum(&nodes, &edges, timestamp)?;
        let metadata = SnapshotMetadata {
            node_count: nodes.len(),
            edge_count: edges.len(),
            captured_at: iso_time(timestamp),
            merged_from,
            extra,
        };

        tracing::debug!(
            snapshot_id = %id,
            nodes = metadata.node_count,
            edges = metadata.edge_count,
            checksum = %checksum,
            "captured snapshot"
        );

        Ok(Self {
            id,
            timestamp,
            nodes,
            edges,
            metadata,
            checksum,
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Capture time in epoch milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    #[must_use]
    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id).map(Arc::as_ref)
    }

    #[must_use]
    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id).map(Arc::as_ref)
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node.as_ref()))
    }

    /// Edges in id order.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &Edge)> {
        self.edges.iter().map(|(id, edge)| (id.as_str(), edge.as_ref()))
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Materialize an owned, mutable copy of the captured state.
    #[must_use]
    pub fn to_graph_data(&self) -> GraphData {
        GraphData {
            nodes: self
                .nodes
                .iter()
                .map(|(id, node)| (id.clone(), node.as_ref().clone()))
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|(id, edge)| (id.clone(), edge.as_ref().clone()))
                .collect(),
        }
    }

    // -------------------------------------------------------------------------
    // Integrity
    // -------------------------------------------------------------------------

    /// Recompute the checksum and compare it with the stored one.
    #[must_use]
    pub fn verify_integrity(&self) -> bool {
        compute_checksum(&self.nodes, &self.edges, self.timestamp)
            .is_ok_and(|actual| actual == self.checksum)
    }

    // -------------------------------------------------------------------------
    // Diff & merge
    // -------------------------------------------------------------------------

    /// Changes going from `self` to `other`.
    ///
    /// Ids only in `other` are added, ids only in `self` are removed, and ids
    /// in both whose content differs structurally are modified.
    #[must_use]
    pub fn diff(&self, other: &GraphSnapshot) -> SnapshotDiff {
        let (nodes_added, nodes_removed, nodes_modified) = partition(&self.nodes, &other.nodes);
        let (edges_added, edges_removed, edges_modified) = partition(&self.edges, &other.edges);
        SnapshotDiff {
            nodes_added,
            nodes_removed,
            nodes_modified,
            edges_added,
            edges_removed,
            edges_modified,
        }
    }

    /// New snapshot with `changes` layered over this one, captured now.
    ///
    /// `self` is never modified. The result records this snapshot's id as
    /// `mergedFrom`.
    pub fn merge(&self, changes: &GraphData) -> Result<GraphSnapshot, GraphError> {
        self.merge_at(changes, now_millis())
    }

    /// `merge` at an explicit timestamp.
    pub fn merge_at(&self, changes: &GraphData, timestamp: i64) -> Result<GraphSnapshot, GraphError> {
        let mut nodes = self.nodes.clone();
        for (id, node) in &changes.nodes {
            nodes.insert(id.clone(), freeze_node(id, node));
        }
        let mut edges = self.edges.clone();
        for (id, edge) in &changes.edges {
            edges.insert(id.clone(), freeze_edge(id, edge));
        }
        Self::assemble(
            generate_id(timestamp),
            timestamp,
            nodes,
            edges,
            Some(self.id.clone()),
            self.metadata.extra.clone(),
        )
    }

    // -------------------------------------------------------------------------
    // Serialization
    // -------------------------------------------------------------------------

    /// Owned serializable form.
    #[must_use]
    pub fn to_record(&self) -> SnapshotRecord {
        let graph = self.to_graph_data();
        SnapshotRecord {
            id: self.id.clone(),
            timestamp: self.timestamp,
            nodes: graph.nodes,
            edges: graph.edges,
            metadata: self.metadata.clone(),
            checksum: self.checksum.clone(),
        }
    }

    /// Rebuild a snapshot, rejecting it if its checksum does not match.
    pub fn from_record(record: SnapshotRecord) -> Result<GraphSnapshot, GraphError> {
        let nodes: BTreeMap<String, Arc<Node>> = record
            .nodes
            .into_iter()
            .map(|(id, node)| (id, Arc::new(node)))
            .collect();
        let edges: BTreeMap<String, Arc<Edge>> = record
            .edges
            .into_iter()
            .map(|(id, edge)| (id, Arc::new(edge)))
            .collect();

        let actual = compute_checksum(&nodes, &edges, record.timestamp)?;
        if actual != record.checksum {
            tracing::warn!(
                snapshot_id = %record.id,
                stored = %record.checksum,
                computed = %actual,
                "rejected snapshot with mismatched checksum"
            );
            return Err(GraphError::Integrity {
                expected: record.checksum,
                actual,
            });
        }

        let mut metadata = record.metadata;
        metadata.node_count = nodes.len();
        metadata.edge_count = edges.len();

        Ok(GraphSnapshot {
            id: record.id,
            timestamp: record.timestamp,
            nodes,
            edges,
            metadata,
            checksum: record.checksum,
        })
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, GraphError> {
        serde_json::to_string(&self.to_record())
            .map_err(|e| GraphError::SerializationError(e.to_string()))
    }

    /// Parse and integrity-check a JSON snapshot.
    pub fn from_json(json: &str) -> Result<GraphSnapshot, GraphError> {
        let record: SnapshotRecord = serde_json::from_str(json)
            .map_err(|e| GraphError::DeserializationError(e.to_string()))?;
        Self::from_record(record)
    }

    /// Approximate footprint: the length of the serialized form.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        self.to_json().map(|json| json.len()).unwrap_or(0)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Elements stored with an empty id take their map key, matching how
/// records are read back.
fn freeze_node(key: &str, node: &Node) -> Arc<Node> {
    let mut node = node.clone();
    if node.id.is_empty() {
        node.id = key.to_string();
    }
    Arc::new(node)
}

fn freeze_edge(key: &str, edge: &Edge) -> Arc<Edge> {
    let mut edge = edge.clone();
    if edge.id.is_empty() {
        edge.id = key.to_string();
    }
    Arc::new(edge)
}

fn compute_checksum(
    nodes: &BTreeMap<String, Arc<Node>>,
    edges: &BTreeMap<String, Arc<Edge>>,
    timestamp: i64,
) -> Result<String, GraphError> {
    snapshot_checksum(
        nodes.iter().map(|(id, node)| (id.as_str(), node.as_ref())),
        edges.iter().map(|(id, edge)| (id.as_str(), edge.as_ref())),
        timestamp,
    )
}

/// Split ids into (added, removed, modified) going from `before` to `after`.
fn partition<T: PartialEq>(
    before: &BTreeMap<String, Arc<T>>,
    after: &BTreeMap<String, Arc<T>>,
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let added = after
        .keys()
        .filter(|id| !before.contains_key(*id))
        .cloned()
        .collect();
    let mut removed = Vec::new();
    let mut modified = Vec::new();
    for (id, old) in before {
        match after.get(id) {
            None => removed.push(id.clone()),
            Some(new) if !Arc::ptr_eq(old, new) && old != new => modified.push(id.clone()),
            Some(_) => {}
        }
    }
    (added, removed, modified)
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn iso_time(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// `snap-<millis>-<random base36>`.
fn generate_id(timestamp: i64) -> String {
    let suffix: u64 = rand::thread_rng().r#gen();
    format!("{}-{}-{}", SNAPSHOT_ID_PREFIX, timestamp, to_base36(suffix))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    loop {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
        if value == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_graph() -> GraphData {
        GraphData::new()
            .with_node(Node::new("a", "sensor").with_property("value", 1))
            .with_node(Node::new("b", "display"))
            .with_edge(Edge::new("e1", "feeds", "a", "b"))
    }

    #[test]
    fn fresh_snapshot_verifies() {
        let snapshot = GraphSnapshot::capture(&sample_graph()).expect("capture");

        assert!(snapshot.verify_integrity());
        assert!(snapshot.id().starts_with("snap-"));
        assert_eq!(snapshot.metadata().node_count, 2);
        assert_eq!(snapshot.metadata().edge_count, 1);
        assert!(snapshot.metadata().captured_at.ends_with('Z'));
    }

    #[test]
    fn capture_copies_state() {
        let mut graph = sample_graph();
        let snapshot = GraphSnapshot::capture(&graph).expect("capture");

        graph.insert_node(Node::new("c", "display"));
        if let Some(node) = graph.nodes.get_mut("a") {
            node.properties.insert("value".into(), json!(99));
        }

        assert_eq!(snapshot.node_count(), 2);
        assert_eq!(snapshot.node("a").and_then(|n| n.property("value")), Some(&json!(1)));
        assert!(snapshot.verify_integrity());
    }

    #[test]
    fn from_value_requires_nodes_and_edges() {
        let missing_edges = GraphSnapshot::from_value(&json!({ "nodes": {} }));
        assert!(matches!(missing_edges, Err(GraphError::MissingGraphData("edges"))));

        let missing_nodes = GraphSnapshot::from_value(&json!({ "edges": [] }));
        assert!(matches!(missing_nodes, Err(GraphError::MissingGraphData("nodes"))));

        let pairs = GraphSnapshot::from_value(&json!({
            "nodes": [["a", { "type": "t" }]],
            "edges": []
        }))
        .expect("pairs");
        assert_eq!(pairs.node("a").map(|n| n.id.as_str()), Some("a"));
    }

    #[test]
    fn json_roundtrip_preserves_identity() {
        let snapshot = GraphSnapshot::capture(&sample_graph()).expect("capture");
        let json = snapshot.to_json().expect("json");
        let restored = GraphSnapshot::from_json(&json).expect("restore");

        assert_eq!(restored.id(), snapshot.id());
        assert_eq!(restored.checksum(), snapshot.checksum());
        assert_eq!(restored.metadata(), snapshot.metadata());
        assert!(restored.verify_integrity());
        assert!(restored.diff(&snapshot).is_empty());
    }

    #[test]
    fn tampered_json_is_rejected() {
        let snapshot = GraphSnapshot::capture(&sample_graph()).expect("capture");
        let mut record = serde_json::to_value(snapshot.to_record()).expect("value");
        record["nodes"]["a"]["properties"]["value"] = json!(2);

        let result = GraphSnapshot::from_json(&record.to_string());
        assert!(matches!(result, Err(GraphError::Integrity { .. })));
    }

    #[test]
    fn diff_partitions_changes() {
        let before = GraphSnapshot::capture_at(&sample_graph(), 1, Map::new()).expect("before");
        let mut next = sample_graph();
        next.nodes.remove("b");
        next.insert_node(Node::new("c", "display"));
        next.insert_node(Node::new("a", "sensor").with_property("value", 2));
        let after = GraphSnapshot::capture_at(&next, 2, Map::new()).expect("after");

        let diff = before.diff(&after);
        assert_eq!(diff.nodes_added, vec!["c"]);
        assert_eq!(diff.nodes_removed, vec!["b"]);
        assert_eq!(diff.nodes_modified, vec!["a"]);
        assert!(diff.edges_added.is_empty());
        assert!(diff.edges_removed.is_empty());
        assert!(diff.edges_modified.is_empty());
        assert_eq!(diff.change_count(), 3);
    }

    #[test]
    fn merge_returns_new_snapshot() {
        let base = GraphSnapshot::capture_at(&sample_graph(), 10, Map::new()).expect("base");
        let changes = GraphData::new().with_node(Node::new("c", "display"));

        let merged = base.merge_at(&changes, 20).expect("merge");

        assert_eq!(base.node_count(), 2);
        assert_eq!(merged.node_count(), 3);
        assert_eq!(merged.metadata().merged_from.as_deref(), Some(base.id()));
        assert_ne!(merged.id(), base.id());
        assert!(merged.verify_integrity());
        assert_eq!(base.diff(&merged).nodes_added, vec!["c"]);
    }

    #[test]
    fn keyless_elements_roundtrip() {
        let mut graph = GraphData::new();
        graph.nodes.insert("a".into(), Node::new("", "sensor"));
        graph.edges.insert("e1".into(), Edge::new("", "feeds", "a", "a"));

        let snapshot = GraphSnapshot::capture_at(&graph, 5, Map::new()).expect("capture");
        assert_eq!(snapshot.node("a").map(|n| n.id.as_str()), Some("a"));
        assert_eq!(snapshot.edge("e1").map(|e| e.id.as_str()), Some("e1"));

        let restored = GraphSnapshot::from_json(&snapshot.to_json().expect("json")).expect("restore");
        assert_eq!(restored.checksum(), snapshot.checksum());

        let mut changes = GraphData::new();
        changes.nodes.insert("b".into(), Node::new("", "display"));
        let merged = snapshot.merge_at(&changes, 6).expect("merge");
        assert_eq!(merged.node("b").map(|n| n.id.as_str()), Some("b"));
        GraphSnapshot::from_json(&merged.to_json().expect("json")).expect("restore merged");
    }

    #[test]
    fn reserved_metadata_keys_are_rejected() {
        for key in RESERVED_METADATA_KEYS {
            let mut extra = Map::new();
            extra.insert(key.into(), json!(7));
            let err = GraphSnapshot::capture_at(&GraphData::new(), 5, extra).expect_err("reserved");
            assert!(matches!(err, GraphError::ReservedMetadataKey(ref k) if k == key));
        }

        let mut extra = Map::new();
        extra.insert("source".into(), json!("sensor-bus"));
        let snapshot = GraphSnapshot::capture_at(&GraphData::new(), 5, extra).expect("capture");
        let restored = GraphSnapshot::from_json(&snapshot.to_json().expect("json")).expect("restore");
        assert_eq!(restored.metadata().extra.get("source"), Some(&json!("sensor-bus")));
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
