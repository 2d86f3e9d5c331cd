//! Execution nodes and stages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// One operation in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionNode {
    pub node_id: String,
    pub operation: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Bindings this node reads.
    #[serde(default)]
    pub input_bindings: Vec<String>,
    /// Bindings this node writes.
    #[serde(default)]
    pub output_bindings: Vec<String>,
    #[serde(default)]
    pub estimated_cost: u64,
}

impl ExecutionNode {
    #[must_use]
    pub fn new(node_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            operation: operation.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Declare an input binding.
    #[must_use]
    pub fn reads(mut self, binding: impl Into<String>) -> Self {
        self.input_bindings.push(binding.into());
        self
    }

    /// Declare an output binding.
    #[must_use]
    pub fn writes(mut self, binding: impl Into<String>) -> Self {
        self.output_bindings.push(binding.into());
        self
    }

    #[must_use]
    pub fn with_cost(mut self, cost: u64) -> Self {
        self.estimated_cost = cost;
        self
    }
}

/// Provenance of a stage produced by optimization.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMetadata {
    #[serde(default)]
    pub merged: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub original_stages: Vec<String>,
}

/// A set of nodes that share dependency prerequisites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStage {
    /// Empty until the plan assigns one.
    #[serde(default)]
    pub stage_id: String,
    pub nodes: Vec<ExecutionNode>,
    /// Ids of stages that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Zero means "derive from node costs" when added to a plan.
    #[serde(default)]
    pub estimated_cost: u64,
    #[serde(default = "parallel_default")]
    pub can_parallelize: bool,
    #[serde(default)]
    pub metadata: StageMetadata,
}

fn parallel_default() -> bool {
    true
}

impl ExecutionStage {
    /// Parallelizable stage with no id and no dependencies.
    #[must_use]
    pub fn new(nodes: Vec<ExecutionNode>) -> Self {
        Self {
            stage_id: String::new(),
            nodes,
            dependencies: Vec::new(),
            estimated_cost: 0,
            can_parallelize: true,
            metadata: StageMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, stage_id: impl Into<String>) -> Self {
        self.stage_id = stage_id.into();
        self
    }

    #[must_use]
    pub fn depends_on(mut self, stage_id: impl Into<String>) -> Self {
        self.dependencies.push(stage_id.into());
        self
    }

    #[must_use]
    pub fn with_cost(mut self, cost: u64) -> Self {
        self.estimated_cost = cost;
        self
    }

    /// Mark the stage's nodes as not safe to run concurrently.
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.can_parallelize = false;
        self
    }

    /// Sum of node costs.
    #[must_use]
    pub fn node_cost(&self) -> u64 {
        self.nodes
            .iter()
            .fold(0u64, |acc, node| acc.saturating_add(node.estimated_cost))
    }

    /// Bindings two nodes of this stage both touch with at least one write.
    #[must_use]
    pub fn binding_conflicts(&self) -> BTreeSet<String> {
        binding_conflicts(self.nodes.iter())
    }
}

/// Conflicting bindings among a set of nodes meant to run concurrently.
///
/// A binding conflicts when two nodes write it, or when one node writes what
/// another reads.
pub(crate) fn binding_conflicts<'a>(
    nodes: impl Iterator<Item = &'a ExecutionNode> + Clone,
) -> BTreeSet<String> {
    let mut writers: Vec<(&str, &str)> = Vec::new();
    let mut conflicts = BTreeSet::new();

    for node in nodes.clone() {
        for binding in &node.output_bindings {
            if writers
                .iter()
                .any(|(writer, b)| *b == binding.as_str() && *writer != node.node_id.as_str())
            {
                conflicts.insert(binding.clone());
            }
            writers.push((node.node_id.as_str(), binding.as_str()));
        }
    }

    for node in nodes {
        for binding in &node.input_bindings {
            if writers
                .iter()
                .any(|(writer, b)| *b == binding.as_str() && *writer != node.node_id.as_str())
            {
                conflicts.insert(binding.clone());
            }
        }
    }

    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_cost_saturates() {
        let stage = ExecutionStage::new(vec![
            ExecutionNode::new("a", "scan").with_cost(u64::MAX),
            ExecutionNode::new("b", "scan").with_cost(1),
        ]);
        assert_eq!(stage.node_cost(), u64::MAX);
    }

    #[test]
    fn independent_nodes_have_no_conflicts() {
        let stage = ExecutionStage::new(vec![
            ExecutionNode::new("a", "scan").reads("src").writes("x"),
            ExecutionNode::new("b", "scan").reads("src").writes("y"),
        ]);
        assert!(stage.binding_conflicts().is_empty());
    }

    #[test]
    fn shared_writes_and_read_after_write_conflict() {
        let stage = ExecutionStage::new(vec![
            ExecutionNode::new("a", "scan").writes("x"),
            ExecutionNode::new("b", "scan").writes("x"),
            ExecutionNode::new("c", "filter").reads("y"),
            ExecutionNode::new("d", "emit").writes("y"),
        ]);
        let conflicts: Vec<String> = stage.binding_conflicts().into_iter().collect();
        assert_eq!(conflicts, vec!["x", "y"]);
    }

    #[test]
    fn serde_defaults() {
        let stage: ExecutionStage =
            serde_json::from_str(r#"{"nodes":[{"nodeId":"a","operation":"scan"}]}"#)
                .expect("parse");
        assert!(stage.can_parallelize);
        assert!(stage.stage_id.is_empty());
        assert!(!stage.metadata.merged);
    }
}
