//! Structural difference between two snapshots.

use serde::{Deserialize, Serialize};

/// Added/removed/modified node and edge ids, each list in id order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDiff {
    pub nodes_added: Vec<String>,
    pub nodes_removed: Vec<String>,
    pub nodes_modified: Vec<String>,
    pub edges_added: Vec<String>,
    pub edges_removed: Vec<String>,
    pub edges_modified: Vec<String>,
}

impl SnapshotDiff {
    /// True when the two snapshots hold identical content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.change_count() == 0
    }

    /// Total number of changed ids.
    #[must_use]
    pub fn change_count(&self) -> usize {
        [
            &self.nodes_added,
            &self.nodes_removed,
            &self.nodes_modified,
            &self.edges_added,
            &self.edges_removed,
            &self.edges_modified,
        ]
        .iter()
        .map(|ids| ids.len())
        .sum()
    }
}
