//! # Snapshot Manager
//!
//! Bounded snapshot retention.
//!
//! - Hard cap of `max_snapshots` (default 100)
//! - Eviction is FIFO by insertion order, not by timestamp
//! - Snapshots are handed out as `Arc<GraphSnapshot>` and outlive eviction
//!   for as long as a reader holds them

use super::diff::SnapshotDiff;
use super::graph_snapshot::GraphSnapshot;
use crate::primitives::DEFAULT_MAX_SNAPSHOTS;
use crate::{GraphData, GraphError};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SnapshotManager {
    snapshots: BTreeMap<String, Arc<GraphSnapshot>>,
    /// Ids in insertion order; front is evicted first.
    order: VecDeque<String>,
    max_snapshots: usize,
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SNAPSHOTS)
    }
}

impl SnapshotManager {
    /// Create a manager retaining at most `max_snapshots` (at least 1).
    #[must_use]
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            snapshots: BTreeMap::new(),
            order: VecDeque::new(),
            max_snapshots: max_snapshots.max(1),
        }
    }

    #[must_use]
    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    /// Add a snapshot, evicting the oldest insertions beyond the cap.
    ///
    /// Re-adding an existing id replaces it in place, keeping its FIFO slot.
    /// Returns the ids evicted by this call.
    pub fn add_snapshot(&mut self, snapshot: GraphSnapshot) -> Vec<String> {
        let id = snapshot.id().to_string();
        if self.snapshots.insert(id.clone(), Arc::new(snapshot)).is_none() {
            self.order.push_back(id);
        }

        let mut evicted = Vec::new();
        while self.order.len() > self.max_snapshots {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.snapshots.remove(&oldest);
            tracing::debug!(snapshot_id = %oldest, cap = self.max_snapshots, "evicted snapshot");
            evicted.push(oldest);
        }
        evicted
    }

    /// Capture `graph` now and retain the snapshot.
    pub fn capture(&mut self, graph: &GraphData) -> Result<Arc<GraphSnapshot>, GraphError> {
        let snapshot = GraphSnapshot::capture(graph)?;
        let id = snapshot.id().to_string();
        self.add_snapshot(snapshot);
        self.snapshots
            .get(&id)
            .cloned()
            .ok_or_else(|| GraphError::Consistency(format!("snapshot {} lost on insert", id)))
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<GraphSnapshot>> {
        self.snapshots.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.snapshots.contains_key(id)
    }

    /// Remove a snapshot explicitly.
    pub fn remove(&mut self, id: &str) -> Option<Arc<GraphSnapshot>> {
        let removed = self.snapshots.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(removed)
    }

    /// Snapshot with the greatest timestamp; the later insertion wins ties.
    #[must_use]
    pub fn get_latest(&self) -> Option<&Arc<GraphSnapshot>> {
        self.order
            .iter()
            .filter_map(|id| self.snapshots.get(id))
            .max_by_key(|snapshot| snapshot.timestamp())
    }

    /// Snapshots with `start <= timestamp <= end`, ascending by timestamp.
    #[must_use]
    pub fn get_snapshots_in_range(&self, start: i64, end: i64) -> Vec<&Arc<GraphSnapshot>> {
        let mut in_range: Vec<_> = self
            .order
            .iter()
            .filter_map(|id| self.snapshots.get(id))
            .filter(|snapshot| (start..=end).contains(&snapshot.timestamp()))
            .collect();
        in_range.sort_by_key(|snapshot| snapshot.timestamp());
        in_range
    }

    /// Approximate memory use: the sum of serialized snapshot lengths.
    #[must_use]
    pub fn get_memory_usage(&self) -> usize {
        self.snapshots
            .values()
            .map(|snapshot| snapshot.serialized_len())
            .fold(0usize, usize::saturating_add)
    }

    /// Diff between two retained snapshots, going from `from_id` to `to_id`.
    #[must_use]
    pub fn diff(&self, from_id: &str, to_id: &str) -> Option<SnapshotDiff> {
        let from = self.snapshots.get(from_id)?;
        let to = self.snapshots.get(to_id)?;
        Some(from.diff(to))
    }

    /// Retained ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.order.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================
