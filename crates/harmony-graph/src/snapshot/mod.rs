//! # Snapshot Module
//!
//! Immutable point-in-time copies of graph state.
//!
//! - `graph_snapshot`: capture, integrity, diff, merge, JSON form
//! - `manager`: bounded FIFO retention
//! - `checksum`: canonical serialization and the drift-detection digest

mod checksum;
mod diff;
mod graph_snapshot;
mod manager;

pub use checksum::{canonical_json, rolling_hash};
pub use diff::SnapshotDiff;
pub use graph_snapshot::{GraphSnapshot, RESERVED_METADATA_KEYS, SnapshotMetadata, SnapshotRecord};
pub use manager::SnapshotManager;

pub(crate) use graph_snapshot::now_millis;
