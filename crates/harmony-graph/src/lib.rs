//! # harmony-graph
//!
//! The in-memory typed graph engine core.
//!
//! Four components, each usable on its own:
//!
//! - `schema`: node/edge type registry with property validation and
//!   whole-graph constraints
//! - `snapshot`: immutable, checksummed point-in-time copies of a graph with
//!   structural diffing and bounded FIFO retention
//! - `plan`: staged execution plans with topological ordering, frontier
//!   queries, and cost-based optimization
//! - `subscription`: priority-ordered matching of edge events to subscribers
//!
//! `Engine` composes them under an `EngineConfig`.
//!
//! ## Architectural Constraints
//!
//! - Synchronous and non-blocking: no I/O, no async, no threads spawned
//! - Deterministic: ordered collections, integer costs, canonical serialization
//! - Validation failures are values (`ValidationResult`); everything else that
//!   can fail returns `GraphError`
//! - Library code logs through `tracing` and never installs a subscriber

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod engine;
pub mod plan;
pub mod primitives;
pub mod schema;
pub mod snapshot;
pub mod subscription;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{Edge, ErrorKind, GraphData, GraphError, Node};

// =============================================================================
// RE-EXPORTS: Components
// =============================================================================

pub use config::{EngineConfig, SnapshotConfig, SubscriptionConfig};
pub use engine::{Engine, SharedEngine};
pub use plan::{
    ExecutionNode, ExecutionPlan, ExecutionPlanBuilder, ExecutionStage, OptimizeOptions,
    PlanRecord, PlanStats, StageMetadata,
};
pub use schema::{
    EdgeTypeDefinition, GraphConstraint, NodeTypeDefinition, PropertyDefinition, PropertyKind,
    PropertyValidator, SchemaConstraint, SchemaExport, SchemaRegistry, ValidationResult,
    ValidatorTable,
};
pub use snapshot::{GraphSnapshot, SnapshotDiff, SnapshotManager, SnapshotMetadata, SnapshotRecord};
pub use subscription::{
    Direction, EdgeEvent, EdgeSubscription, EdgeSubscriptionRegistry, SubscriptionMetadata,
    SubscriptionRecord,
};
