//! # Plan Module
//!
//! Staged query execution plans.
//!
//! - `stage`: execution nodes, stages, binding conflict detection
//! - `execution`: the plan DAG, ordering, frontier, JSON form
//! - `optimize`: stage merging and node reordering
//! - `builder`: fluent assembly

mod builder;
mod execution;
mod optimize;
mod stage;

pub use builder::ExecutionPlanBuilder;
pub use execution::{ExecutionPlan, PlanRecord, PlanStats};
pub use optimize::OptimizeOptions;
pub use stage::{ExecutionNode, ExecutionStage, StageMetadata};
