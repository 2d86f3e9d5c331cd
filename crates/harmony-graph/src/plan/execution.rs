//! # Execution Plan
//!
//! A DAG of stages compiled from a query.
//!
//! The plan declares logical parallelism only: an external executor walks
//! `get_execution_order()` or repeatedly asks `get_parallel_stages()` for the
//! runnable frontier and dispatches the nodes itself.
//!
//! ## Invariants
//!
//! - Stage ids are unique within a plan
//! - Every stage has at least one node
//! - `add_stage` only accepts dependencies on stages already in the plan
//! - Metrics are recomputed after every mutation

use super::stage::{ExecutionNode, ExecutionStage};
use crate::primitives::STAGE_ID_PREFIX;
use crate::snapshot::now_millis;
use crate::GraphError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Counters describing a plan's shape and optimization history.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStats {
    pub stage_count: usize,
    pub node_count: usize,
    /// Original stages folded into merged stages.
    #[serde(default)]
    pub stages_merged: usize,
    /// Stages whose node order changed during optimization.
    #[serde(default)]
    pub stages_reordered: usize,
}

/// JSON form: `{queryId, stages, metadata, totalEstimatedCost, maxParallelism, stats, createdAt}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRecord {
    pub query_id: String,
    pub stages: Vec<ExecutionStage>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub total_estimated_cost: u64,
    #[serde(default)]
    pub max_parallelism: usize,
    #[serde(default)]
    pub stats: PlanStats,
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    query_id: String,
    pub(crate) stages: Vec<ExecutionStage>,
    metadata: Map<String, Value>,
    total_estimated_cost: u64,
    max_parallelism: usize,
    pub(crate) stats: PlanStats,
    created_at: i64,
}

impl ExecutionPlan {
    /// Empty plan for `query_id`.
    #[must_use]
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            stages: Vec::new(),
            metadata: Map::new(),
            total_estimated_cost: 0,
            max_parallelism: 0,
            stats: PlanStats::default(),
            created_at: now_millis(),
        }
    }

    /// Append a stage and return its id.
    ///
    /// Assigns `stage-<n>` when the id is empty and derives the cost from the
    /// nodes when it is zero. Dependencies must already be in the plan.
    pub fn add_stage(&mut self, mut stage: ExecutionStage) -> Result<String, GraphError> {
        if stage.nodes.is_empty() {
            let name = if stage.stage_id.is_empty() {
                "<unnamed>"
            } else {
                stage.stage_id.as_str()
            };
            return Err(GraphError::InvalidStage(format!(
                "stage '{}' has no nodes",
                name
            )));
        }

        if stage.stage_id.is_empty() {
            stage.stage_id = self.next_stage_id();
        } else if self.stage(&stage.stage_id).is_some() {
            return Err(GraphError::DuplicateStage(stage.stage_id));
        }

        if let Some(missing) = stage
            .dependencies
            .iter()
            .find(|dep| self.stage(dep).is_none())
        {
            return Err(GraphError::UnknownDependency {
                stage: stage.stage_id.clone(),
                dependency: missing.clone(),
            });
        }

        if stage.estimated_cost == 0 {
            stage.estimated_cost = stage.node_cost();
        }

        tracing::debug!(
            query_id = %self.query_id,
            stage_id = %stage.stage_id,
            nodes = stage.nodes.len(),
            dependencies = stage.dependencies.len(),
            "added stage"
        );

        let id = stage.stage_id.clone();
        self.stages.push(stage);
        self.recalculate_metrics();
        Ok(id)
    }

    fn next_stage_id(&self) -> String {
        let mut n = self.stages.len();
        loop {
            let candidate = format!("{}-{}", STAGE_ID_PREFIX, n);
            if self.stage(&candidate).is_none() {
                return candidate;
            }
            n = n.saturating_add(1);
        }
    }

    /// Stages in an order where each follows all of its dependencies.
    ///
    /// Repeatedly scans the unscheduled stages, appending every stage whose
    /// dependencies are all scheduled. A scan without progress means a cycle.
    /// O(stages²) in the worst case.
    pub fn get_execution_order(&self) -> Result<Vec<&ExecutionStage>, GraphError> {
        let mut scheduled: BTreeSet<&str> = BTreeSet::new();
        let mut order = Vec::with_capacity(self.stages.len());

        while order.len() < self.stages.len() {
            let mut progressed = false;
            for stage in &self.stages {
                if scheduled.contains(stage.stage_id.as_str()) {
                    continue;
                }
                if stage
                    .dependencies
                    .iter()
                    .all(|dep| scheduled.contains(dep.as_str()))
                {
                    scheduled.insert(stage.stage_id.as_str());
                    order.push(stage);
                    progressed = true;
                }
            }

            if !progressed {
                let stuck: Vec<String> = self
                    .stages
                    .iter()
                    .filter(|s| !scheduled.contains(s.stage_id.as_str()))
                    .map(|s| s.stage_id.clone())
                    .collect();
                tracing::warn!(query_id = %self.query_id, stuck = ?stuck, "stage graph has a cycle");
                return Err(GraphError::CircularDependency(stuck));
            }
        }

        Ok(order)
    }

    /// Stages not in `completed` whose dependencies are all in `completed`.
    #[must_use]
    pub fn get_parallel_stages(&self, completed: &BTreeSet<String>) -> Vec<&ExecutionStage> {
        self.stages
            .iter()
            .filter(|stage| !completed.contains(&stage.stage_id))
            .filter(|stage| stage.dependencies.iter().all(|dep| completed.contains(dep)))
            .collect()
    }

    /// `(stage id, binding)` pairs where nodes of one stage share state.
    #[must_use]
    pub fn binding_conflicts(&self) -> Vec<(String, String)> {
        self.stages
            .iter()
            .filter(|stage| stage.can_parallelize)
            .flat_map(|stage| {
                stage
                    .binding_conflicts()
                    .into_iter()
                    .map(move |binding| (stage.stage_id.clone(), binding))
            })
            .collect()
    }

    /// Fail if any parallelizable stage has nodes sharing a binding.
    ///
    /// Opt-in: plans are accepted without this check, and executors that do
    /// not call it take responsibility for stage independence.
    pub fn check_stage_independence(&self) -> Result<(), GraphError> {
        match self.binding_conflicts().into_iter().next() {
            Some((stage, binding)) => Err(GraphError::BindingConflict { stage, binding }),
            None => Ok(()),
        }
    }

    /// Recompute total cost, widest stage, and shape counters.
    pub(crate) fn recalculate_metrics(&mut self) {
        self.total_estimated_cost = self
            .stages
            .iter()
            .fold(0u64, |acc, stage| acc.saturating_add(stage.estimated_cost));
        self.max_parallelism = self
            .stages
            .iter()
            .map(|stage| stage.nodes.len())
            .max()
            .unwrap_or(0);
        self.stats.stage_count = self.stages.len();
        self.stats.node_count = self.stages.iter().map(|stage| stage.nodes.len()).sum();
    }

    // -------------------------------------------------------------------------
    // Convenience constructors
    // -------------------------------------------------------------------------

    /// One node per stage, each stage depending on the previous one.
    pub fn create_sequential(
        query_id: impl Into<String>,
        nodes: Vec<ExecutionNode>,
    ) -> Result<ExecutionPlan, GraphError> {
        let mut plan = ExecutionPlan::new(query_id);
        let mut previous: Option<String> = None;
        for node in nodes {
            let mut stage = ExecutionStage::new(vec![node]).sequential();
            if let Some(prev) = previous.take() {
                stage = stage.depends_on(prev);
            }
            previous = Some(plan.add_stage(stage)?);
        }
        Ok(plan)
    }

    /// All nodes in a single dependency-free stage.
    pub fn create_parallel(
        query_id: impl Into<String>,
        nodes: Vec<ExecutionNode>,
    ) -> Result<ExecutionPlan, GraphError> {
        let mut plan = ExecutionPlan::new(query_id);
        if !nodes.is_empty() {
            plan.add_stage(ExecutionStage::new(nodes))?;
        }
        Ok(plan)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    #[must_use]
    pub fn stages(&self) -> &[ExecutionStage] {
        &self.stages
    }

    #[must_use]
    pub fn stage(&self, stage_id: &str) -> Option<&ExecutionStage> {
        self.stages.iter().find(|stage| stage.stage_id == stage_id)
    }

    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn total_estimated_cost(&self) -> u64 {
        self.total_estimated_cost
    }

    /// Node count of the widest stage.
    #[must_use]
    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    #[must_use]
    pub fn stats(&self) -> &PlanStats {
        &self.stats
    }

    /// Creation time in epoch milliseconds.
    #[must_use]
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    // -------------------------------------------------------------------------
    // Serialization
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn to_record(&self) -> PlanRecord {
        PlanRecord {
            query_id: self.query_id.clone(),
            stages: self.stages.clone(),
            metadata: self.metadata.clone(),
            total_estimated_cost: self.total_estimated_cost,
            max_parallelism: self.max_parallelism,
            stats: self.stats.clone(),
            created_at: self.created_at,
        }
    }

    /// Rebuild a plan from its record.
    ///
    /// Checks ids and dependency references but not their order, so a cyclic
    /// record loads and fails later in `get_execution_order`.
    pub fn from_record(record: PlanRecord) -> Result<ExecutionPlan, GraphError> {
        let mut ids = BTreeSet::new();
        for stage in &record.stages {
            if stage.stage_id.is_empty() {
                return Err(GraphError::InvalidStage("stage id is empty".to_string()));
            }
            if stage.nodes.is_empty() {
                return Err(GraphError::InvalidStage(format!(
                    "stage '{}' has no nodes",
                    stage.stage_id
                )));
            }
            if !ids.insert(stage.stage_id.as_str()) {
                return Err(GraphError::DuplicateStage(stage.stage_id.clone()));
            }
        }
        for stage in &record.stages {
            if let Some(missing) = stage
                .dependencies
                .iter()
                .find(|dep| !ids.contains(dep.as_str()))
            {
                return Err(GraphError::UnknownDependency {
                    stage: stage.stage_id.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        let mut plan = ExecutionPlan {
            query_id: record.query_id,
            stages: record.stages,
            metadata: record.metadata,
            total_estimated_cost: 0,
            max_parallelism: 0,
            stats: record.stats,
            created_at: record.created_at,
        };
        plan.recalculate_metrics();
        Ok(plan)
    }

    pub fn to_json(&self) -> Result<String, GraphError> {
        serde_json::to_string(&self.to_record())
            .map_err(|e| GraphError::SerializationError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<ExecutionPlan, GraphError> {
        let record: PlanRecord = serde_json::from_str(json)
            .map_err(|e| GraphError::DeserializationError(e.to_string()))?;
        Self::from_record(record)
    }
}

// =============================================================================
// TESTS
// =============================================================================
