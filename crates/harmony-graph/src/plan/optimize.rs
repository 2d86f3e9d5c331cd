//! # Plan Optimization
//!
//! `ExecutionPlan::optimize` returns a new plan and never touches its receiver.
//!
//! Passes, in order:
//!
//! 1. **Merge**: parallelizable stages with identical dependency sets are
//!    packed first-fit into bins of at most `max_parallelism` nodes. Bins of
//!    two or more stages become one stage `merged-<ids>` tagged with the
//!    original ids, and dependents are rewritten to point at it. A stage is
//!    never packed with another when their nodes would share a binding.
//! 2. **Reorder**: nodes of every parallelizable stage are stably sorted by
//!    descending estimated cost.

use super::execution::ExecutionPlan;
use super::stage::{ExecutionStage, StageMetadata, binding_conflicts};
use crate::primitives::DEFAULT_MAX_PARALLELISM;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

/// Optimization switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeOptions {
    pub merge_stages: bool,
    pub reorder_nodes: bool,
    /// Node-count ceiling for a merged stage.
    pub max_parallelism: usize,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            merge_stages: true,
            reorder_nodes: true,
            max_parallelism: DEFAULT_MAX_PARALLELISM,
        }
    }
}

impl ExecutionPlan {
    /// Produce an optimized copy of this plan.
    #[must_use]
    pub fn optimize(&self, options: &OptimizeOptions) -> ExecutionPlan {
        let mut plan = self.clone();

        if options.merge_stages {
            let merged = merge_stages(&mut plan.stages, options.max_parallelism.max(1));
            plan.stats.stages_merged = plan.stats.stages_merged.saturating_add(merged);
        }

        if options.reorder_nodes {
            let reordered = reorder_nodes(&mut plan.stages);
            plan.stats.stages_reordered = plan.stats.stages_reordered.saturating_add(reordered);
        }

        plan.recalculate_metrics();

        tracing::debug!(
            query_id = %plan.query_id(),
            before = self.stages.len(),
            after = plan.stages.len(),
            merged = plan.stats.stages_merged,
            reordered = plan.stats.stages_reordered,
            "optimized plan"
        );

        plan
    }
}

// =============================================================================
// MERGE
// =============================================================================

/// Pack stages into bins, rewrite the stage list, and return the number of
/// original stages folded into merged ones.
fn merge_stages(stages: &mut Vec<ExecutionStage>, capacity: usize) -> usize {
    // Phase 1: first-fit packing per dependency set, in insertion order.
    let mut bins: Vec<Vec<usize>> = Vec::new();
    let mut open: BTreeMap<BTreeSet<&str>, Vec<usize>> = BTreeMap::new();

    for (index, stage) in stages.iter().enumerate() {
        if !stage.can_parallelize {
            bins.push(vec![index]);
            continue;
        }

        let key: BTreeSet<&str> = stage.dependencies.iter().map(String::as_str).collect();
        let candidates = open.entry(key).or_default();

        let target = candidates.iter().copied().find(|&bin| {
            let members = &bins[bin];
            let width: usize = members.iter().map(|&m| stages[m].nodes.len()).sum();
            width.saturating_add(stage.nodes.len()) <= capacity
                && binding_conflicts(
                    members
                        .iter()
                        .flat_map(|&m| stages[m].nodes.iter())
                        .chain(stage.nodes.iter()),
                )
                .is_empty()
        });

        match target {
            Some(bin) => bins[bin].push(index),
            None => {
                candidates.push(bins.len());
                bins.push(vec![index]);
            }
        }
    }
    drop(open);

    if bins.iter().all(|members| members.len() == 1) {
        return 0;
    }

    // Phase 2: emit one stage per bin at the position of its first member.
    let mut slots: Vec<Option<ExecutionStage>> =
        std::mem::take(stages).into_iter().map(Some).collect();
    let mut alias: BTreeMap<String, String> = BTreeMap::new();
    let mut used: BTreeSet<String> = slots
        .iter()
        .flatten()
        .map(|stage| stage.stage_id.clone())
        .collect();
    let mut folded = 0usize;

    for members in bins {
        let taken: Vec<ExecutionStage> = members
            .iter()
            .filter_map(|&m| slots.get_mut(m).and_then(Option::take))
            .collect();

        if taken.len() == 1 {
            stages.extend(taken);
            continue;
        }

        folded = folded.saturating_add(taken.len());
        let original: Vec<String> = taken.iter().map(|s| s.stage_id.clone()).collect();
        let merged_id = unique_id(format!("merged-{}", original.join("-")), &mut used);
        for id in &original {
            alias.insert(id.clone(), merged_id.clone());
        }

        let mut merged = ExecutionStage::new(Vec::new()).with_id(merged_id);
        for stage in taken {
            if merged.dependencies.is_empty() {
                merged.dependencies = stage.dependencies;
            }
            merged.estimated_cost = merged.estimated_cost.saturating_add(stage.estimated_cost);
            merged.nodes.extend(stage.nodes);
        }
        merged.metadata = StageMetadata {
            merged: true,
            original_stages: original,
        };
        stages.push(merged);
    }

    // Rewrite references to stages that no longer exist.
    for stage in stages.iter_mut() {
        let mut seen = BTreeSet::new();
        stage.dependencies = std::mem::take(&mut stage.dependencies)
            .into_iter()
            .map(|dep| alias.get(&dep).cloned().unwrap_or(dep))
            .filter(|dep| seen.insert(dep.clone()))
            .collect();
    }

    folded
}

/// `base`, or `base-<n>` with the smallest `n` not yet in `used`.
fn unique_id(base: String, used: &mut BTreeSet<String>) -> String {
    let mut candidate = base.clone();
    let mut n = 1usize;
    while used.contains(&candidate) {
        candidate = format!("{}-{}", base, n);
        n = n.saturating_add(1);
    }
    used.insert(candidate.clone());
    candidate
}

// =============================================================================
// REORDER
// =============================================================================

/// Heaviest node first in every parallelizable stage. Returns how many
/// stages changed order.
fn reorder_nodes(stages: &mut [ExecutionStage]) -> usize {
    let mut changed = 0usize;
    for stage in stages.iter_mut().filter(|s| s.can_parallelize) {
        let before: Vec<String> = stage.nodes.iter().map(|n| n.node_id.clone()).collect();
        stage.nodes.sort_by_key(|node| Reverse(node.estimated_cost));
        if stage
            .nodes
            .iter()
            .map(|n| n.node_id.as_str())
            .ne(before.iter().map(String::as_str))
        {
            changed = changed.saturating_add(1);
        }
    }
    changed
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ExecutionNode;

    fn stage(id: &str, costs: &[u64]) -> ExecutionStage {
        let nodes = costs
            .iter()
            .enumerate()
            .map(|(i, &cost)| ExecutionNode::new(format!("{}-n{}", id, i), "scan").with_cost(cost))
            .collect();
        ExecutionStage::new(nodes).with_id(id)
    }

    fn plan_of(stages: Vec<ExecutionStage>) -> ExecutionPlan {
        let mut plan = ExecutionPlan::new("q");
        for s in stages {
            plan.add_stage(s).expect("stage");
        }
        plan
    }

    #[test]
    fn merges_siblings_within_capacity() {
        let plan = plan_of(vec![stage("a", &[1, 2]), stage("b", &[3, 4])]);
        let optimized = plan.optimize(&OptimizeOptions::default());

        assert_eq!(optimized.stages().len(), 1);
        let merged = &optimized.stages()[0];
        assert_eq!(merged.nodes.len(), 4);
        assert!(merged.metadata.merged);
        assert_eq!(merged.metadata.original_stages, vec!["a", "b"]);
        assert_eq!(merged.estimated_cost, 10);
        assert_eq!(optimized.stats().stages_merged, 2);

        // Receiver untouched.
        assert_eq!(plan.stages().len(), 2);
        assert_eq!(plan.stats().stages_merged, 0);
    }

    #[test]
    fn respects_capacity() {
        let plan = plan_of(vec![stage("a", &[1, 1, 1]), stage("b", &[1, 1]), stage("c", &[1])]);
        let optimized = plan.optimize(&OptimizeOptions {
            max_parallelism: 4,
            reorder_nodes: false,
            ..OptimizeOptions::default()
        });

        let ids: Vec<&str> = optimized.stages().iter().map(|s| s.stage_id.as_str()).collect();
        assert_eq!(ids, vec!["merged-a-c", "b"]);
        assert!(optimized.stages().iter().all(|s| s.nodes.len() <= 4));
    }

    #[test]
    fn dependents_follow_merged_stage() {
        let plan = plan_of(vec![
            stage("a", &[1]),
            stage("b", &[1]),
            stage("c", &[1]).depends_on("a").depends_on("b"),
        ]);
        let optimized = plan.optimize(&OptimizeOptions::default());

        let last = optimized.stages().last().expect("stage");
        assert_eq!(last.stage_id, "c");
        assert_eq!(last.dependencies, vec!["merged-a-b"]);
        assert_eq!(optimized.get_execution_order().expect("order").len(), 2);
    }

    #[test]
    fn different_dependencies_stay_apart() {
        let plan = plan_of(vec![
            stage("root", &[1]),
            stage("a", &[1]).depends_on("root"),
            stage("b", &[1]),
        ]);
        let optimized = plan.optimize(&OptimizeOptions::default());

        let ids: BTreeSet<&str> = optimized.stages().iter().map(|s| s.stage_id.as_str()).collect();
        assert!(ids.contains("a"));
        assert!(ids.contains("merged-root-b"));
    }

    #[test]
    fn sequential_and_conflicting_stages_are_not_merged() {
        let mut plan = ExecutionPlan::new("q");
        plan.add_stage(stage("a", &[1]).sequential()).expect("a");
        plan.add_stage(stage("b", &[1]).sequential()).expect("b");
        plan.add_stage(ExecutionStage::new(vec![ExecutionNode::new("w1", "op").writes("x")]).with_id("c"))
            .expect("c");
        plan.add_stage(ExecutionStage::new(vec![ExecutionNode::new("w2", "op").writes("x")]).with_id("d"))
            .expect("d");

        let optimized = plan.optimize(&OptimizeOptions::default());
        assert_eq!(optimized.stages().len(), 4);
        assert_eq!(optimized.stats().stages_merged, 0);
    }

    #[test]
    fn merged_id_avoids_existing_stage_id() {
        let mut plan = ExecutionPlan::new("q");
        plan.add_stage(stage("merged-a-b", &[1]).sequential()).expect("existing");
        plan.add_stage(stage("a", &[1])).expect("a");
        plan.add_stage(stage("b", &[1])).expect("b");

        let optimized = plan.optimize(&OptimizeOptions::default());
        let ids: Vec<&str> = optimized.stages().iter().map(|s| s.stage_id.as_str()).collect();
        assert_eq!(ids, vec!["merged-a-b", "merged-a-b-1"]);
        assert_eq!(optimized.get_execution_order().expect("order").len(), 2);
    }

    #[test]
    fn hyphenated_ids_get_distinct_merged_ids() {
        let mut plan = ExecutionPlan::new("q");
        plan.add_stage(stage("r", &[1]).sequential()).expect("r");
        plan.add_stage(stage("x-y", &[1])).expect("x-y");
        plan.add_stage(stage("z", &[1])).expect("z");
        plan.add_stage(stage("x", &[1]).depends_on("r")).expect("x");
        plan.add_stage(stage("y-z", &[1]).depends_on("r")).expect("y-z");
        plan.add_stage(stage("tail", &[1]).depends_on("x").depends_on("z")).expect("tail");

        let optimized = plan.optimize(&OptimizeOptions::default());
        let ids: Vec<&str> = optimized.stages().iter().map(|s| s.stage_id.as_str()).collect();
        assert_eq!(ids, vec!["r", "merged-x-y-z", "merged-x-y-z-1", "tail"]);
        assert_eq!(optimized.get_execution_order().expect("order").len(), 4);

        let tail = optimized.stage("tail").expect("tail");
        assert_eq!(tail.dependencies, vec!["merged-x-y-z-1", "merged-x-y-z"]);
    }

    #[test]
    fn reorders_heaviest_first() {
        let plan = plan_of(vec![stage("a", &[1, 9, 5])]);
        let optimized = plan.optimize(&OptimizeOptions::default());

        let costs: Vec<u64> = optimized.stages()[0].nodes.iter().map(|n| n.estimated_cost).collect();
        assert_eq!(costs, vec![9, 5, 1]);
        assert_eq!(optimized.stats().stages_reordered, 1);

        let again = optimized.optimize(&OptimizeOptions::default());
        assert_eq!(again.stats().stages_reordered, 1);
    }

    #[test]
    fn disabled_passes_only_copy() {
        let plan = plan_of(vec![stage("a", &[1, 9]), stage("b", &[2])]);
        let optimized = plan.optimize(&OptimizeOptions {
            merge_stages: false,
            reorder_nodes: false,
            max_parallelism: 4,
        });
        assert_eq!(optimized, plan);
    }
}
