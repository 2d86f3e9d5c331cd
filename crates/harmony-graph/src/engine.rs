//! # Engine Module
//!
//! Facade combining the schema registry, snapshot store, and subscription
//! registry under one configuration.
//!
//! - `validate` checks a graph against the schema
//! - `checkpoint` validates, then captures and retains a snapshot
//! - `dispatch` fans an edge event out to matching subscriptions
//! - `optimize` applies the configured planner passes
//!
//! The engine is plain data with `&mut self` writers. For cross-thread use
//! wrap it with [`Engine::into_shared`], which serializes writers behind a
//! reader-writer lock.

use crate::config::EngineConfig;
use crate::plan::{ExecutionPlan, OptimizeOptions};
use crate::schema::{SchemaRegistry, ValidationResult};
use crate::snapshot::{GraphSnapshot, SnapshotManager};
use crate::subscription::{
    EdgeEvent, EdgeSubscription, EdgeSubscriptionRegistry, SubscriptionRecord,
};
use crate::{GraphData, GraphError};
use parking_lot::RwLock;
use std::sync::Arc;

/// An engine shared across threads.
pub type SharedEngine = Arc<RwLock<Engine>>;

#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    schema: SchemaRegistry,
    snapshots: SnapshotManager,
    subscriptions: EdgeSubscriptionRegistry,
}

impl Engine {
    /// Create an engine with an empty schema.
    pub fn new(config: EngineConfig) -> Result<Self, GraphError> {
        Self::with_schema(config, SchemaRegistry::new())
    }

    /// Create an engine around an existing schema.
    pub fn with_schema(config: EngineConfig, schema: SchemaRegistry) -> Result<Self, GraphError> {
        config.validate()?;
        Ok(Self {
            snapshots: SnapshotManager::new(config.snapshots.max_snapshots),
            subscriptions: EdgeSubscriptionRegistry::new(),
            schema,
            config,
        })
    }

    /// Move the engine behind `Arc<RwLock<_>>`.
    #[must_use]
    pub fn into_shared(self) -> SharedEngine {
        Arc::new(RwLock::new(self))
    }

    // =========================================================================
    // SCHEMA
    // =========================================================================

    pub fn validate(&self, graph: &GraphData) -> ValidationResult {
        self.schema.validate_graph(graph)
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Validate `graph` and, if it passes, capture and retain a snapshot.
    pub fn checkpoint(&mut self, graph: &GraphData) -> Result<Arc<GraphSnapshot>, GraphError> {
        let result = self.validate(graph);
        if !result.valid {
            tracing::warn!(errors = result.errors.len(), "checkpoint refused: graph is invalid");
            return Err(GraphError::InvalidGraph(result.errors));
        }
        let snapshot = self.snapshots.capture(graph)?;
        tracing::debug!(
            snapshot_id = %snapshot.id(),
            nodes = snapshot.node_count(),
            edges = snapshot.edge_count(),
            "checkpoint captured"
        );
        Ok(snapshot)
    }

    /// Load a serialized snapshot, verify it, and retain it.
    pub fn restore(&mut self, json: &str) -> Result<Arc<GraphSnapshot>, GraphError> {
        let snapshot = GraphSnapshot::from_json(json)?;
        let id = snapshot.id().to_string();
        self.snapshots.add_snapshot(snapshot);
        self.snapshots
            .get(&id)
            .cloned()
            .ok_or_else(|| GraphError::Consistency(format!("snapshot {} lost on insert", id)))
    }

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    /// Build and register a subscription, applying the configured default
    /// priority when the record has none.
    pub fn subscribe(&mut self, mut record: SubscriptionRecord) -> Result<(), GraphError> {
        if record.priority.is_none() {
            record.priority = Some(i64::from(self.config.subscriptions.default_priority));
        }
        let subscription = EdgeSubscription::from_record(record)?;
        self.subscriptions.register(subscription)
    }

    pub fn unsubscribe(&mut self, id: &str) -> Option<EdgeSubscription> {
        self.subscriptions.unregister(id)
    }

    /// Subscriptions for `event`, highest priority first.
    ///
    /// When the event carries a direction, subscriptions that cannot accept
    /// it are dropped.
    #[must_use]
    pub fn dispatch(&self, event: &EdgeEvent) -> Vec<&EdgeSubscription> {
        let mut matched = self.subscriptions.find_matching(event);
        if let Some(direction) = event.direction {
            matched.retain(|subscription| subscription.is_direction_compatible(direction));
        }
        matched
    }

    // =========================================================================
    // PLANNER
    // =========================================================================

    #[must_use]
    pub fn plan_optimizer(&self) -> OptimizeOptions {
        self.config.planner
    }

    #[must_use]
    pub fn optimize(&self, plan: &ExecutionPlan) -> ExecutionPlan {
        plan.optimize(&self.config.planner)
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn schema_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.schema
    }

    #[must_use]
    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn snapshots_mut(&mut self) -> &mut SnapshotManager {
        &mut self.snapshots
    }

    #[must_use]
    pub fn subscriptions(&self) -> &EdgeSubscriptionRegistry {
        &self.subscriptions
    }

    pub fn subscriptions_mut(&mut self) -> &mut EdgeSubscriptionRegistry {
        &mut self.subscriptions
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ExecutionNode;
    use crate::schema::{NodeTypeDefinition, PropertyDefinition, PropertyKind};
    use crate::subscription::Direction;
    use crate::Node;
    use std::thread;

    fn engine() -> Engine {
        let mut engine = Engine::new(EngineConfig::default()).expect("engine");
        engine
            .schema_mut()
            .register_node_type(
                NodeTypeDefinition::new("sensor", "Sensor")
                    .property("value", PropertyDefinition::new(PropertyKind::Number))
                    .require("value"),
            )
            .expect("register");
        engine
    }

    #[test]
    fn checkpoint_refuses_invalid_graph() {
        let mut engine = engine();
        let bad = GraphData::new().with_node(Node::new("s1", "sensor"));

        let err = engine.checkpoint(&bad).expect_err("invalid");
        assert!(matches!(err, GraphError::InvalidGraph(ref errors) if errors.len() == 1));
        assert!(engine.snapshots().is_empty());

        let good = GraphData::new().with_node(Node::new("s1", "sensor").with_property("value", 5));
        let snapshot = engine.checkpoint(&good).expect("valid");
        assert!(snapshot.verify_integrity());
        assert_eq!(engine.snapshots().len(), 1);
    }

    #[test]
    fn restore_retains_verified_snapshot() {
        let mut engine = engine();
        let graph = GraphData::new().with_node(Node::new("s1", "sensor").with_property("value", 1));
        let json = GraphSnapshot::capture(&graph).expect("capture").to_json().expect("json");

        let restored = engine.restore(&json).expect("restore");
        assert!(engine.snapshots().contains(restored.id()));

        let tampered = json.replacen("\"value\":1", "\"value\":2", 1);
        assert!(matches!(engine.restore(&tampered), Err(GraphError::Integrity { .. })));
    }

    #[test]
    fn subscribe_uses_configured_default_priority() {
        let config = EngineConfig::from_toml_str("[subscriptions]\ndefault_priority = 70")
            .expect("config");
        let mut engine = Engine::new(config).expect("engine");
        engine
            .subscribe(SubscriptionRecord::new("edge-sub-a", ["Linked"]))
            .expect("subscribe");

        assert_eq!(engine.subscriptions().get("edge-sub-a").map(|s| s.priority()), Some(70));
    }

    #[test]
    fn dispatch_filters_by_direction() {
        let mut engine = engine();
        engine
            .subscribe(SubscriptionRecord::new("edge-sub-fwd", ["Linked"]).priority(10))
            .expect("subscribe");
        engine
            .subscribe(
                SubscriptionRecord::new("edge-sub-both", ["Linked"])
                    .direction(Direction::Bidirectional)
                    .priority(90),
            )
            .expect("subscribe");

        let ids = |subs: Vec<&EdgeSubscription>| -> Vec<String> {
            subs.into_iter().map(|s| s.id().to_string()).collect()
        };

        assert_eq!(
            ids(engine.dispatch(&EdgeEvent::new("Linked"))),
            vec!["edge-sub-both", "edge-sub-fwd"]
        );
        assert_eq!(
            ids(engine.dispatch(&EdgeEvent::new("Linked").with_direction(Direction::Backward))),
            vec!["edge-sub-both"]
        );
    }

    #[test]
    fn optimize_uses_planner_config() {
        let config = EngineConfig::from_toml_str("[planner]\nmerge_stages = false").expect("config");
        let engine = Engine::new(config).expect("engine");
        let plan = ExecutionPlan::create_parallel("q", vec![ExecutionNode::new("a", "scan")])
            .expect("plan");

        assert!(!engine.plan_optimizer().merge_stages);
        assert_eq!(engine.optimize(&plan).stages().len(), 1);
    }

    #[test]
    fn shared_engine_serves_concurrent_readers() {
        let shared = engine().into_shared();
        shared
            .write()
            .subscribe(SubscriptionRecord::new("edge-sub-a", ["Linked"]))
            .expect("subscribe");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || shared.read().dispatch(&EdgeEvent::new("Linked")).len())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().expect("thread"), 1);
        }
    }
}
