//! Fluent plan assembly.

use super::execution::ExecutionPlan;
use super::stage::{ExecutionNode, ExecutionStage};
use crate::GraphError;
use serde_json::Value;

/// Builds an [`ExecutionPlan`] stage by stage.
///
/// ```
/// use harmony_graph::{ExecutionNode, ExecutionPlanBuilder};
///
/// let plan = ExecutionPlanBuilder::new("q1")
///     .start_stage_named("scan")
///     .add_node(ExecutionNode::new("users", "scan").with_cost(10))
///     .add_node(ExecutionNode::new("orders", "scan").with_cost(20))
///     .end_stage()
///     .start_stage()
///     .depends_on("scan")
///     .add_node(ExecutionNode::new("join", "join"))
///     .build()
///     .expect("valid plan");
///
/// assert_eq!(plan.stages().len(), 2);
/// ```
///
/// The first error is kept and returned by `build`; later calls become no-ops.
#[derive(Debug)]
pub struct ExecutionPlanBuilder {
    plan: ExecutionPlan,
    current: Option<ExecutionStage>,
    error: Option<GraphError>,
}

impl ExecutionPlanBuilder {
    #[must_use]
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            plan: ExecutionPlan::new(query_id),
            current: None,
            error: None,
        }
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.plan.set_metadata(key, value);
        self
    }

    /// Open a stage with an assigned id, closing any open stage first.
    #[must_use]
    pub fn start_stage(self) -> Self {
        self.open(ExecutionStage::new(Vec::new()))
    }

    #[must_use]
    pub fn start_stage_named(self, stage_id: impl Into<String>) -> Self {
        self.open(ExecutionStage::new(Vec::new()).with_id(stage_id))
    }

    /// Make the open stage depend on `stage_id`.
    #[must_use]
    pub fn depends_on(self, stage_id: impl Into<String>) -> Self {
        let stage_id = stage_id.into();
        self.with_current("depends_on", |stage| stage.dependencies.push(stage_id))
    }

    /// Mark the open stage as not parallelizable.
    #[must_use]
    pub fn sequential(self) -> Self {
        self.with_current("sequential", |stage| stage.can_parallelize = false)
    }

    #[must_use]
    pub fn add_node(self, node: ExecutionNode) -> Self {
        self.with_current("add_node", |stage| stage.nodes.push(node))
    }

    /// Close the open stage and add it to the plan.
    #[must_use]
    pub fn end_stage(mut self) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.current.take() {
            Some(stage) => {
                if let Err(e) = self.plan.add_stage(stage) {
                    self.error = Some(e);
                }
            }
            None => {
                self.error = Some(GraphError::Builder("end_stage without an open stage".into()));
            }
        }
        self
    }

    /// Close any open stage and return the plan.
    pub fn build(mut self) -> Result<ExecutionPlan, GraphError> {
        if self.current.is_some() {
            self = self.end_stage();
        }
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.plan),
        }
    }

    fn open(mut self, stage: ExecutionStage) -> Self {
        if self.current.is_some() {
            self = self.end_stage();
        }
        if self.error.is_none() {
            self.current = Some(stage);
        }
        self
    }

    fn with_current(mut self, call: &str, f: impl FnOnce(&mut ExecutionStage)) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.current.as_mut() {
            Some(stage) => f(stage),
            None => {
                self.error = Some(GraphError::Builder(format!(
                    "{} called without an open stage",
                    call
                )));
            }
        }
        self
    }
}
