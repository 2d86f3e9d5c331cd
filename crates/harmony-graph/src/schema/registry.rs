//! # Schema Registry
//!
//! Node/edge type definitions, whole-graph constraints, and validation.
//!
//! Registration is fail-fast and atomic: a rejected definition leaves the
//! registry untouched. Validation never fails; it returns every violation it
//! finds as a `ValidationResult`.

use super::property::PropertyDefinition;
use crate::{Edge, GraphData, GraphError, Node};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// TYPE DEFINITIONS
// =============================================================================

/// Definition of a node type.
#[derive(Debug, Clone, Default)]
pub struct NodeTypeDefinition {
    /// Unique type key.
    pub type_name: String,
    /// Display label.
    pub label: String,
    /// Declared properties by name.
    pub properties: BTreeMap<String, PropertyDefinition>,
    /// Property names that must be present.
    pub required_properties: BTreeSet<String>,
}

impl NodeTypeDefinition {
    /// Create a definition with no properties.
    #[must_use]
    pub fn new(type_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            label: label.into(),
            ..Self::default()
        }
    }

    /// Declare a property.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, definition: PropertyDefinition) -> Self {
        self.properties.insert(name.into(), definition);
        self
    }

    /// Require a property by name.
    #[must_use]
    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required_properties.insert(name.into());
        self
    }
}

/// Definition of an edge type.
#[derive(Debug, Clone)]
pub struct EdgeTypeDefinition {
    /// Unique type key.
    pub type_name: String,
    /// Display label.
    pub label: String,
    /// Declared properties by name.
    pub properties: BTreeMap<String, PropertyDefinition>,
    /// Property names that must be present.
    pub required_properties: BTreeSet<String>,
    /// Node types allowed as source. Empty means unrestricted.
    pub allowed_source_types: BTreeSet<String>,
    /// Node types allowed as target. Empty means unrestricted.
    pub allowed_target_types: BTreeSet<String>,
    /// Whether the edge is directed.
    pub directed: bool,
}

impl EdgeTypeDefinition {
    /// Create a directed, unrestricted definition with no properties.
    #[must_use]
    pub fn new(type_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            label: label.into(),
            properties: BTreeMap::new(),
            required_properties: BTreeSet::new(),
            allowed_source_types: BTreeSet::new(),
            allowed_target_types: BTreeSet::new(),
            directed: true,
        }
    }

    /// Declare a property.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, definition: PropertyDefinition) -> Self {
        self.properties.insert(name.into(), definition);
        self
    }

    /// Require a property by name.
    #[must_use]
    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required_properties.insert(name.into());
        self
    }

    /// Allow a node type as source.
    #[must_use]
    pub fn allow_source(mut self, node_type: impl Into<String>) -> Self {
        self.allowed_source_types.insert(node_type.into());
        self
    }

    /// Allow a node type as target.
    #[must_use]
    pub fn allow_target(mut self, node_type: impl Into<String>) -> Self {
        self.allowed_target_types.insert(node_type.into());
        self
    }

    /// Mark the edge as undirected.
    #[must_use]
    pub fn undirected(mut self) -> Self {
        self.directed = false;
        self
    }

    fn allows_source(&self, node_type: &str) -> bool {
        self.allowed_source_types.is_empty() || self.allowed_source_types.contains(node_type)
    }

    fn allows_target(&self, node_type: &str) -> bool {
        self.allowed_target_types.is_empty() || self.allowed_target_types.contains(node_type)
    }
}

// =============================================================================
// SCHEMA CONSTRAINTS
// =============================================================================

/// Whole-graph invariant check.
///
/// `Err` reports a predicate that could not be evaluated; the registry records
/// it as a constraint failure instead of propagating it.
pub trait GraphConstraint: Send + Sync {
    fn check(&self, graph: &GraphData) -> Result<bool, String>;
}

impl<F> GraphConstraint for F
where
    F: Fn(&GraphData) -> Result<bool, String> + Send + Sync,
{
    fn check(&self, graph: &GraphData) -> Result<bool, String> {
        self(graph)
    }
}

/// A named whole-graph constraint.
#[derive(Clone)]
pub struct SchemaConstraint {
    /// Unique name.
    pub name: String,
    /// Free-form category (for example "cardinality").
    pub constraint_type: String,
    /// Message reported when the constraint fails.
    pub message: String,
    predicate: Arc<dyn GraphConstraint>,
}

impl SchemaConstraint {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        constraint_type: impl Into<String>,
        message: impl Into<String>,
        predicate: impl GraphConstraint + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            constraint_type: constraint_type.into(),
            message: message.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Evaluate against a graph.
    pub fn check(&self, graph: &GraphData) -> Result<bool, String> {
        self.predicate.check(graph)
    }
}

impl fmt::Debug for SchemaConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaConstraint")
            .field("name", &self.name)
            .field("constraint_type", &self.constraint_type)
            .field("message", &self.message)
            .finish()
    }
}

// =============================================================================
// VALIDATION RESULT
// =============================================================================

/// Outcome of a validation call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    /// A passing result.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    /// Valid iff `errors` is empty.
    #[must_use]
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    fn fail(error: String) -> Self {
        Self::from_errors(vec![error])
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Registry of node/edge types and graph constraints.
///
/// Constructed explicitly and handed to consumers; there is no process-wide
/// default instance.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    node_types: BTreeMap<String, NodeTypeDefinition>,
    edge_types: BTreeMap<String, EdgeTypeDefinition>,
    /// Constraints in registration order.
    constraints: Vec<SchemaConstraint>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type.
    ///
    /// Fails on a duplicate key or an unresolvable property kind. On failure
    /// the registry is unchanged.
    pub fn register_node_type(&mut self, definition: NodeTypeDefinition) -> Result<(), GraphError> {
        if definition.type_name.is_empty() {
            return Err(GraphError::InvalidTypeDefinition(
                "node type key is empty".to_string(),
            ));
        }
        if self.node_types.contains_key(&definition.type_name) {
            return Err(GraphError::DuplicateNodeType(definition.type_name));
        }
        check_property_kinds(&definition.type_name, &definition.properties)?;

        tracing::debug!(
            type_name = %definition.type_name,
            properties = definition.properties.len(),
            "registered node type"
        );
        self.node_types
            .insert(definition.type_name.clone(), definition);
        Ok(())
    }

    /// Register an edge type.
    ///
    /// Allowed source/target types that are not registered yet are accepted
    /// with a warning; they may be registered later.
    pub fn register_edge_type(&mut self, definition: EdgeTypeDefinition) -> Result<(), GraphError> {
        if definition.type_name.is_empty() {
            return Err(GraphError::InvalidTypeDefinition(
                "edge type key is empty".to_string(),
            ));
        }
        if self.edge_types.contains_key(&definition.type_name) {
            return Err(GraphError::DuplicateEdgeType(definition.type_name));
        }
        check_property_kinds(&definition.type_name, &definition.properties)?;

        for node_type in definition
            .allowed_source_types
            .iter()
            .chain(&definition.allowed_target_types)
        {
            if !self.node_types.contains_key(node_type) {
                tracing::warn!(
                    edge_type = %definition.type_name,
                    node_type = %node_type,
                    "edge type references unregistered node type"
                );
            }
        }

        tracing::debug!(type_name = %definition.type_name, "registered edge type");
        self.edge_types
            .insert(definition.type_name.clone(), definition);
        Ok(())
    }

    /// Register a whole-graph constraint. Names are unique.
    pub fn register_constraint(&mut self, constraint: SchemaConstraint) -> Result<(), GraphError> {
        if self.constraints.iter().any(|c| c.name == constraint.name) {
            return Err(GraphError::DuplicateConstraint(constraint.name));
        }
        tracing::debug!(constraint = %constraint.name, "registered schema constraint");
        self.constraints.push(constraint);
        Ok(())
    }

    /// Validate a single node.
    #[must_use]
    pub fn validate_node(&self, node: &Node) -> ValidationResult {
        if node.node_type.is_empty() {
            return ValidationResult::fail("Node type is required".to_string());
        }
        let Some(definition) = self.node_types.get(&node.node_type) else {
            return ValidationResult::fail(format!("Unknown node type: {}", node.node_type));
        };

        let mut errors = Vec::new();
        check_properties(
            &definition.properties,
            &definition.required_properties,
            &node.properties,
            &mut errors,
        );
        ValidationResult::from_errors(errors)
    }

    /// Validate a single edge.
    ///
    /// Endpoint type restrictions are only checked for the endpoints supplied.
    #[must_use]
    pub fn validate_edge(
        &self,
        edge: &Edge,
        source: Option<&Node>,
        target: Option<&Node>,
    ) -> ValidationResult {
        if edge.edge_type.is_empty() {
            return ValidationResult::fail("Edge type is required".to_string());
        }
        let Some(definition) = self.edge_types.get(&edge.edge_type) else {
            return ValidationResult::fail(format!("Unknown edge type: {}", edge.edge_type));
        };

        let mut errors = Vec::new();
        if edge.source.is_empty() {
            errors.push("Edge source is required".to_string());
        }
        if edge.target.is_empty() {
            errors.push("Edge target is required".to_string());
        }
        check_properties(
            &definition.properties,
            &definition.required_properties,
            &edge.properties,
            &mut errors,
        );

        if let Some(source) = source
            && !definition.allows_source(&source.node_type)
        {
            errors.push(format!(
                "Source node type '{}' is not allowed for edge type '{}'",
                source.node_type, edge.edge_type
            ));
        }
        if let Some(target) = target
            && !definition.allows_target(&target.node_type)
        {
            errors.push(format!(
                "Target node type '{}' is not allowed for edge type '{}'",
                target.node_type, edge.edge_type
            ));
        }
        ValidationResult::from_errors(errors)
    }

    /// Validate every node, every edge, then every constraint.
    ///
    /// Errors are prefixed with the offending element. Dangling edge endpoints
    /// are reported; constraint predicates that error are reported as failures.
    #[must_use]
    pub fn validate_graph(&self, graph: &GraphData) -> ValidationResult {
        let mut errors = Vec::new();

        for (id, node) in &graph.nodes {
            for error in self.validate_node(node).errors {
                errors.push(format!("Node '{}': {}", id, error));
            }
        }

        for (id, edge) in &graph.edges {
            let source = graph.nodes.get(&edge.source);
            let target = graph.nodes.get(&edge.target);
            if source.is_none() && !edge.source.is_empty() {
                errors.push(format!(
                    "Edge '{}': source node '{}' not found",
                    id, edge.source
                ));
            }
            if target.is_none() && !edge.target.is_empty() {
                errors.push(format!(
                    "Edge '{}': target node '{}' not found",
                    id, edge.target
                ));
            }
            for error in self.validate_edge(edge, source, target).errors {
                errors.push(format!("Edge '{}': {}", id, error));
            }
        }

        for constraint in &self.constraints {
            match constraint.check(graph) {
                Ok(true) => {}
                Ok(false) => errors.push(format!(
                    "Constraint '{}' failed: {}",
                    constraint.name, constraint.message
                )),
                Err(reason) => {
                    tracing::warn!(
                        constraint = %constraint.name,
                        reason = %reason,
                        "schema constraint could not be evaluated"
                    );
                    errors.push(format!(
                        "Constraint '{}' errored: {}",
                        constraint.name, reason
                    ));
                }
            }
        }

        ValidationResult::from_errors(errors)
    }

    /// Whether an edge of `edge_type` may connect the two node types.
    ///
    /// Unknown edge types allow nothing.
    #[must_use]
    pub fn is_connection_allowed(&self, edge_type: &str, source_type: &str, target_type: &str) -> bool {
        self.edge_types
            .get(edge_type)
            .is_some_and(|def| def.allows_source(source_type) && def.allows_target(target_type))
    }

    /// Copy of `node` with declared defaults filled in for absent properties.
    #[must_use]
    pub fn apply_node_defaults(&self, node: &Node) -> Node {
        let mut node = node.clone();
        if let Some(definition) = self.node_types.get(&node.node_type) {
            fill_defaults(&definition.properties, &mut node.properties);
        }
        node
    }

    /// Copy of `edge` with declared defaults filled in for absent properties.
    #[must_use]
    pub fn apply_edge_defaults(&self, edge: &Edge) -> Edge {
        let mut edge = edge.clone();
        if let Some(definition) = self.edge_types.get(&edge.edge_type) {
            fill_defaults(&definition.properties, &mut edge.properties);
        }
        edge
    }

    /// `(edge type, node type)` pairs where an allowed endpoint type is not registered.
    #[must_use]
    pub fn unresolved_references(&self) -> Vec<(String, String)> {
        let mut missing = BTreeSet::new();
        for definition in self.edge_types.values() {
            for node_type in definition
                .allowed_source_types
                .iter()
                .chain(&definition.allowed_target_types)
            {
                if !self.node_types.contains_key(node_type) {
                    missing.insert((definition.type_name.clone(), node_type.clone()));
                }
            }
        }
        missing.into_iter().collect()
    }

    #[must_use]
    pub fn get_node_type(&self, type_name: &str) -> Option<&NodeTypeDefinition> {
        self.node_types.get(type_name)
    }

    #[must_use]
    pub fn get_edge_type(&self, type_name: &str) -> Option<&EdgeTypeDefinition> {
        self.edge_types.get(type_name)
    }

    #[must_use]
    pub fn has_node_type(&self, type_name: &str) -> bool {
        self.node_types.contains_key(type_name)
    }

    #[must_use]
    pub fn has_edge_type(&self, type_name: &str) -> bool {
        self.edge_types.contains_key(type_name)
    }

    /// Registered node type keys, sorted.
    pub fn node_type_names(&self) -> impl Iterator<Item = &str> {
        self.node_types.keys().map(String::as_str)
    }

    /// Registered edge type keys, sorted.
    pub fn edge_type_names(&self) -> impl Iterator<Item = &str> {
        self.edge_types.keys().map(String::as_str)
    }

    pub(crate) fn node_types(&self) -> impl Iterator<Item = &NodeTypeDefinition> {
        self.node_types.values()
    }

    pub(crate) fn edge_types(&self) -> impl Iterator<Item = &EdgeTypeDefinition> {
        self.edge_types.values()
    }

    /// Registered constraints in registration order.
    #[must_use]
    pub fn constraints(&self) -> &[SchemaConstraint] {
        &self.constraints
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn check_property_kinds(
    type_name: &str,
    properties: &BTreeMap<String, PropertyDefinition>,
) -> Result<(), GraphError> {
    match properties.iter().find(|(_, def)| !def.is_resolved()) {
        Some((name, def)) => Err(GraphError::UnresolvedPropertyKind {
            type_name: type_name.to_string(),
            property: name.clone(),
            kind: def.kind.name().to_string(),
        }),
        None => Ok(()),
    }
}

/// Accumulate one error per violation; never short-circuits.
fn check_properties(
    properties: &BTreeMap<String, PropertyDefinition>,
    required: &BTreeSet<String>,
    values: &Map<String, Value>,
    errors: &mut Vec<String>,
) {
    let declared_required = properties
        .iter()
        .filter(|(_, def)| def.required)
        .map(|(name, _)| name);
    let all_required: BTreeSet<&String> = required.iter().chain(declared_required).collect();

    for name in all_required {
        if values.get(name.as_str()).is_none_or(Value::is_null) {
            errors.push(format!("Missing required property: {}", name));
        }
    }

    for (name, definition) in properties {
        if let Some(value) = values.get(name.as_str()).filter(|v| !v.is_null())
            && let Some(error) = definition.violation(name, value)
        {
            errors.push(error);
        }
    }
}

fn fill_defaults(properties: &BTreeMap<String, PropertyDefinition>, values: &mut Map<String, Value>) {
    for (name, definition) in properties {
        if let Some(default) = &definition.default
            && values.get(name.as_str()).is_none_or(Value::is_null)
        {
            values.insert(name.clone(), default.clone());
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
