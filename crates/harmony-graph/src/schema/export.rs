//! Schema export format.
//!
//! Custom validators and constraint predicates are code, not data: the export
//! replaces validators with `CUSTOM_VALIDATOR_MARKER` and keeps only the
//! name/type/message of constraints. Importing re-attaches validators from a
//! caller-supplied table keyed by `"<type>.<property>"`.

use super::property::{PropertyDefinition, PropertyKind, PropertyValidator};
use super::registry::{EdgeTypeDefinition, NodeTypeDefinition, SchemaRegistry};
use crate::GraphError;
use crate::primitives::CUSTOM_VALIDATOR_MARKER;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Table of validators to re-attach on import, keyed by `"<type>.<property>"`.
pub type ValidatorTable = BTreeMap<String, Arc<dyn PropertyValidator>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyExport {
    #[serde(rename = "type")]
    pub kind: PropertyKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `CUSTOM_VALIDATOR_MARKER` when a validator was elided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTypeExport {
    #[serde(rename = "type")]
    pub type_name: String,
    pub label: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyExport>,
    #[serde(default)]
    pub required_properties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeTypeExport {
    #[serde(rename = "type")]
    pub type_name: String,
    pub label: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyExport>,
    #[serde(default)]
    pub required_properties: Vec<String>,
    #[serde(default)]
    pub allowed_source_types: Vec<String>,
    #[serde(default)]
    pub allowed_target_types: Vec<String>,
    #[serde(default = "directed_default")]
    pub directed: bool,
}

fn directed_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintExport {
    pub name: String,
    #[serde(rename = "type")]
    pub constraint_type: String,
    pub message: String,
}

/// Serializable view of a `SchemaRegistry`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaExport {
    pub node_types: Vec<NodeTypeExport>,
    pub edge_types: Vec<EdgeTypeExport>,
    #[serde(default)]
    pub constraints: Vec<ConstraintExport>,
}

impl SchemaRegistry {
    /// Export node/edge types and constraint names/messages.
    #[must_use]
    pub fn to_export(&self) -> SchemaExport {
        SchemaExport {
            node_types: self
                .node_types()
                .map(|def| NodeTypeExport {
                    type_name: def.type_name.clone(),
                    label: def.label.clone(),
                    properties: export_properties(&def.properties),
                    required_properties: def.required_properties.iter().cloned().collect(),
                })
                .collect(),
            edge_types: self
                .edge_types()
                .map(|def| EdgeTypeExport {
                    type_name: def.type_name.clone(),
                    label: def.label.clone(),
                    properties: export_properties(&def.properties),
                    required_properties: def.required_properties.iter().cloned().collect(),
                    allowed_source_types: def.allowed_source_types.iter().cloned().collect(),
                    allowed_target_types: def.allowed_target_types.iter().cloned().collect(),
                    directed: def.directed,
                })
                .collect(),
            constraints: self
                .constraints()
                .iter()
                .map(|c| ConstraintExport {
                    name: c.name.clone(),
                    constraint_type: c.constraint_type.clone(),
                    message: c.message.clone(),
                })
                .collect(),
        }
    }

    /// Export as a JSON string.
    pub fn to_json(&self) -> Result<String, GraphError> {
        serde_json::to_string(&self.to_export())
            .map_err(|e| GraphError::SerializationError(e.to_string()))
    }

    /// Rebuild a registry from an export.
    ///
    /// Constraints cannot be restored from data and are skipped; callers
    /// re-register them. Fails if a property needs a validator that
    /// `validators` does not provide.
    pub fn from_export(
        export: &SchemaExport,
        validators: &ValidatorTable,
    ) -> Result<SchemaRegistry, GraphError> {
        let mut registry = SchemaRegistry::new();

        for node_type in &export.node_types {
            let mut def = NodeTypeDefinition::new(&node_type.type_name, &node_type.label);
            def.properties =
                import_properties(&node_type.type_name, &node_type.properties, validators)?;
            def.required_properties = node_type.required_properties.iter().cloned().collect();
            registry.register_node_type(def)?;
        }

        for edge_type in &export.edge_types {
            let mut def = EdgeTypeDefinition::new(&edge_type.type_name, &edge_type.label);
            def.properties =
                import_properties(&edge_type.type_name, &edge_type.properties, validators)?;
            def.required_properties = edge_type.required_properties.iter().cloned().collect();
            def.allowed_source_types = edge_type.allowed_source_types.iter().cloned().collect();
            def.allowed_target_types = edge_type.allowed_target_types.iter().cloned().collect();
            def.directed = edge_type.directed;
            registry.register_edge_type(def)?;
        }

        if !export.constraints.is_empty() {
            tracing::debug!(
                skipped = export.constraints.len(),
                "schema constraints are not restored from exports"
            );
        }

        Ok(registry)
    }

    /// Rebuild a registry from a JSON export.
    pub fn from_json(json: &str, validators: &ValidatorTable) -> Result<SchemaRegistry, GraphError> {
        let export: SchemaExport = serde_json::from_str(json)
            .map_err(|e| GraphError::DeserializationError(e.to_string()))?;
        Self::from_export(&export, validators)
    }
}

fn export_properties(
    properties: &BTreeMap<String, PropertyDefinition>,
) -> BTreeMap<String, PropertyExport> {
    properties
        .iter()
        .map(|(name, def)| {
            let export = PropertyExport {
                kind: def.kind.clone(),
                required: def.required,
                default: def.default.clone(),
                description: def.description.clone(),
                validate: def
                    .has_validator()
                    .then(|| CUSTOM_VALIDATOR_MARKER.to_string()),
            };
            (name.clone(), export)
        })
        .collect()
}

fn import_properties(
    type_name: &str,
    properties: &BTreeMap<String, PropertyExport>,
    validators: &ValidatorTable,
) -> Result<BTreeMap<String, PropertyDefinition>, GraphError> {
    let mut imported = BTreeMap::new();
    for (name, export) in properties {
        let mut def = PropertyDefinition::new(export.kind.clone());
        def.required = export.required;
        def.default = export.default.clone();
        def.description = export.description.clone();

        if export.validate.is_some() || !export.kind.is_builtin() {
            let key = format!("{}.{}", type_name, name);
            match validators.get(&key) {
                Some(validator) => def = def.with_shared_validator(Arc::clone(validator)),
                None => {
                    return Err(GraphError::UnresolvedPropertyKind {
                        type_name: type_name.to_string(),
                        property: name.clone(),
                        kind: export.kind.name().to_string(),
                    });
                }
            }
        }
        imported.insert(name.clone(), def);
    }
    Ok(imported)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaConstraint;
    use crate::{GraphData, Node};
    use serde_json::json;

    fn registry_with_custom() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .register_node_type(
                NodeTypeDefinition::new("swatch", "Swatch")
                    .property(
                        "tint",
                        PropertyDefinition::custom("color", |v: &Value| {
                            v.as_str().is_some_and(|s| s.starts_with('#'))
                        }),
                    )
                    .property(
                        "name",
                        PropertyDefinition::new(PropertyKind::String).required(),
                    ),
            )
            .expect("register");
        registry
            .register_edge_type(EdgeTypeDefinition::new("pairs", "Pairs").undirected())
            .expect("register");
        registry
            .register_constraint(SchemaConstraint::new(
                "non-empty",
                "cardinality",
                "graph must not be empty",
                |g: &GraphData| -> Result<bool, String> { Ok(!g.nodes.is_empty()) },
            ))
            .expect("constraint");
        registry
    }

    #[test]
    fn export_elides_validators() {
        let export = registry_with_custom().to_export();
        let json = serde_json::to_value(&export).expect("serialize");

        assert_eq!(
            json["nodeTypes"][0]["properties"]["tint"]["validate"],
            json!(CUSTOM_VALIDATOR_MARKER)
        );
        assert_eq!(json["nodeTypes"][0]["properties"]["tint"]["type"], json!("color"));
        assert_eq!(json["edgeTypes"][0]["directed"], json!(false));
        assert_eq!(json["constraints"][0]["name"], json!("non-empty"));
        assert_eq!(
            json["constraints"][0]["message"],
            json!("graph must not be empty")
        );
    }

    #[test]
    fn import_requires_validator_table() {
        let json = registry_with_custom().to_json().expect("json");

        let err = SchemaRegistry::from_json(&json, &ValidatorTable::new()).expect_err("missing");
        assert!(matches!(err, GraphError::UnresolvedPropertyKind { ref property, .. } if property == "tint"));

        let mut validators = ValidatorTable::new();
        validators.insert(
            "swatch.tint".to_string(),
            Arc::new(|v: &Value| v.as_str().is_some_and(|s| s.starts_with('#'))),
        );
        let restored = SchemaRegistry::from_json(&json, &validators).expect("import");

        let good = Node::new("s", "swatch")
            .with_property("name", "ink")
            .with_property("tint", "#000");
        let bad = Node::new("s", "swatch")
            .with_property("name", "ink")
            .with_property("tint", "black");
        assert!(restored.validate_node(&good).valid);
        assert!(!restored.validate_node(&bad).valid);
        assert!(restored.constraints().is_empty());
        assert_eq!(restored.to_export().node_types, registry_with_custom().to_export().node_types);
    }
}
