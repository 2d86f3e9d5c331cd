//! Property kinds and definitions.
//!
//! Built-in kinds are a closed enum dispatched by `match`; anything else must
//! come with a `PropertyValidator`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// PROPERTY KIND
// =============================================================================

/// Declared kind of a property value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PropertyKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
    /// A callable handle, carried as a string the host resolves.
    Function,
    /// Always passes.
    Any,
    /// Not built in; requires a custom validator.
    Custom(String),
}

impl PropertyKind {
    /// Parse a kind name. Unknown names become `Custom`.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "string" => PropertyKind::String,
            "number" => PropertyKind::Number,
            "boolean" => PropertyKind::Boolean,
            "object" => PropertyKind::Object,
            "array" => PropertyKind::Array,
            "function" => PropertyKind::Function,
            "any" => PropertyKind::Any,
            other => PropertyKind::Custom(other.to_string()),
        }
    }

    /// The kind's name as used in schema definitions.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            PropertyKind::String => "string",
            PropertyKind::Number => "number",
            PropertyKind::Boolean => "boolean",
            PropertyKind::Object => "object",
            PropertyKind::Array => "array",
            PropertyKind::Function => "function",
            PropertyKind::Any => "any",
            PropertyKind::Custom(name) => name,
        }
    }

    /// Whether the kind has a built-in check.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        !matches!(self, PropertyKind::Custom(_))
    }

    /// Built-in type check. `None` for custom kinds.
    #[must_use]
    pub fn check(&self, value: &Value) -> Option<bool> {
        let ok = match self {
            PropertyKind::String | PropertyKind::Function => value.is_string(),
            PropertyKind::Number => value.is_number(),
            PropertyKind::Boolean => value.is_boolean(),
            PropertyKind::Object => value.is_object(),
            PropertyKind::Array => value.is_array(),
            PropertyKind::Any => true,
            PropertyKind::Custom(_) => return None,
        };
        Some(ok)
    }
}

impl From<String> for PropertyKind {
    fn from(name: String) -> Self {
        PropertyKind::parse(&name)
    }
}

impl From<PropertyKind> for String {
    fn from(kind: PropertyKind) -> Self {
        kind.name().to_string()
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// CUSTOM VALIDATORS
// =============================================================================

/// Extension point for property checks beyond the built-in kinds.
///
/// Implemented for any `Fn(&Value) -> bool + Send + Sync`.
pub trait PropertyValidator: Send + Sync {
    /// Return `true` if the value is acceptable.
    fn validate(&self, value: &Value) -> bool;
}

impl<F> PropertyValidator for F
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    fn validate(&self, value: &Value) -> bool {
        self(value)
    }
}

// =============================================================================
// PROPERTY DEFINITION
// =============================================================================

/// Declaration of one property on a node or edge type.
#[derive(Clone)]
pub struct PropertyDefinition {
    /// Declared kind.
    pub kind: PropertyKind,
    /// Whether the property must be present.
    pub required: bool,
    /// Value filled in by `apply_*_defaults` when absent.
    pub default: Option<Value>,
    /// Human-readable description.
    pub description: Option<String>,
    validator: Option<Arc<dyn PropertyValidator>>,
}

impl PropertyDefinition {
    /// Optional property of the given kind.
    #[must_use]
    pub fn new(kind: PropertyKind) -> Self {
        Self {
            kind,
            required: false,
            default: None,
            description: None,
            validator: None,
        }
    }

    /// Property of a custom kind checked by `validator`.
    #[must_use]
    pub fn custom(kind: impl Into<String>, validator: impl PropertyValidator + 'static) -> Self {
        Self::new(PropertyKind::Custom(kind.into())).with_validator(validator)
    }

    /// Mark the property as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach a custom validator. It replaces the built-in check.
    #[must_use]
    pub fn with_validator(mut self, validator: impl PropertyValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Attach an already shared validator.
    #[must_use]
    pub fn with_shared_validator(mut self, validator: Arc<dyn PropertyValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Whether a custom validator is attached.
    #[must_use]
    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    /// Whether the definition can be checked at all.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.validator.is_some() || self.kind.is_builtin()
    }

    /// Check a present value. Returns the violation message, if any.
    pub(crate) fn violation(&self, name: &str, value: &Value) -> Option<String> {
        match &self.validator {
            Some(validator) => (!validator.validate(value))
                .then(|| format!("Property '{}' failed custom validation", name)),
            None => match self.kind.check(value) {
                Some(true) => None,
                _ => Some(format!("Property '{}' must be of type {}", name, self.kind)),
            },
        }
    }
}

impl fmt::Debug for PropertyDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDefinition")
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("description", &self.description)
            .field("custom_validator", &self.validator.is_some())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_dispatch() {
        assert_eq!(PropertyKind::Number.check(&json!(5)), Some(true));
        assert_eq!(PropertyKind::Number.check(&json!("5")), Some(false));
        assert_eq!(PropertyKind::Array.check(&json!([1])), Some(true));
        assert_eq!(PropertyKind::Object.check(&json!([1])), Some(false));
        assert_eq!(PropertyKind::Any.check(&json!(null)), Some(true));
        assert_eq!(PropertyKind::Custom("hex".into()).check(&json!("x")), None);
    }

    #[test]
    fn parse_roundtrips_names() {
        for name in ["string", "number", "boolean", "object", "array", "function", "any"] {
            let kind = PropertyKind::parse(name);
            assert!(kind.is_builtin());
            assert_eq!(kind.name(), name);
        }
        assert_eq!(
            PropertyKind::parse("color"),
            PropertyKind::Custom("color".into())
        );
    }

    #[test]
    fn custom_validator_replaces_builtin() {
        let def = PropertyDefinition::new(PropertyKind::Number)
            .with_validator(|v: &Value| v.as_i64().is_some_and(|n| n > 0));

        assert!(def.violation("level", &json!(3)).is_none());
        assert_eq!(
            def.violation("level", &json!(-1)).as_deref(),
            Some("Property 'level' failed custom validation")
        );
    }

    #[test]
    fn builtin_violation_message() {
        let def = PropertyDefinition::new(PropertyKind::Boolean);
        assert_eq!(
            def.violation("on", &json!(1)).as_deref(),
            Some("Property 'on' must be of type boolean")
        );
    }

    #[test]
    fn unresolved_custom_kind() {
        assert!(!PropertyDefinition::new(PropertyKind::parse("color")).is_resolved());
        assert!(PropertyDefinition::custom("color", |_: &Value| true).is_resolved());
    }
}
