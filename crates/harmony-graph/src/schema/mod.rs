//! # Schema Module
//!
//! Schema-driven type validation for nodes, edges, and whole graphs.
//!
//! - `property`: closed set of property kinds plus the `PropertyValidator`
//!   extension point
//! - `registry`: type registry, graph constraints, validation
//! - `export`: serializable schema view

mod export;
mod property;
mod registry;

pub use export::{
    ConstraintExport, EdgeTypeExport, NodeTypeExport, PropertyExport, SchemaExport, ValidatorTable,
};
pub use property::{PropertyDefinition, PropertyKind, PropertyValidator};
pub use registry::{
    EdgeTypeDefinition, GraphConstraint, NodeTypeDefinition, SchemaConstraint, SchemaRegistry,
    ValidationResult,
};
