//! Schema model and the registry that persists schemas into the corpus store.

pub mod builtin;
pub mod definition;
pub mod registry;

pub use builtin::BuiltinSchema;
pub use definition::{
    ConstraintViolation, FieldConstraint, FieldDefinition, FieldId, FieldKind, FieldSpec,
    FieldValue, SchemaDefinition,
};
pub use registry::SchemaRegistry;
