//! Parser output: a schema-tagged tree of fields.

use std::collections::BTreeMap;
use std::sync::Arc;

use rdx_schema::{ConstraintViolation, FieldId, FieldKind, FieldValue, SchemaDefinition};

/// Byte range of a leaf in the original file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedValue {
    Integer(i64),
    Text(String),
    Bytes(Vec<u8>),
    Nested(Vec<ParsedField>),
}

impl ParsedValue {
    /// The exact bytes this value stands for when it occupies `width` bytes.
    /// Integers render little-endian; `None` for nested values or widths over 8.
    pub fn render(&self, width: usize) -> Option<Vec<u8>> {
        match self {
            Self::Integer(v) if width <= 8 => Some(v.to_le_bytes()[..width].to_vec()),
            Self::Integer(_) | Self::Nested(_) => None,
            Self::Text(s) => Some(s.as_bytes().to_vec()),
            Self::Bytes(b) => Some(b.clone()),
        }
    }

    pub fn as_field_value(&self) -> Option<FieldValue<'_>> {
        match self {
            Self::Integer(v) => Some(FieldValue::Integer(*v)),
            Self::Text(s) => Some(FieldValue::Text(s)),
            Self::Bytes(b) => Some(FieldValue::Bytes(b)),
            Self::Nested(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedField {
    pub name: String,
    pub kind: FieldKind,
    pub value: ParsedValue,
    /// Set when the value was read from the file at this position.
    pub span: Option<Span>,
}

impl ParsedField {
    pub fn record(name: &str, kind: FieldKind, children: Vec<ParsedField>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            value: ParsedValue::Nested(children),
            span: None,
        }
    }

    pub fn integer(name: &str, kind: FieldKind, value: i64, span: Span) -> Self {
        Self {
            name: name.to_string(),
            kind,
            value: ParsedValue::Integer(value),
            span: Some(span),
        }
    }

    pub fn text(name: &str, kind: FieldKind, value: &str, span: Option<Span>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            value: ParsedValue::Text(value.to_string()),
            span,
        }
    }

    pub fn bytes(name: &str, kind: FieldKind, value: &[u8], span: Option<Span>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            value: ParsedValue::Bytes(value.to_vec()),
            span,
        }
    }

    pub fn children(&self) -> &[ParsedField] {
        match &self.value {
            ParsedValue::Nested(children) => children,
            _ => &[],
        }
    }
}

/// A scalar leaf together with the schema field it instantiates.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedLeaf<'a> {
    pub field: &'a ParsedField,
    pub schema_field: Option<FieldId>,
}

#[derive(Debug, Clone)]
pub struct ParsedRepresentation {
    pub schema: Arc<SchemaDefinition>,
    pub fields: Vec<ParsedField>,
    pub metadata: BTreeMap<String, String>,
    /// Field name to the fields it references, taken from the schema.
    pub constraints: BTreeMap<String, Vec<String>>,
    pub violations: Vec<ConstraintViolation>,
}

impl ParsedRepresentation {
    pub fn new(schema: Arc<SchemaDefinition>) -> Self {
        let constraints = schema.constraint_graph();
        Self {
            schema,
            fields: Vec::new(),
            metadata: BTreeMap::new(),
            constraints,
            violations: Vec::new(),
        }
    }

    /// Scalar leaves in tree order. Element wrappers inside arrays that have
    /// no schema node of their own inherit their parent's context.
    pub fn leaves(&self) -> Vec<ResolvedLeaf<'_>> {
        let mut out = Vec::new();
        collect_leaves(&self.schema, &self.fields, None, &mut out);
        out
    }

    /// Run value constraints over every resolved leaf and record violations.
    pub fn finish(mut self) -> Self {
        let mut violations = Vec::new();
        for leaf in self.leaves() {
            if let (Some(id), Some(value)) = (leaf.schema_field, leaf.field.value.as_field_value()) {
                violations.extend(self.schema.check(id, value));
            }
        }
        if !violations.is_empty() {
            tracing::debug!(
                schema = %self.schema.name,
                count = violations.len(),
                "Constraint violations while parsing"
            );
            self.metadata
                .insert("constraint_violations".into(), violations.len().to_string());
        }
        self.violations = violations;
        self
    }

    /// True when every parsed field either matches the kind of the schema
    /// field it instantiates or is an element wrapper inside an array.
    pub fn conforms_to(&self, schema: &SchemaDefinition) -> bool {
        conforms(schema, &self.fields, None)
    }
}

fn collect_leaves<'a>(
    schema: &SchemaDefinition,
    fields: &'a [ParsedField],
    ctx: Option<FieldId>,
    out: &mut Vec<ResolvedLeaf<'a>>,
) {
    for field in fields {
        let id = schema.child(ctx, &field.name);
        match &field.value {
            ParsedValue::Nested(children) => collect_leaves(schema, children, id.or(ctx), out),
            _ => out.push(ResolvedLeaf {
                field,
                schema_field: id,
            }),
        }
    }
}

fn conforms(schema: &SchemaDefinition, fields: &[ParsedField], ctx: Option<FieldId>) -> bool {
    fields.iter().all(|field| {
        let next = match schema.child(ctx, &field.name) {
            Some(id) => match schema.field(id) {
                Some(def) if def.kind == field.kind => id,
                _ => return false,
            },
            None => {
                let in_array = ctx
                    .and_then(|c| schema.field(c))
                    .is_some_and(|def| def.kind == FieldKind::Array);
                if !in_array {
                    return false;
                }
                match ctx {
                    Some(c) => c,
                    None => return false,
                }
            }
        };
        conforms(schema, field.children(), Some(next))
    })
}
