//! Arena-backed schema definitions.
//!
//! Fields are stored flat in [`SchemaDefinition::fields`] with parent/child
//! indices, so lookups at parse and encode time are index operations.
//! Name references (`refers_to`, `Reference`, `Checksum`) are resolved once by
//! [`SchemaDefinition::compile`].

use std::collections::BTreeMap;
use std::fmt;

use rdx_core::types::SchemaId;
use rdx_core::{RdxError, Result};
use serde::{Deserialize, Serialize};

pub type FieldId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Enum,
    String,
    Bytes,
    LengthOf,
    ChecksumOf,
    OffsetOf,
    Record,
    Array,
    Section,
}

impl FieldKind {
    /// Kinds whose instances hold nested fields rather than a scalar.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Record | Self::Array | Self::Section)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Integer => "integer",
            Self::Enum => "enum",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::LengthOf => "length_of",
            Self::ChecksumOf => "checksum_of",
            Self::OffsetOf => "offset_of",
            Self::Record => "record",
            Self::Array => "array",
            Self::Section => "section",
        };
        f.write_str(s)
    }
}

/// A rule on a field. The variant fixes the payload shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldConstraint {
    Range { min: i64, max: i64 },
    Reference { field: String },
    Checksum { field: String },
    Alignment { bytes: u64 },
    Enumeration { values: Vec<String> },
}

impl FieldConstraint {
    fn label(&self) -> &'static str {
        match self {
            Self::Range { .. } => "range",
            Self::Reference { .. } => "reference",
            Self::Checksum { .. } => "checksum",
            Self::Alignment { .. } => "alignment",
            Self::Enumeration { .. } => "enumeration",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refers_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<FieldConstraint>,
    pub parent: Option<FieldId>,
    #[serde(default)]
    pub children: Vec<FieldId>,
    /// Filled in by `compile()`.
    #[serde(skip)]
    pub refers_to_id: Option<FieldId>,
}

/// Tree-shaped input for building a definition.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: String,
    kind: FieldKind,
    size_bytes: Option<u32>,
    encoding: Option<String>,
    refers_to: Option<String>,
    constraints: Vec<FieldConstraint>,
    nested: Vec<FieldSpec>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            size_bytes: None,
            encoding: None,
            refers_to: None,
            constraints: Vec::new(),
            nested: Vec::new(),
        }
    }

    pub fn sized(mut self, bytes: u32) -> Self {
        self.size_bytes = Some(bytes);
        self
    }

    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn refers_to(mut self, field: impl Into<String>) -> Self {
        self.refers_to = Some(field.into());
        self
    }

    pub fn constraint(mut self, constraint: FieldConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn nested(mut self, fields: Vec<FieldSpec>) -> Self {
        self.nested = fields;
        self
    }
}

/// A scalar handed to [`SchemaDefinition::check`].
#[derive(Debug, Clone, Copy)]
pub enum FieldValue<'a> {
    Integer(i64),
    Text(&'a str),
    Bytes(&'a [u8]),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub field: String,
    pub constraint: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// 0 until the registry assigns a durable id.
    #[serde(default)]
    pub schema_id: SchemaId,
    pub name: String,
    pub version: i32,
    pub fields: Vec<FieldDefinition>,
    pub roots: Vec<FieldId>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl SchemaDefinition {
    /// Flatten `fields` into an arena. Call `compile()` before use.
    pub fn new(name: impl Into<String>, version: i32, fields: Vec<FieldSpec>) -> Self {
        let mut def = Self {
            schema_id: 0,
            name: name.into(),
            version,
            fields: Vec::new(),
            roots: Vec::new(),
            metadata: BTreeMap::new(),
        };
        for spec in fields {
            let id = def.push(spec, None);
            def.roots.push(id);
        }
        def
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn push(&mut self, spec: FieldSpec, parent: Option<FieldId>) -> FieldId {
        let id = self.fields.len();
        self.fields.push(FieldDefinition {
            name: spec.name,
            kind: spec.kind,
            size_bytes: spec.size_bytes,
            encoding: spec.encoding,
            refers_to: spec.refers_to,
            constraints: spec.constraints,
            parent,
            children: Vec::new(),
            refers_to_id: None,
        });
        for child in spec.nested {
            let child_id = self.push(child, Some(id));
            self.fields[id].children.push(child_id);
        }
        id
    }

    /// Validate the definition and resolve every name reference to an index.
    pub fn compile(mut self) -> Result<Self> {
        if self.name.trim().is_empty() {
            return Err(RdxError::InvalidSchema("schema name is empty".into()));
        }
        if self.version < 1 {
            return Err(RdxError::InvalidSchema(format!(
                "{}: version must be >= 1, got {}",
                self.name, self.version
            )));
        }
        for (id, field) in self.fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(self.invalid(id, "field name is empty"));
            }
            if field.children.iter().any(|&c| c >= self.fields.len())
                || field.parent.is_some_and(|p| p >= self.fields.len())
            {
                return Err(self.invalid(id, "dangling field index"));
            }
            if field.children.iter().any(|&c| self.fields[c].parent != Some(id)) {
                return Err(self.invalid(id, "child does not point back to its parent"));
            }
        }
        for &root in &self.roots {
            match self.fields.get(root) {
                None => {
                    return Err(RdxError::InvalidSchema(format!(
                        "{}: root index {root} out of range ({} fields)",
                        self.name,
                        self.fields.len()
                    )));
                }
                Some(field) if field.parent.is_some() => {
                    return Err(self.invalid(root, "root field has a parent"));
                }
                Some(_) => {}
            }
        }
        for id in 0..self.fields.len() {
            let mut cur = self.fields[id].parent;
            let mut steps = 0;
            while let Some(p) = cur {
                steps += 1;
                if steps > self.fields.len() {
                    return Err(self.invalid(id, "parent chain has a cycle"));
                }
                cur = self.fields[p].parent;
            }
        }

        let mut resolved = Vec::with_capacity(self.fields.len());
        for (id, field) in self.fields.iter().enumerate() {
            let target = match &field.refers_to {
                Some(name) => Some(
                    self.resolve_name(field.parent, name)
                        .ok_or_else(|| self.invalid(id, &format!("refers_to '{name}' does not resolve")))?,
                ),
                None => None,
            };
            for constraint in &field.constraints {
                match constraint {
                    FieldConstraint::Range { min, max } if min > max => {
                        return Err(self.invalid(id, &format!("range {min}..{max} is empty")));
                    }
                    FieldConstraint::Alignment { bytes: 0 } => {
                        return Err(self.invalid(id, "alignment must be > 0"));
                    }
                    FieldConstraint::Reference { field: name }
                    | FieldConstraint::Checksum { field: name } => {
                        if self.resolve_name(field.parent, name).is_none() {
                            return Err(self.invalid(
                                id,
                                &format!("{} target '{name}' does not resolve", constraint.label()),
                            ));
                        }
                    }
                    _ => {}
                }
            }
            resolved.push(target);
        }
        for (field, target) in self.fields.iter_mut().zip(resolved) {
            field.refers_to_id = target;
        }
        Ok(self)
    }

    fn invalid(&self, id: FieldId, reason: &str) -> RdxError {
        RdxError::InvalidSchema(format!("{}/{}: {}", self.name, self.fields[id].name, reason))
    }

    /// Sibling first, then anywhere in the schema.
    fn resolve_name(&self, parent: Option<FieldId>, name: &str) -> Option<FieldId> {
        self.child(parent, name).or_else(|| self.find(name))
    }

    pub fn field(&self, id: FieldId) -> Option<&FieldDefinition> {
        self.fields.get(id)
    }

    /// Child of `parent` named `name`; `None` parent means the top level.
    pub fn child(&self, parent: Option<FieldId>, name: &str) -> Option<FieldId> {
        let ids = match parent {
            Some(p) => &self.fields.get(p)?.children,
            None => &self.roots,
        };
        ids.iter()
            .copied()
            .find(|&id| self.fields.get(id).is_some_and(|f| f.name == name))
    }

    /// First field with this name, depth-first.
    pub fn find(&self, name: &str) -> Option<FieldId> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// `a/b/c` style path of a field.
    pub fn path(&self, id: FieldId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(i) = cur {
            let Some(field) = self.fields.get(i) else { break };
            if parts.len() > self.fields.len() {
                break;
            }
            parts.push(field.name.as_str());
            cur = field.parent;
        }
        parts.reverse();
        parts.join("/")
    }

    /// Field name to the names it depends on, via `refers_to` and
    /// reference/checksum constraints.
    pub fn constraint_graph(&self) -> BTreeMap<String, Vec<String>> {
        let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for field in &self.fields {
            let mut targets: Vec<String> = field.refers_to.iter().cloned().collect();
            for constraint in &field.constraints {
                if let FieldConstraint::Reference { field: t } | FieldConstraint::Checksum { field: t } =
                    constraint
                {
                    targets.push(t.clone());
                }
            }
            if !targets.is_empty() {
                graph.entry(field.name.clone()).or_default().extend(targets);
            }
        }
        graph
    }

    /// Evaluate value-level constraints for one field.
    pub fn check(&self, id: FieldId, value: FieldValue<'_>) -> Vec<ConstraintViolation> {
        let Some(field) = self.fields.get(id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut violate = |constraint: &FieldConstraint, detail: String| {
            out.push(ConstraintViolation {
                field: self.path(id),
                constraint: constraint.label().to_string(),
                detail,
            });
        };
        for constraint in &field.constraints {
            match (constraint, value) {
                (FieldConstraint::Range { min, max }, FieldValue::Integer(v)) => {
                    if v < *min || v > *max {
                        violate(constraint, format!("{v} outside {min}..={max}"));
                    }
                }
                (FieldConstraint::Alignment { bytes }, FieldValue::Integer(v)) => {
                    if v.unsigned_abs() % bytes != 0 {
                        violate(constraint, format!("{v} not aligned to {bytes}"));
                    }
                }
                (FieldConstraint::Enumeration { values }, FieldValue::Text(s)) => {
                    if !values.iter().any(|allowed| allowed == s) {
                        violate(constraint, format!("'{s}' not one of {values:?}"));
                    }
                }
                (FieldConstraint::Enumeration { values }, FieldValue::Integer(v)) => {
                    let s = v.to_string();
                    if !values.contains(&s) {
                        violate(constraint, format!("{v} not one of {values:?}"));
                    }
                }
                _ => {}
            }
        }
        out
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and re-compile a persisted definition.
    pub fn from_json(json: &str) -> Result<Self> {
        let def: Self = serde_json::from_str(json)
            .map_err(|e| RdxError::InvalidSchema(format!("cannot decode definition: {e}")))?;
        def.compile()
    }
}
