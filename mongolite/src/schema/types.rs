use crate::error::{MongoliteError, Result};
use crate::validation;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Semantic type of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Datetime,
    List,
    Object,
    Any,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Datetime => "datetime",
            FieldKind::List => "list",
            FieldKind::Object => "object",
            FieldKind::Any => "any",
        }
    }

    /// Parse a primitive kind name as written in schema files.
    pub fn parse(name: &str) -> Option<FieldKind> {
        match name.to_ascii_lowercase().as_str() {
            "string" | "str" => Some(FieldKind::String),
            "integer" | "int" => Some(FieldKind::Integer),
            "number" | "float" => Some(FieldKind::Number),
            "boolean" | "bool" => Some(FieldKind::Boolean),
            "datetime" | "date" => Some(FieldKind::Datetime),
            "list" | "array" => Some(FieldKind::List),
            "object" | "nested" => Some(FieldKind::Object),
            "any" => Some(FieldKind::Any),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type PredicateFn = dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync;

/// A named custom check run after the built-in constraints.
#[derive(Clone)]
pub struct Predicate {
    name: String,
    check: Arc<PredicateFn>,
}

impl Predicate {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Predicate {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        (self.check)(value)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate").field("name", &self.name).finish()
    }
}

/// A reusable constraint bundle: a kind plus the checks applied to values of it.
/// Lengths apply to strings (in characters) and lists (in items).
#[derive(Debug, Clone)]
pub struct FieldType {
    pub kind: FieldKind,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub pattern: Option<Regex>,
    pub items: Option<Box<FieldType>>,
    pub schema: Option<Arc<Schema>>,
    pub predicates: Vec<Predicate>,
}

impl FieldType {
    pub fn of(kind: FieldKind) -> Self {
        FieldType {
            kind,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
            pattern: None,
            items: None,
            schema: None,
            predicates: Vec::new(),
        }
    }

    pub fn string() -> Self {
        Self::of(FieldKind::String)
    }

    pub fn integer() -> Self {
        Self::of(FieldKind::Integer)
    }

    pub fn number() -> Self {
        Self::of(FieldKind::Number)
    }

    pub fn boolean() -> Self {
        Self::of(FieldKind::Boolean)
    }

    pub fn datetime() -> Self {
        Self::of(FieldKind::Datetime)
    }

    pub fn any() -> Self {
        Self::of(FieldKind::Any)
    }

    pub fn list(items: FieldType) -> Self {
        FieldType {
            items: Some(Box::new(items)),
            ..Self::of(FieldKind::List)
        }
    }

    /// A nested record validated against `schema`.
    pub fn object(schema: Schema) -> Self {
        FieldType {
            schema: Some(Arc::new(schema)),
            ..Self::of(FieldKind::Object)
        }
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn range(self, min: f64, max: f64) -> Self {
        self.min(min).max(max)
    }

    /// Attach a regex pattern. Fails on an invalid expression.
    pub fn pattern(mut self, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| MongoliteError::Schema(format!("Invalid pattern '{pattern}': {e}")))?;
        self.pattern = Some(re);
        Ok(self)
    }

    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }
}

/// A named field of a schema.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
}

impl FieldDefinition {
    pub fn kind(&self) -> FieldKind {
        self.field_type.kind
    }
}

/// An ordered set of field definitions bound to a storage collection.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    collection: String,
    fields: Vec<FieldDefinition>,
    allow_extra_fields: bool,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        let name = name.into();
        SchemaBuilder {
            collection: None,
            name,
            fields: Vec::new(),
            allow_extra_fields: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the storage collection this schema is bound to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Whether undeclared fields pass through instead of being rejected.
    pub fn allows_extra_fields(&self) -> bool {
        self.allow_extra_fields
    }
}

pub struct SchemaBuilder {
    name: String,
    collection: Option<String>,
    fields: Vec<FieldDefinition>,
    allow_extra_fields: bool,
}

impl SchemaBuilder {
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn required(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.push(name.into(), field_type, true, None)
    }

    pub fn optional(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.push(name.into(), field_type, false, None)
    }

    pub fn with_default(
        self,
        name: impl Into<String>,
        field_type: FieldType,
        default: Value,
    ) -> Self {
        self.push(name.into(), field_type, false, Some(default))
    }

    pub fn field(mut self, definition: FieldDefinition) -> Self {
        self.fields.push(definition);
        self
    }

    pub fn allow_extra_fields(mut self) -> Self {
        self.allow_extra_fields = true;
        self
    }

    fn push(
        mut self,
        name: String,
        field_type: FieldType,
        required: bool,
        default: Option<Value>,
    ) -> Self {
        self.fields.push(FieldDefinition {
            name,
            field_type,
            required,
            default,
        });
        self
    }

    /// Finish the schema. Rejects empty or duplicate field names and
    /// defaults that do not satisfy their own field type.
    pub fn build(self) -> Result<Schema> {
        if self.name.trim().is_empty() {
            return Err(MongoliteError::Schema("Schema name must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() || field.name.contains("__") || field.name.starts_with('$') {
                return Err(MongoliteError::Schema(format!(
                    "Schema '{}': invalid field name '{}'",
                    self.name, field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(MongoliteError::Schema(format!(
                    "Schema '{}': duplicate field '{}'",
                    self.name, field.name
                )));
            }
            if let Some(default) = &field.default {
                if let Err(issue) = validation::check_value(&field.name, &field.field_type, default) {
                    return Err(MongoliteError::Schema(format!(
                        "Schema '{}': default for '{}' is invalid: {}",
                        self.name, field.name, issue.message
                    )));
                }
            }
        }

        let collection = self.collection.unwrap_or_else(|| self.name.clone());
        Ok(Schema {
            name: self.name,
            collection,
            fields: self.fields,
            allow_extra_fields: self.allow_extra_fields,
        })
    }
}
