use super::field_types::FieldTypes;
use super::types::{FieldDefinition, FieldKind, FieldType, Schema};
use crate::error::{MongoliteError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Top-level layout of a schemas.yaml file
#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    schemas: Vec<SchemaSpec>,
}

#[derive(Debug, Deserialize)]
struct SchemaSpec {
    name: String,
    #[serde(default)]
    collection: Option<String>,
    #[serde(default)]
    allow_extra_fields: bool,
    #[serde(default)]
    fields: Vec<FieldSpec>,
}

#[derive(Debug, Deserialize)]
struct FieldSpec {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    /// Defaults to "required unless a default is given".
    #[serde(default)]
    required: Option<bool>,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    min_length: Option<usize>,
    #[serde(default)]
    max_length: Option<usize>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    items: Option<String>,
    #[serde(default)]
    schema: Option<String>,
}

/// Parse a schemas.yaml file into schemas, in declaration order
pub fn parse_schemas(path: &Path) -> Result<Vec<Schema>> {
    let content = std::fs::read_to_string(path)?;
    parse_schemas_str(&content)
}

/// Parse a schemas YAML string. Object fields may reference schemas
/// declared earlier in the same document.
pub fn parse_schemas_str(content: &str) -> Result<Vec<Schema>> {
    let file: SchemaFile = serde_yaml::from_str(content)?;
    let mut declared: HashMap<String, Schema> = HashMap::new();
    let mut schemas = Vec::new();

    for spec in file.schemas {
        let mut builder = Schema::builder(spec.name.clone());
        if let Some(collection) = &spec.collection {
            builder = builder.collection(collection.clone());
        }
        if spec.allow_extra_fields {
            builder = builder.allow_extra_fields();
        }

        for field in spec.fields {
            let field_type = resolve_field(&spec.name, &field, &declared)?;
            let required = field.required.unwrap_or(field.default.is_none());
            builder = builder.field(FieldDefinition {
                name: field.name,
                field_type,
                required,
                default: field.default,
            });
        }

        let schema = builder.build()?;
        declared.insert(schema.name().to_string(), schema.clone());
        schemas.push(schema);
    }

    Ok(schemas)
}

fn resolve_field(
    schema_name: &str,
    field: &FieldSpec,
    declared: &HashMap<String, Schema>,
) -> Result<FieldType> {
    let mut field_type = resolve_type_name(schema_name, &field.field_type, declared)?;

    if field_type.kind == FieldKind::List {
        if let Some(items) = &field.items {
            field_type.items = Some(Box::new(resolve_type_name(schema_name, items, declared)?));
        }
    }
    if field_type.kind == FieldKind::Object {
        if let Some(nested) = &field.schema {
            let nested_schema = declared.get(nested).ok_or_else(|| {
                MongoliteError::Schema(format!(
                    "Schema '{schema_name}': field '{}' references unknown schema '{nested}'",
                    field.name
                ))
            })?;
            field_type.schema = Some(std::sync::Arc::new(nested_schema.clone()));
        }
    }

    if let Some(v) = field.min_length {
        field_type = field_type.min_length(v);
    }
    if let Some(v) = field.max_length {
        field_type = field_type.max_length(v);
    }
    if let Some(v) = field.min {
        field_type = field_type.min(v);
    }
    if let Some(v) = field.max {
        field_type = field_type.max(v);
    }
    if let Some(p) = &field.pattern {
        field_type = field_type.pattern(p)?;
    }

    Ok(field_type)
}

/// Primitive kinds first, then the built-in catalogue, then earlier schemas.
fn resolve_type_name(
    schema_name: &str,
    type_name: &str,
    declared: &HashMap<String, Schema>,
) -> Result<FieldType> {
    if let Some(kind) = FieldKind::parse(type_name) {
        return Ok(FieldType::of(kind));
    }
    if let Some(field_type) = FieldTypes::lookup(type_name) {
        return Ok(field_type);
    }
    if let Some(nested) = declared.get(type_name) {
        return Ok(FieldType::object(nested.clone()));
    }
    Err(MongoliteError::Schema(format!(
        "Schema '{schema_name}': unknown field type '{type_name}'"
    )))
}
