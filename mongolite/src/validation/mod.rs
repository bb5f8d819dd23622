use crate::driver::Document;
use crate::schema::{FieldDefinition, FieldKind, FieldType, Schema};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use thiserror::Error;

/// Identifier field every record may carry regardless of its schema.
pub const ID_FIELD: &str = "_id";

/// What went wrong with a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    MissingField,
    TypeMismatch { expected: FieldKind, found: String },
    MinLength { min: usize, actual: usize },
    MaxLength { max: usize, actual: usize },
    MinValue { min: f64 },
    MaxValue { max: f64 },
    Pattern { pattern: String },
    Predicate { name: String },
    UnknownField,
    NotAnObject,
}

/// A single validation failure, addressed by dotted field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    #[serde(flatten)]
    pub kind: IssueKind,
    pub message: String,
}

impl FieldIssue {
    fn new(field: &str, kind: IssueKind, message: String) -> Self {
        FieldIssue {
            field: field.to_string(),
            kind,
            message,
        }
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Every issue found in one record. The first entry is the one that
/// determines the error; the rest are kept for reporting.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{}", join_issues(&self.issues))]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    pub fn first(&self) -> Option<&FieldIssue> {
        self.issues.first()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.issues.iter().any(|i| i.field == field)
    }

    pub fn is_missing(&self, field: &str) -> bool {
        self.issues
            .iter()
            .any(|i| i.field == field && i.kind == IssueKind::MissingField)
    }
}

/// Issues for one record of a batch, by position in the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordIssues {
    pub index: usize,
    pub issues: Vec<FieldIssue>,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{} of the records failed validation", self.records.len())]
pub struct BatchValidationError {
    pub records: Vec<RecordIssues>,
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|i| i.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate a raw record against a schema, returning the normalised record:
/// values coerced to their field kinds and defaults filled in. Fields that
/// are neither supplied nor defaulted stay absent.
pub fn validate(schema: &Schema, record: &Value) -> Result<Document, ValidationError> {
    let mut issues = Vec::new();
    let normalized = validate_into(schema, record, "", &mut issues);
    if issues.is_empty() {
        Ok(normalized)
    } else {
        Err(ValidationError { issues })
    }
}

/// Validate a batch. Either every record is valid, or every invalid record
/// is reported with all of its issues.
pub fn validate_many(
    schema: &Schema,
    records: &[Value],
) -> Result<Vec<Document>, BatchValidationError> {
    let mut valid = Vec::with_capacity(records.len());
    let mut failed = Vec::new();

    for (index, record) in records.iter().enumerate() {
        match validate(schema, record) {
            Ok(doc) => valid.push(doc),
            Err(e) => failed.push(RecordIssues {
                index,
                issues: e.issues,
            }),
        }
    }

    if failed.is_empty() {
        Ok(valid)
    } else {
        Err(BatchValidationError { records: failed })
    }
}

/// Validate the field assignments of a `$set`. Required-ness is not checked.
/// Dotted paths are only checked for a declared top-level field.
pub fn validate_partial(schema: &Schema, fields: &Document) -> Result<Document, ValidationError> {
    let mut issues = Vec::new();
    let mut out = Document::new();

    for (key, value) in fields {
        if key == ID_FIELD {
            out.insert(key.clone(), value.clone());
            continue;
        }

        let top = key.split('.').next().unwrap_or(key);
        let definition = match schema.field(top) {
            Some(def) => def,
            None => {
                if schema.allows_extra_fields() {
                    out.insert(key.clone(), value.clone());
                } else {
                    issues.push(unknown_field(key));
                }
                continue;
            }
        };

        if top != key {
            out.insert(key.clone(), value.clone());
            continue;
        }

        if value.is_null() {
            if definition.required {
                issues.push(type_mismatch(key, definition.kind(), value));
            } else {
                out.insert(key.clone(), Value::Null);
            }
            continue;
        }

        if let Some(coerced) = check_into(key, &definition.field_type, value, &mut issues) {
            out.insert(key.clone(), coerced);
        }
    }

    if issues.is_empty() {
        Ok(out)
    } else {
        Err(ValidationError { issues })
    }
}

/// Check a single value against a field type, returning the coerced value or
/// the first issue found.
pub(crate) fn check_value(path: &str, field_type: &FieldType, value: &Value) -> Result<Value, FieldIssue> {
    let mut issues = Vec::new();
    match check_into(path, field_type, value, &mut issues) {
        Some(v) if issues.is_empty() => Ok(v),
        _ => Err(issues
            .into_iter()
            .next()
            .unwrap_or_else(|| type_mismatch(path, field_type.kind, value))),
    }
}

fn validate_into(schema: &Schema, record: &Value, prefix: &str, issues: &mut Vec<FieldIssue>) -> Document {
    let mut out = Document::new();

    let mapping = match record.as_object() {
        Some(m) => m,
        None => {
            let field = if prefix.is_empty() { "$root" } else { prefix };
            issues.push(FieldIssue::new(
                field,
                IssueKind::NotAnObject,
                format!("Expected an object for '{}', got {}", field, type_name(record)),
            ));
            return out;
        }
    };

    for definition in schema.fields() {
        let path = join_path(prefix, &definition.name);

        match mapping.get(&definition.name) {
            None => {
                if let Some(default) = &definition.default {
                    out.insert(definition.name.clone(), default.clone());
                } else if definition.required {
                    issues.push(FieldIssue::new(
                        &path,
                        IssueKind::MissingField,
                        format!("Required field '{path}' is missing"),
                    ));
                }
            }
            Some(Value::Null) => {
                if definition.required {
                    issues.push(type_mismatch(&path, definition.kind(), &Value::Null));
                } else {
                    out.insert(definition.name.clone(), Value::Null);
                }
            }
            Some(value) => {
                if let Some(coerced) = check_into(&path, &definition.field_type, value, issues) {
                    out.insert(definition.name.clone(), coerced);
                }
            }
        }
    }

    for (key, value) in mapping {
        if schema.field(key).is_some() {
            continue;
        }
        if key == ID_FIELD || schema.allows_extra_fields() {
            out.insert(key.clone(), value.clone());
        } else {
            issues.push(unknown_field(&join_path(prefix, key)));
        }
    }

    out
}

/// Coerce then apply constraints: lengths and ranges, pattern, predicates.
/// Records at most one issue for a scalar value.
fn check_into(
    path: &str,
    field_type: &FieldType,
    value: &Value,
    issues: &mut Vec<FieldIssue>,
) -> Option<Value> {
    let coerced = match coerce(field_type.kind, value) {
        Some(v) => v,
        None => {
            issues.push(type_mismatch(path, field_type.kind, value));
            return None;
        }
    };

    if let Some(issue) = check_bounds(path, field_type, &coerced) {
        issues.push(issue);
        return None;
    }

    if let (Some(re), Some(s)) = (&field_type.pattern, coerced.as_str()) {
        if !re.is_match(s) {
            issues.push(FieldIssue::new(
                path,
                IssueKind::Pattern {
                    pattern: re.as_str().to_string(),
                },
                format!("Field '{path}' value '{s}' does not match pattern '{}'", re.as_str()),
            ));
            return None;
        }
    }

    for predicate in &field_type.predicates {
        if let Err(reason) = predicate.check(&coerced) {
            issues.push(FieldIssue::new(
                path,
                IssueKind::Predicate {
                    name: predicate.name().to_string(),
                },
                format!("Field '{path}' failed check '{}': {reason}", predicate.name()),
            ));
            return None;
        }
    }

    if let (Some(nested), true) = (&field_type.schema, coerced.is_object()) {
        let before = issues.len();
        let doc = validate_into(nested, &coerced, path, issues);
        return (issues.len() == before).then_some(Value::Object(doc));
    }

    if let (Some(item_type), Value::Array(items)) = (&field_type.items, &coerced) {
        let before = issues.len();
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{path}.{i}");
            if item.is_null() && item_type.kind != FieldKind::Any {
                issues.push(type_mismatch(&item_path, item_type.kind, item));
                continue;
            }
            if let Some(v) = check_into(&item_path, item_type, item, issues) {
                out.push(v);
            }
        }
        return (issues.len() == before).then_some(Value::Array(out));
    }

    Some(coerced)
}

fn check_bounds(path: &str, field_type: &FieldType, value: &Value) -> Option<FieldIssue> {
    let length = match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        _ => None,
    };

    if let Some(actual) = length {
        if let Some(min) = field_type.min_length {
            if actual < min {
                return Some(FieldIssue::new(
                    path,
                    IssueKind::MinLength { min, actual },
                    format!("Field '{path}' must have at least {min} characters or items, got {actual}"),
                ));
            }
        }
        if let Some(max) = field_type.max_length {
            if actual > max {
                return Some(FieldIssue::new(
                    path,
                    IssueKind::MaxLength { max, actual },
                    format!("Field '{path}' must have at most {max} characters or items, got {actual}"),
                ));
            }
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = field_type.min {
            if n < min {
                return Some(FieldIssue::new(
                    path,
                    IssueKind::MinValue { min },
                    format!("Field '{path}' must be >= {min}, got {n}"),
                ));
            }
        }
        if let Some(max) = field_type.max {
            if n > max {
                return Some(FieldIssue::new(
                    path,
                    IssueKind::MaxValue { max },
                    format!("Field '{path}' must be <= {max}, got {n}"),
                ));
            }
        }
    }

    None
}

/// Lenient coercion to a field kind. `None` means the value cannot be
/// represented as that kind.
fn coerce(kind: FieldKind, value: &Value) -> Option<Value> {
    match kind {
        FieldKind::Any => Some(value.clone()),
        FieldKind::String => value.is_string().then(|| value.clone()),
        FieldKind::Integer => match value {
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Some(value.clone())
                } else {
                    n.as_f64().and_then(integral_from_f64)
                }
            }
            Value::String(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    Some(Value::from(i))
                } else {
                    s.parse::<f64>().ok().and_then(integral_from_f64)
                }
            }
            _ => None,
        },
        FieldKind::Number => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    Some(Value::from(i))
                } else {
                    s.parse::<f64>()
                        .ok()
                        .and_then(Number::from_f64)
                        .map(Value::Number)
                }
            }
            _ => None,
        },
        FieldKind::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Some(Value::Bool(false)),
                _ => None,
            },
            Value::Number(n) => match n.as_i64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _ => None,
            },
            _ => None,
        },
        FieldKind::Datetime => {
            let s = value.as_str()?;
            let valid = chrono::DateTime::parse_from_rfc3339(s).is_ok()
                || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok();
            valid.then(|| value.clone())
        }
        FieldKind::List => value.is_array().then(|| value.clone()),
        FieldKind::Object => value.is_object().then(|| value.clone()),
    }
}

fn integral_from_f64(f: f64) -> Option<Value> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

// ── Update operators ───────────────────────────────────────────────

/// Validate an operator update document. `$set` is checked like
/// `validate_partial`. `$unset` may not remove `_id` or a required field.
/// `$inc` needs a numeric field and delta. `$push`, `$addToSet` and `$pull`
/// need a list field, and pushed items must satisfy the item type.
///
/// Whether an `$inc` stays within a field's range depends on the stored
/// values; see `increment_guards`.
pub fn validate_update(schema: &Schema, update: &Document) -> Result<Document, ValidationError> {
    let mut issues = Vec::new();
    let mut out = Document::new();

    for (op, body) in update {
        let fields = match body.as_object() {
            Some(fields) => fields,
            None => {
                out.insert(op.clone(), body.clone());
                continue;
            }
        };

        let checked = match op.as_str() {
            "$set" => match validate_partial(schema, fields) {
                Ok(doc) => doc,
                Err(e) => {
                    issues.extend(e.issues);
                    continue;
                }
            },
            "$unset" => {
                check_unset(schema, fields, &mut issues);
                fields.clone()
            }
            "$inc" => {
                check_increments(schema, fields, &mut issues);
                fields.clone()
            }
            "$push" | "$addToSet" => check_list_items(schema, fields, &mut issues),
            "$pull" => {
                for key in fields.keys() {
                    list_target(schema, key, &mut issues);
                }
                fields.clone()
            }
            _ => fields.clone(),
        };
        out.insert(op.clone(), Value::Object(checked));
    }

    if issues.is_empty() {
        Ok(out)
    } else {
        Err(ValidationError { issues })
    }
}

/// Range limit an `$inc` must respect, checked against stored documents.
#[derive(Debug, Clone, PartialEq)]
pub struct IncrementGuard {
    pub field: String,
    pub delta: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl IncrementGuard {
    /// A document without the field ends up holding the delta itself.
    fn delta_in_range(&self) -> bool {
        self.min.map_or(true, |min| self.delta >= min) && self.max.map_or(true, |max| self.delta <= max)
    }

    /// Matches documents the increment keeps in range.
    pub fn within(&self) -> Document {
        let mut range = Document::new();
        if let Some(min) = self.min {
            range.insert("$gte".into(), Value::from(min - self.delta));
        }
        if let Some(max) = self.max {
            range.insert("$lte".into(), Value::from(max - self.delta));
        }

        let mut arms = vec![single(&self.field, Value::Object(range))];
        if self.delta_in_range() {
            arms.push(single(&self.field, single("$exists", Value::Bool(false))));
        }
        any_of(arms)
    }

    /// Matches documents the increment would push out of range.
    pub fn violations(&self) -> Document {
        let mut arms = Vec::new();
        if let Some(min) = self.min {
            arms.push(single(&self.field, single("$lt", Value::from(min - self.delta))));
        }
        if let Some(max) = self.max {
            arms.push(single(&self.field, single("$gt", Value::from(max - self.delta))));
        }
        if !self.delta_in_range() {
            arms.push(single(&self.field, single("$exists", Value::Bool(false))));
        }
        any_of(arms)
    }

    pub fn issue(&self) -> FieldIssue {
        let path = self.field.as_str();
        match (self.min, self.max) {
            (Some(min), max) if self.delta < 0.0 || max.is_none() => FieldIssue::new(
                path,
                IssueKind::MinValue { min },
                format!("Incrementing '{path}' by {} would go below {min}", self.delta),
            ),
            (_, Some(max)) => FieldIssue::new(
                path,
                IssueKind::MaxValue { max },
                format!("Incrementing '{path}' by {} would exceed {max}", self.delta),
            ),
            (None, None) => FieldIssue::new(
                path,
                IssueKind::Predicate { name: "range".into() },
                format!("Incrementing '{path}' by {} leaves its range", self.delta),
            ),
            // Covered by the first arm's `max.is_none()` guard.
            (Some(_), None) => unreachable!(),
        }
    }
}

/// Guards for every `$inc` on a declared top-level field with a range.
pub fn increment_guards(schema: &Schema, update: &Document) -> Vec<IncrementGuard> {
    let fields = match update.get("$inc").and_then(Value::as_object) {
        Some(fields) => fields,
        None => return Vec::new(),
    };

    fields
        .iter()
        .filter_map(|(key, delta)| {
            let field_type = &schema.field(key)?.field_type;
            if field_type.min.is_none() && field_type.max.is_none() {
                return None;
            }
            Some(IncrementGuard {
                field: key.clone(),
                delta: delta.as_f64()?,
                min: field_type.min,
                max: field_type.max,
            })
        })
        .collect()
}

/// The declared field an operator on `key` writes to. Nested paths and
/// allowed extra fields are not checked further.
fn update_target<'s>(
    schema: &'s Schema,
    key: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<&'s FieldDefinition> {
    let top = key.split('.').next().unwrap_or(key);
    match schema.field(top) {
        Some(definition) if top == key => Some(definition),
        Some(_) => None,
        None => {
            if key != ID_FIELD && !schema.allows_extra_fields() {
                issues.push(unknown_field(key));
            }
            None
        }
    }
}

fn check_unset(schema: &Schema, fields: &Document, issues: &mut Vec<FieldIssue>) {
    for key in fields.keys() {
        let removes_required = key == ID_FIELD
            || update_target(schema, key, issues)
                .map(|d| d.required)
                .unwrap_or(false);
        if removes_required {
            issues.push(FieldIssue::new(
                key,
                IssueKind::MissingField,
                format!("Required field '{key}' cannot be removed"),
            ));
        }
    }
}

fn check_increments(schema: &Schema, fields: &Document, issues: &mut Vec<FieldIssue>) {
    for (key, delta) in fields {
        let definition = match update_target(schema, key, issues) {
            Some(d) => d,
            None => continue,
        };
        let kind = definition.kind();
        if !matches!(kind, FieldKind::Integer | FieldKind::Number | FieldKind::Any) {
            issues.push(FieldIssue::new(
                key,
                IssueKind::TypeMismatch {
                    expected: FieldKind::Number,
                    found: kind.to_string(),
                },
                format!("Field '{key}' of kind {kind} cannot be incremented"),
            ));
            continue;
        }

        let integral = delta.is_i64() || delta.is_u64();
        let numeric = delta.is_number();
        if !numeric || (kind == FieldKind::Integer && !integral) {
            let expected = if kind == FieldKind::Any { FieldKind::Number } else { kind };
            issues.push(type_mismatch(key, expected, delta));
        }
    }
}

/// Item type of the list field an operator on `key` targets.
fn list_target<'s>(
    schema: &'s Schema,
    key: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<&'s FieldType> {
    let definition = update_target(schema, key, issues)?;
    match definition.kind() {
        FieldKind::List => definition.field_type.items.as_deref(),
        FieldKind::Any => None,
        other => {
            issues.push(FieldIssue::new(
                key,
                IssueKind::TypeMismatch {
                    expected: FieldKind::List,
                    found: other.to_string(),
                },
                format!("Field '{key}' of kind {other} is not a list"),
            ));
            None
        }
    }
}

fn check_list_items(schema: &Schema, fields: &Document, issues: &mut Vec<FieldIssue>) -> Document {
    let mut out = Document::new();
    for (key, value) in fields {
        let item_type = match list_target(schema, key, issues) {
            Some(t) => t,
            None => {
                out.insert(key.clone(), value.clone());
                continue;
            }
        };

        match value.as_object().and_then(|o| o.get("$each")) {
            Some(Value::Array(each)) => {
                let mut items = Vec::with_capacity(each.len());
                for (i, item) in each.iter().enumerate() {
                    match check_value(&format!("{key}.{i}"), item_type, item) {
                        Ok(v) => items.push(v),
                        Err(issue) => issues.push(issue),
                    }
                }
                out.insert(key.clone(), single("$each", Value::Array(items)));
            }
            Some(other) => issues.push(type_mismatch(key, FieldKind::List, other)),
            None => match check_value(key, item_type, value) {
                Ok(v) => {
                    out.insert(key.clone(), v);
                }
                Err(issue) => issues.push(issue),
            },
        }
    }
    out
}

fn single(key: &str, value: Value) -> Value {
    let mut doc = Document::new();
    doc.insert(key.to_string(), value);
    Value::Object(doc)
}

fn any_of(arms: Vec<Value>) -> Document {
    let mut doc = Document::new();
    doc.insert("$or".to_string(), Value::Array(arms));
    doc
}

fn type_mismatch(path: &str, expected: FieldKind, value: &Value) -> FieldIssue {
    let found = type_name(value).to_string();
    FieldIssue::new(
        path,
        IssueKind::TypeMismatch {
            expected,
            found: found.clone(),
        },
        format!("Field '{path}' expected {expected}, got {found}"),
    )
}

fn unknown_field(path: &str) -> FieldIssue {
    FieldIssue::new(
        path,
        IssueKind::UnknownField,
        format!("Unexpected field '{path}' (not declared in schema)"),
    )
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldTypes, Predicate};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn user_schema() -> Schema {
        Schema::builder("User")
            .required("name", FieldTypes::name())
            .required("email", FieldTypes::email())
            .required("age", FieldTypes::age())
            .with_default("hobbies", FieldType::list(FieldType::string()), json!([]))
            .optional("bio", FieldTypes::description())
            .build()
            .unwrap()
    }

    #[test]
    fn test_valid_user() {
        let schema = user_schema();
        let doc = validate(
            &schema,
            &json!({"name": "Alice", "email": "alice@example.com", "age": 28}),
        )
        .unwrap();

        assert_eq!(
            Value::Object(doc),
            json!({"name": "Alice", "email": "alice@example.com", "age": 28, "hobbies": []})
        );
    }

    #[test]
    fn test_unset_optional_stays_absent() {
        let schema = user_schema();
        let doc = validate(
            &schema,
            &json!({"name": "Alice", "email": "alice@example.com", "age": 28}),
        )
        .unwrap();
        assert!(!doc.contains_key("bio"));

        let doc = validate(
            &schema,
            &json!({"name": "Alice", "email": "alice@example.com", "age": 28, "bio": null}),
        )
        .unwrap();
        assert_eq!(doc.get("bio"), Some(&Value::Null));
    }

    #[test]
    fn test_all_violations_collected() {
        let schema = user_schema();
        let err = validate(&schema, &json!({"name": "", "email": "not-an-email", "age": -5}))
            .unwrap_err();

        assert_eq!(err.issues.len(), 3);
        assert!(matches!(err.issues[0].kind, IssueKind::MinLength { min: 1, actual: 0 }));
        assert!(matches!(err.issues[1].kind, IssueKind::Pattern { .. }));
        assert!(matches!(err.issues[2].kind, IssueKind::MinValue { .. }));
        assert_eq!(err.first().unwrap().field, "name");
    }

    #[test]
    fn test_missing_required_field() {
        let schema = user_schema();
        let err = validate(&schema, &json!({"name": "Alice", "age": 3})).unwrap_err();
        assert!(err.is_missing("email"));
    }

    #[test]
    fn test_numeric_string_coerced() {
        let schema = user_schema();
        let doc = validate(
            &schema,
            &json!({"name": "Bob", "email": "bob@example.com", "age": "35"}),
        )
        .unwrap();
        assert_eq!(doc["age"], json!(35));
    }

    #[test]
    fn test_type_mismatch_names_field() {
        let schema = user_schema();
        let err = validate(
            &schema,
            &json!({"name": "Bob", "email": "bob@example.com", "age": "thirty"}),
        )
        .unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert_eq!(err.issues[0].field, "age");
        assert!(matches!(
            err.issues[0].kind,
            IssueKind::TypeMismatch { expected: FieldKind::Integer, .. }
        ));
    }

    #[test]
    fn test_fractional_integer_rejected() {
        let schema = user_schema();
        assert!(validate(
            &schema,
            &json!({"name": "Bob", "email": "bob@example.com", "age": 30.5}),
        )
        .is_err());

        let doc = validate(
            &schema,
            &json!({"name": "Bob", "email": "bob@example.com", "age": 30.0}),
        )
        .unwrap();
        assert_eq!(doc["age"], json!(30));
    }

    #[test]
    fn test_unknown_field_rejected_by_default() {
        let schema = user_schema();
        let err = validate(
            &schema,
            &json!({"name": "Bob", "email": "bob@example.com", "age": 30, "role": "admin"}),
        )
        .unwrap_err();
        assert!(err.issues.iter().any(|i| i.field == "role" && i.kind == IssueKind::UnknownField));
    }

    #[test]
    fn test_extra_fields_opt_in() {
        let schema = Schema::builder("Event")
            .required("type", FieldType::string())
            .allow_extra_fields()
            .build()
            .unwrap();
        let doc = validate(&schema, &json!({"type": "click", "x": 1})).unwrap();
        assert_eq!(doc["x"], json!(1));
    }

    #[test]
    fn test_id_passes_through() {
        let schema = user_schema();
        let doc = validate(
            &schema,
            &json!({"_id": "abc", "name": "Bob", "email": "bob@example.com", "age": 30}),
        )
        .unwrap();
        assert_eq!(doc["_id"], json!("abc"));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let schema = user_schema();
        let first = validate(
            &schema,
            &json!({"name": "Carol", "email": "carol@example.com", "age": "42"}),
        )
        .unwrap();
        let second = validate(&schema, &Value::Object(first.clone())).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_list_items_checked() {
        let schema = user_schema();
        let err = validate(
            &schema,
            &json!({"name": "Bob", "email": "bob@example.com", "age": 30, "hobbies": ["chess", 7]}),
        )
        .unwrap_err();
        assert_eq!(err.issues[0].field, "hobbies.1");
    }

    #[test]
    fn test_nested_object() {
        let address = Schema::builder("Address")
            .required("city", FieldType::string().min_length(1))
            .optional("zip", FieldType::string())
            .build()
            .unwrap();
        let schema = Schema::builder("Customer")
            .required("name", FieldTypes::name())
            .optional("address", FieldType::object(address))
            .build()
            .unwrap();

        let err = validate(&schema, &json!({"name": "Ann", "address": {"zip": "123"}})).unwrap_err();
        assert!(err.is_missing("address.city"));

        let doc = validate(&schema, &json!({"name": "Ann", "address": {"city": "Oslo"}})).unwrap();
        assert_eq!(doc["address"], json!({"city": "Oslo"}));
    }

    #[test]
    fn test_predicate_runs_after_builtin_checks() {
        let even = FieldType::integer()
            .min(0.0)
            .predicate(Predicate::new("even", |v| match v.as_i64() {
                Some(n) if n % 2 == 0 => Ok(()),
                _ => Err("must be even".into()),
            }));
        let schema = Schema::builder("Pair").required("n", even).build().unwrap();

        let err = validate(&schema, &json!({"n": -3})).unwrap_err();
        assert!(matches!(err.issues[0].kind, IssueKind::MinValue { .. }));

        let err = validate(&schema, &json!({"n": 3})).unwrap_err();
        assert!(matches!(err.issues[0].kind, IssueKind::Predicate { .. }));

        assert!(validate(&schema, &json!({"n": 4})).is_ok());
    }

    #[test]
    fn test_datetime_field() {
        let schema = Schema::builder("Post")
            .required("published_at", FieldType::datetime())
            .build()
            .unwrap();
        assert!(validate(&schema, &json!({"published_at": "2024-03-01T10:00:00Z"})).is_ok());
        assert!(validate(&schema, &json!({"published_at": "2024-03-01"})).is_ok());
        assert!(validate(&schema, &json!({"published_at": "yesterday"})).is_err());
    }

    #[test]
    fn test_validate_many_reports_every_bad_record() {
        let schema = user_schema();
        let records = vec![
            json!({"name": "Ok", "email": "ok@example.com", "age": 20}),
            json!({"name": "", "email": "ok@example.com", "age": 20}),
            json!({"name": "Ok", "email": "bad", "age": 999}),
        ];
        let err = validate_many(&schema, &records).unwrap_err();
        let indexes: Vec<usize> = err.records.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![1, 2]);
        assert_eq!(err.records[1].issues.len(), 2);
    }

    #[test]
    fn test_validate_partial() {
        let schema = user_schema();
        let mut set = Document::new();
        set.insert("age".into(), json!("26"));
        let doc = validate_partial(&schema, &set).unwrap();
        assert_eq!(doc["age"], json!(26));

        let mut set = Document::new();
        set.insert("age".into(), json!(-1));
        set.insert("nickname".into(), json!("x"));
        let err = validate_partial(&schema, &set).unwrap_err();
        assert!(err.has_field("age"));
        assert!(err.has_field("nickname"));
    }

    #[test]
    fn test_not_an_object() {
        let schema = user_schema();
        let err = validate(&schema, &json!(["nope"])).unwrap_err();
        assert_eq!(err.issues[0].kind, IssueKind::NotAnObject);
    }

    fn update_doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_update_operators_checked_against_schema() {
        let schema = user_schema();

        let doc = validate_update(
            &schema,
            &update_doc(json!({
                "$set": {"age": "31"},
                "$inc": {"age": 1},
                "$push": {"hobbies": {"$each": ["chess", "go"]}},
                "$unset": {"bio": ""}
            })),
        )
        .unwrap();
        assert_eq!(doc["$set"], json!({"age": 31}));
        assert_eq!(doc["$push"], json!({"hobbies": {"$each": ["chess", "go"]}}));

        let err = validate_update(
            &schema,
            &update_doc(json!({
                "$unset": {"name": ""},
                "$inc": {"email": 1},
                "$push": {"age": 3}
            })),
        )
        .unwrap_err();
        assert_eq!(err.issues.len(), 3);
        let kind_of = |field: &str| err.issues.iter().find(|i| i.field == field).map(|i| i.kind.clone());
        assert_eq!(kind_of("name"), Some(IssueKind::MissingField));
        assert!(matches!(
            kind_of("email"),
            Some(IssueKind::TypeMismatch { expected: FieldKind::Number, .. })
        ));
        assert!(matches!(
            kind_of("age"),
            Some(IssueKind::TypeMismatch { expected: FieldKind::List, .. })
        ));
    }

    #[test]
    fn test_update_rejects_fractional_and_unknown_targets() {
        let schema = user_schema();
        let err = validate_update(&schema, &update_doc(json!({"$inc": {"age": 1.5}}))).unwrap_err();
        assert!(err.has_field("age"));

        let err = validate_update(&schema, &update_doc(json!({"$pull": {"nickname": "x"}}))).unwrap_err();
        assert_eq!(err.issues[0].kind, IssueKind::UnknownField);

        let err = validate_update(&schema, &update_doc(json!({"$unset": {"_id": ""}}))).unwrap_err();
        assert_eq!(err.issues[0].field, "_id");

        let err = validate_update(
            &schema,
            &update_doc(json!({"$addToSet": {"hobbies": {"$each": ["chess", 7]}}})),
        )
        .unwrap_err();
        assert_eq!(err.issues[0].field, "hobbies.1");
    }

    #[test]
    fn test_increment_guards() {
        let schema = user_schema();
        let guards = increment_guards(&schema, &update_doc(json!({"$inc": {"age": 500}})));
        assert_eq!(guards.len(), 1);

        let guard = &guards[0];
        assert_eq!(guard.field, "age");
        assert_eq!(
            Value::Object(guard.within()),
            json!({"$or": [{"age": {"$gte": -500.0, "$lte": -350.0}}]})
        );
        assert_eq!(
            Value::Object(guard.violations()),
            json!({"$or": [
                {"age": {"$lt": -500.0}},
                {"age": {"$gt": -350.0}},
                {"age": {"$exists": false}}
            ]})
        );
        assert_eq!(guard.issue().kind, IssueKind::MaxValue { max: 150.0 });

        let down = increment_guards(&schema, &update_doc(json!({"$inc": {"age": -1}})));
        assert_eq!(down[0].issue().kind, IssueKind::MinValue { min: 0.0 });

        assert!(increment_guards(&schema, &update_doc(json!({"$set": {"age": 3}}))).is_empty());
    }
}
