use super::{FilterExpr, Operator, AND_KEY, OR_KEY};
use crate::driver::Document;
use crate::error::Result;
use serde_json::Value;

/// Compile a parsed filter into the store-native operator tree.
///
/// Comparisons on the same field merge into one operator object when their
/// operator keys are disjoint (`{"age": {"$gte": 25, "$lte": 35}}`). Clauses
/// that would collide are kept apart under `$and`.
pub fn compile(expr: &FilterExpr) -> Document {
    match expr {
        FilterExpr::Comparison { field, op, value } => {
            let mut doc = Document::new();
            doc.insert(field.clone(), Value::Object(native_operator(*op, value)));
            doc
        }
        FilterExpr::Or(children) => {
            let mut doc = Document::new();
            doc.insert(
                OR_KEY.to_string(),
                Value::Array(children.iter().map(|c| Value::Object(compile(c))).collect()),
            );
            doc
        }
        FilterExpr::And(children) => compile_and(children),
    }
}

/// Parse and compile a flat keyword mapping in one step.
pub fn compile_flat(mapping: &Value) -> Result<Document> {
    let expr = FilterExpr::parse(mapping)?;
    Ok(compile(&expr))
}

fn compile_and(children: &[FilterExpr]) -> Document {
    let mut merged = Document::new();
    let mut overflow: Vec<Value> = Vec::new();

    for child in children {
        for (key, value) in compile(child) {
            match merged.get_mut(&key) {
                None => {
                    merged.insert(key, value);
                }
                Some(Value::Object(existing))
                    if !key.starts_with('$')
                        && value
                            .as_object()
                            .map(|ops| ops.keys().all(|k| !existing.contains_key(k)))
                            .unwrap_or(false) =>
                {
                    if let Value::Object(ops) = value {
                        existing.extend(ops);
                    }
                }
                Some(_) => {
                    let mut single = Document::new();
                    single.insert(key, value);
                    overflow.push(Value::Object(single));
                }
            }
        }
    }

    if overflow.is_empty() {
        return merged;
    }

    let mut parts = vec![Value::Object(merged)];
    parts.extend(overflow);
    let mut doc = Document::new();
    doc.insert(AND_KEY.to_string(), Value::Array(parts));
    doc
}

/// The fixed suffix-to-operator table.
fn native_operator(op: Operator, value: &Value) -> Document {
    let mut ops = Document::new();
    match op {
        Operator::Eq => insert(&mut ops, "$eq", value.clone()),
        Operator::Ne => insert(&mut ops, "$ne", value.clone()),
        Operator::Gt => insert(&mut ops, "$gt", value.clone()),
        Operator::Gte => insert(&mut ops, "$gte", value.clone()),
        Operator::Lt => insert(&mut ops, "$lt", value.clone()),
        Operator::Lte => insert(&mut ops, "$lte", value.clone()),
        Operator::In => insert(&mut ops, "$in", value.clone()),
        Operator::Nin => insert(&mut ops, "$nin", value.clone()),
        Operator::Exists => insert(&mut ops, "$exists", value.clone()),
        Operator::Regex => insert(&mut ops, "$regex", value.clone()),
        Operator::Contains => insert(&mut ops, "$regex", Value::String(literal(value))),
        Operator::IContains => {
            insert(&mut ops, "$regex", Value::String(literal(value)));
            insert(&mut ops, "$options", Value::String("i".into()));
        }
        Operator::StartsWith => {
            insert(&mut ops, "$regex", Value::String(format!("^{}", literal(value))))
        }
        Operator::EndsWith => {
            insert(&mut ops, "$regex", Value::String(format!("{}$", literal(value))))
        }
    }
    ops
}

fn insert(ops: &mut Document, key: &str, value: Value) {
    ops.insert(key.to_string(), value);
}

/// Escape a text operand so it matches literally inside `$regex`.
fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => regex::escape(s),
        other => regex::escape(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn flat(v: Value) -> Value {
        Value::Object(compile_flat(&v).unwrap())
    }

    #[test]
    fn test_operator_table() {
        let cases = vec![
            (json!({"a": 1}), json!({"a": {"$eq": 1}})),
            (json!({"a__eq": 1}), json!({"a": {"$eq": 1}})),
            (json!({"a__ne": 1}), json!({"a": {"$ne": 1}})),
            (json!({"a__gt": 1}), json!({"a": {"$gt": 1}})),
            (json!({"a__gte": 1}), json!({"a": {"$gte": 1}})),
            (json!({"a__lt": 1}), json!({"a": {"$lt": 1}})),
            (json!({"a__lte": 1}), json!({"a": {"$lte": 1}})),
            (json!({"a__in": [1, 2]}), json!({"a": {"$in": [1, 2]}})),
            (json!({"a__nin": [1]}), json!({"a": {"$nin": [1]}})),
            (json!({"a__exists": true}), json!({"a": {"$exists": true}})),
            (json!({"a__regex": "^x.*"}), json!({"a": {"$regex": "^x.*"}})),
            (json!({"a__contains": "x.y"}), json!({"a": {"$regex": "x\\.y"}})),
            (
                json!({"a__icontains": "X+"}),
                json!({"a": {"$regex": "X\\+", "$options": "i"}}),
            ),
            (json!({"a__startswith": "ab"}), json!({"a": {"$regex": "^ab"}})),
            (json!({"a__endswith": "(z)"}), json!({"a": {"$regex": "\\(z\\)$"}})),
        ];

        for (input, expected) in cases {
            assert_eq!(flat(input.clone()), expected, "input: {input}");
        }
    }

    #[test]
    fn test_same_field_ranges_merge() {
        assert_eq!(
            flat(json!({"age__gte": 25, "age__lte": 35, "name": "Bob"})),
            json!({"age": {"$gte": 25, "$lte": 35}, "name": {"$eq": "Bob"}})
        );
    }

    #[test]
    fn test_colliding_operators_split_into_and() {
        assert_eq!(
            flat(json!({"name__contains": "li", "name__startswith": "A"})),
            json!({"$and": [
                {"name": {"$regex": "li"}},
                {"name": {"$regex": "^A"}}
            ]})
        );
    }

    #[test]
    fn test_or_group() {
        assert_eq!(
            flat(json!({"$or": [{"age__lt": 18}, {"age__gt": 65}], "active": true})),
            json!({
                "$or": [{"age": {"$lt": 18}}, {"age": {"$gt": 65}}],
                "active": {"$eq": true}
            })
        );
    }

    #[test]
    fn test_two_or_groups_do_not_overwrite() {
        let a = FilterExpr::parse(&json!({"$or": [{"a": 1}, {"b": 2}]})).unwrap();
        let b = FilterExpr::parse(&json!({"$or": [{"c": 3}, {"d": 4}]})).unwrap();
        let compiled = compile(&FilterExpr::And(vec![a, b]));
        assert_eq!(
            Value::Object(compiled),
            json!({"$and": [
                {"$or": [{"a": {"$eq": 1}}, {"b": {"$eq": 2}}]},
                {"$or": [{"c": {"$eq": 3}}, {"d": {"$eq": 4}}]}
            ]})
        );
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert_eq!(compile(&FilterExpr::And(vec![])), Document::new());
        assert_eq!(flat(json!({})), json!({}));
    }

    #[test]
    fn test_clause_order_does_not_matter() {
        let ab = compile(&FilterExpr::And(vec![
            FilterExpr::comparison("a", Operator::Eq, 1),
            FilterExpr::comparison("b", Operator::Eq, 2),
        ]));
        let ba = compile(&FilterExpr::And(vec![
            FilterExpr::comparison("b", Operator::Eq, 2),
            FilterExpr::comparison("a", Operator::Eq, 1),
        ]));
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_numeric_contains_operand() {
        assert_eq!(
            flat(json!({"code__contains": 4.5})),
            json!({"code": {"$regex": "4\\.5"}})
        );
    }
}
