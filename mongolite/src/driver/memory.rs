use super::{Document, DocumentStream, DriverError, DriverResult, StorageDriver, UpdateOutcome};
use crate::query::FindOptions;
use crate::validation::ID_FIELD;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use regex::RegexBuilder;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// An in-process document store that evaluates the native filter and
/// update trees itself. Used by tests and the example binary.
#[derive(Default)]
pub struct MemoryDriver {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held in `collection`.
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn find_many(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
    ) -> DriverResult<DocumentStream> {
        let guard = self.collections.read().await;
        let docs = guard.get(collection).map(Vec::as_slice).unwrap_or(&[]);

        let mut matched = Vec::new();
        for doc in docs {
            if matches(doc, filter)? {
                matched.push(doc.clone());
            }
        }
        drop(guard);

        if !options.sort.is_empty() {
            matched.sort_by(|a, b| {
                for key in &options.sort {
                    let ord = compare_for_sort(get_path(a, &key.field), get_path(b, &key.field));
                    let ord = if key.direction.is_descending() { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
        let limit = options
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);

        let page: Vec<DriverResult<Document>> = matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| match &options.projection {
                Some(projection) => project(&doc, projection),
                None => Ok(doc),
            })
            .collect();

        Ok(stream::iter(page).boxed())
    }

    async fn insert_one(&self, collection: &str, document: Document) -> DriverResult<Value> {
        let mut ids = self.insert_many(collection, vec![document]).await?;
        ids.pop()
            .ok_or_else(|| DriverError::new("insert produced no identifier"))
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DriverResult<Vec<Value>> {
        let mut guard = self.collections.write().await;
        let docs = guard.entry(collection.to_string()).or_default();

        let mut prepared = Vec::with_capacity(documents.len());
        for mut doc in documents {
            let id = doc
                .entry(ID_FIELD.to_string())
                .or_insert_with(|| Value::String(uuid::Uuid::new_v4().simple().to_string()))
                .clone();
            let taken = docs.iter().chain(prepared.iter()).any(|d: &Document| d.get(ID_FIELD) == Some(&id));
            if taken {
                return Err(DriverError::new(format!(
                    "duplicate key: {collection}._id = {id}"
                )));
            }
            prepared.push(doc);
        }

        let ids = prepared
            .iter()
            .filter_map(|d| d.get(ID_FIELD).cloned())
            .collect();
        docs.extend(prepared);
        Ok(ids)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> DriverResult<UpdateOutcome> {
        self.update(collection, filter, update, false).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> DriverResult<UpdateOutcome> {
        self.update(collection, filter, update, true).await
    }

    async fn delete_many(&self, collection: &str, filter: &Document) -> DriverResult<u64> {
        let mut guard = self.collections.write().await;
        let docs = match guard.get_mut(collection) {
            Some(docs) => docs,
            None => return Ok(0),
        };

        let mut keep = Vec::with_capacity(docs.len());
        for doc in docs.iter() {
            keep.push(!matches(doc, filter)?);
        }
        let before = docs.len();
        let mut flags = keep.into_iter();
        docs.retain(|_| flags.next().unwrap_or(true));
        Ok((before - docs.len()) as u64)
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: &Document,
    ) -> DriverResult<Vec<Value>> {
        let guard = self.collections.read().await;
        let docs = guard.get(collection).map(Vec::as_slice).unwrap_or(&[]);

        let mut values: Vec<Value> = Vec::new();
        for doc in docs {
            if !matches(doc, filter)? {
                continue;
            }
            let candidates = match get_path(doc, field) {
                Some(Value::Array(items)) => items.clone(),
                Some(v) => vec![v.clone()],
                None => continue,
            };
            for candidate in candidates {
                if !values.iter().any(|v| values_equal(v, &candidate)) {
                    values.push(candidate);
                }
            }
        }
        Ok(values)
    }

    async fn count(&self, collection: &str, filter: &Document) -> DriverResult<u64> {
        let guard = self.collections.read().await;
        let docs = guard.get(collection).map(Vec::as_slice).unwrap_or(&[]);
        let mut count = 0;
        for doc in docs {
            if matches(doc, filter)? {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl MemoryDriver {
    async fn update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        many: bool,
    ) -> DriverResult<UpdateOutcome> {
        let mut guard = self.collections.write().await;
        let docs = match guard.get_mut(collection) {
            Some(docs) => docs,
            None => return Ok(UpdateOutcome::default()),
        };

        // Nothing is written unless every matched document takes the update.
        let mut outcome = UpdateOutcome::default();
        let mut staged = Vec::new();
        for (i, doc) in docs.iter().enumerate() {
            if !matches(doc, filter)? {
                continue;
            }
            outcome.matched += 1;
            let mut updated = doc.clone();
            apply_update(&mut updated, update)?;
            if updated != *doc {
                staged.push((i, updated));
            }
            if !many {
                break;
            }
        }

        outcome.modified = staged.len() as u64;
        for (i, updated) in staged {
            docs[i] = updated;
        }
        Ok(outcome)
    }
}

// ── Filter evaluation ──────────────────────────────────────────────

/// Evaluate a native filter tree against a document.
pub(crate) fn matches(doc: &Document, filter: &Document) -> DriverResult<bool> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for child in group_children(key, condition)? {
                    if !matches(doc, child)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for child in group_children(key, condition)? {
                    if matches(doc, child)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            k if k.starts_with('$') => {
                return Err(DriverError::new(format!("unsupported filter operator '{k}'")));
            }
            field => matches_field(get_path(doc, field), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn group_children<'a>(key: &str, condition: &'a Value) -> DriverResult<Vec<&'a Document>> {
    condition
        .as_array()
        .ok_or_else(|| DriverError::new(format!("'{key}' expects an array")))?
        .iter()
        .map(|c| {
            c.as_object()
                .ok_or_else(|| DriverError::new(format!("'{key}' entries must be objects")))
        })
        .collect()
}

fn matches_field(value: Option<&Value>, condition: &Value) -> DriverResult<bool> {
    let ops = match condition.as_object() {
        Some(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => ops,
        _ => return Ok(equals_with_arrays(value, condition)),
    };

    for (op, target) in ops {
        let ok = match op.as_str() {
            "$eq" => equals_with_arrays(value, target),
            "$ne" => !equals_with_arrays(value, target),
            "$gt" => compares(value, target, |o| o == Ordering::Greater),
            "$gte" => compares(value, target, |o| o != Ordering::Less),
            "$lt" => compares(value, target, |o| o == Ordering::Less),
            "$lte" => compares(value, target, |o| o != Ordering::Greater),
            "$in" => in_list(value, target)?,
            "$nin" => !in_list(value, target)?,
            "$exists" => value.is_some() == target.as_bool().unwrap_or(true),
            "$regex" => {
                let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
                regex_matches(value, target, options)?
            }
            "$options" => true,
            other => {
                return Err(DriverError::new(format!("unsupported filter operator '{other}'")))
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality where an array field matches if any element (or the whole array) equals the target.
fn equals_with_arrays(value: Option<&Value>, target: &Value) -> bool {
    match value {
        None => target.is_null(),
        Some(v) if values_equal(v, target) => true,
        Some(Value::Array(items)) => items.iter().any(|item| values_equal(item, target)),
        Some(_) => false,
    }
}

fn compares(value: Option<&Value>, target: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| compare_values(item, target).map(&accept).unwrap_or(false)),
        Some(v) => compare_values(v, target).map(&accept).unwrap_or(false),
        None => false,
    }
}

fn in_list(value: Option<&Value>, target: &Value) -> DriverResult<bool> {
    let candidates = target
        .as_array()
        .ok_or_else(|| DriverError::new("'$in'/'$nin' expects an array"))?;
    Ok(candidates.iter().any(|c| equals_with_arrays(value, c)))
}

fn regex_matches(value: Option<&Value>, pattern: &Value, options: &str) -> DriverResult<bool> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| DriverError::new("'$regex' expects a string"))?;
    let re = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .build()
        .map_err(|e| DriverError::with_source(format!("invalid regex '{pattern}'"), e))?;

    Ok(match value {
        Some(Value::String(s)) => re.is_match(s),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| item.as_str().map(|s| re.is_match(s)).unwrap_or(false)),
        _ => false,
    })
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order for sorting: missing/null, numbers, strings, objects, arrays, booleans.
fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Object(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Bool(_)) => 5,
        }
    }

    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or_else(|| rank(a).cmp(&rank(b))),
        _ => rank(a).cmp(&rank(b)),
    }
}

// ── Paths, projection and updates ─────────────────────────────────

fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_path(doc: &mut Document, path: &str, value: Value) -> DriverResult<()> {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            match child {
                Value::Object(map) => set_path(map, rest, value),
                _ => Err(DriverError::new(format!(
                    "cannot set '{path}': '{head}' is not an object"
                ))),
            }
        }
    }
}

fn remove_path(doc: &mut Document, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Value::Object(map)) => remove_path(map, rest),
            _ => None,
        },
    }
}

fn project(doc: &Document, projection: &Document) -> DriverResult<Document> {
    // `{_id: 1}` alone is an inclusion of `_id` only.
    let including = projection.iter().any(|(k, v)| k != ID_FIELD && is_truthy(v))
        || (!projection.is_empty() && projection.values().all(is_truthy));

    if including {
        let mut out = Document::new();
        let keep_id = projection.get(ID_FIELD).map(is_truthy).unwrap_or(true);
        if keep_id {
            if let Some(id) = doc.get(ID_FIELD) {
                out.insert(ID_FIELD.to_string(), id.clone());
            }
        }
        for (field, flag) in projection {
            if field == ID_FIELD || !is_truthy(flag) {
                continue;
            }
            if let Some(v) = get_path(doc, field) {
                set_path(&mut out, field, v.clone())?;
            }
        }
        Ok(out)
    } else {
        let mut out = doc.clone();
        for (field, flag) in projection {
            if !is_truthy(flag) {
                remove_path(&mut out, field);
            }
        }
        Ok(out)
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

fn apply_update(doc: &mut Document, update: &Document) -> DriverResult<()> {
    for (op, fields) in update {
        let fields = fields
            .as_object()
            .ok_or_else(|| DriverError::new(format!("'{op}' expects an object")))?;

        for (path, value) in fields {
            match op.as_str() {
                "$set" => set_path(doc, path, value.clone())?,
                "$unset" => {
                    remove_path(doc, path);
                }
                "$inc" => {
                    let current = get_path(doc, path).cloned().unwrap_or(Value::from(0));
                    set_path(doc, path, add_numbers(path, &current, value)?)?;
                }
                "$push" | "$addToSet" => {
                    let items = match value.as_object().and_then(|o| o.get("$each")) {
                        Some(Value::Array(each)) => each.clone(),
                        _ => vec![value.clone()],
                    };
                    let mut list = match get_path(doc, path) {
                        Some(Value::Array(existing)) => existing.clone(),
                        None => Vec::new(),
                        Some(_) => {
                            return Err(DriverError::new(format!(
                                "cannot apply '{op}' to non-array field '{path}'"
                            )))
                        }
                    };
                    for item in items {
                        if op == "$push" || !list.iter().any(|v| values_equal(v, &item)) {
                            list.push(item);
                        }
                    }
                    set_path(doc, path, Value::Array(list))?;
                }
                "$pull" => {
                    if let Some(Value::Array(existing)) = get_path(doc, path) {
                        let kept: Vec<Value> = existing
                            .iter()
                            .filter(|v| !values_equal(v, value))
                            .cloned()
                            .collect();
                        set_path(doc, path, Value::Array(kept))?;
                    }
                }
                other => {
                    return Err(DriverError::new(format!(
                        "unsupported update operator '{other}'"
                    )))
                }
            }
        }
    }
    Ok(())
}

fn add_numbers(path: &str, current: &Value, delta: &Value) -> DriverResult<Value> {
    match (current, delta) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                if let Some(sum) = x.checked_add(y) {
                    return Ok(Value::from(sum));
                }
            }
            let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
            Number::from_f64(sum)
                .map(Value::Number)
                .ok_or_else(|| DriverError::new(format!("'$inc' on '{path}' overflowed")))
        }
        _ => Err(DriverError::new(format!(
            "cannot apply '$inc' to non-numeric field '{path}'"
        ))),
    }
}
