use crate::config::DatabaseConfig;
use crate::driver::{Document, StorageDriver};
use crate::error::{MongoliteError, Result};
use crate::filter::{compile, Filter};
use crate::hooks::{HookContext, HookDispatcher, HookEvent, HookOutcome, HookResult, HookWarning};
use crate::query::Cursor;
use crate::response::Response;
use crate::runtime;
use crate::schema::{parse_schemas_str, Schema};
use crate::validation::{self, ValidationError, ID_FIELD};
use serde_json::Value;
use std::sync::Arc;

/// The main entry point.
/// Owns the storage driver, the schema registry and the hook dispatcher,
/// and hands out collection handles for CRUD operations.
pub struct Database {
    config: DatabaseConfig,
    driver: Arc<dyn StorageDriver>,
    schemas: Vec<Arc<Schema>>,
    hooks: HookDispatcher,
}

impl Database {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        Self::with_config(driver, DatabaseConfig::default())
    }

    pub fn with_config(driver: Arc<dyn StorageDriver>, config: DatabaseConfig) -> Self {
        log::info!(
            "Opening database '{}' (hook failures: {})",
            config.name,
            config.hook_failure
        );
        Database {
            hooks: HookDispatcher::new(config.hook_failure),
            config,
            driver,
            schemas: Vec::new(),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    // ── Schemas ────────────────────────────────────────────────────

    /// Bind a schema to its collection. Each schema name and each
    /// collection may be registered once.
    pub fn register_schema(&mut self, schema: Schema) -> Result<()> {
        if let Some(existing) = self
            .schemas
            .iter()
            .find(|s| s.name() == schema.name() || s.collection() == schema.collection())
        {
            return Err(MongoliteError::Schema(format!(
                "Schema '{}' (collection '{}') conflicts with registered schema '{}' (collection '{}')",
                schema.name(),
                schema.collection(),
                existing.name(),
                existing.collection()
            )));
        }

        log::debug!(
            "Registered schema '{}' on collection '{}'",
            schema.name(),
            schema.collection()
        );
        self.schemas.push(Arc::new(schema));
        Ok(())
    }

    /// Register every schema declared in a YAML document. Returns how many.
    pub fn register_schemas_yaml(&mut self, yaml: &str) -> Result<usize> {
        let schemas = parse_schemas_str(yaml)?;
        let count = schemas.len();
        for schema in schemas {
            self.register_schema(schema)?;
        }
        Ok(count)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.iter().map(|s| s.as_ref())
    }

    /// Handle to a registered collection, looked up by schema name or
    /// collection name.
    pub fn collection(&self, name: &str) -> Result<Collection<'_>> {
        let schema = self
            .schemas
            .iter()
            .find(|s| s.name() == name || s.collection() == name)
            .ok_or_else(|| MongoliteError::UnknownCollection(name.to_string()))?;

        Ok(Collection {
            db: self,
            schema: Arc::clone(schema),
        })
    }

    // ── Hooks ──────────────────────────────────────────────────────

    /// Append a callback for `event`. Hooks apply to every collection and
    /// cannot be removed.
    pub fn register_hook<F>(&mut self, event: HookEvent, callback: F)
    where
        F: Fn(&mut HookContext) -> HookResult + Send + Sync + 'static,
    {
        self.hooks.register(event, callback);
    }

    /// Like `register_hook`, with the event given by name (`"pre_query"`).
    pub fn on<F>(&mut self, event: &str, callback: F) -> Result<()>
    where
        F: Fn(&mut HookContext) -> HookResult + Send + Sync + 'static,
    {
        let event = event.parse::<HookEvent>()?;
        self.register_hook(event, callback);
        Ok(())
    }

    pub(crate) fn hooks(&self) -> &HookDispatcher {
        &self.hooks
    }

    pub(crate) fn driver(&self) -> &dyn StorageDriver {
        self.driver.as_ref()
    }
}

// ── Collections ────────────────────────────────────────────────

/// A handle to a collection within a database.
/// Every operation has an async core and a blocking `_sync` twin that
/// produces the same result.
#[derive(Clone)]
pub struct Collection<'a> {
    db: &'a Database,
    schema: Arc<Schema>,
}

impl<'a> Collection<'a> {
    pub fn name(&self) -> &str {
        self.schema.collection()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn database(&self) -> &'a Database {
        self.db
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn find(&self, filter: Filter) -> Cursor<'a> {
        Cursor::new(self.clone(), filter)
    }

    pub fn find_all(&self) -> Cursor<'a> {
        self.find(Filter::all())
    }

    /// Find with a keyword mapping, e.g. `{"age__gte": 30}`.
    pub fn find_where(&self, mapping: &Value) -> Result<Cursor<'a>> {
        Ok(self.find(Filter::parse(mapping)?))
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Validate and insert one record.
    pub async fn insert(&self, record: Value) -> Result<Response> {
        let document = match validation::validate(&self.schema, &record) {
            Ok(doc) => doc,
            Err(e) => return Ok(Response::validation_failed(e)),
        };

        let context =
            HookContext::new(HookEvent::PreInsert, self.name()).with_payload(Value::Object(document));
        let (context, mut warnings) = match self.db.hooks.dispatch(context) {
            Ok(dispatched) => dispatched,
            Err(e) => return hook_failure(e),
        };
        let document = match context.payload {
            Some(Value::Object(doc)) => doc,
            _ => return Ok(payload_lost(HookEvent::PreInsert).with_warnings(warnings)),
        };

        let response = match self.db.driver.insert_one(self.name(), document).await {
            Ok(id) => Response::inserted(vec![id]),
            Err(e) => {
                log::warn!("Insert into '{}' failed: {}", self.name(), e);
                Response::storage_failed(&e)
            }
        };

        self.finish(HookEvent::PostInsert, None, None, response, &mut warnings)
    }

    /// Validate and insert a batch. If any record is invalid nothing is
    /// written and every invalid record is reported.
    pub async fn insert_many(&self, records: &[Value]) -> Result<Response> {
        let documents = match validation::validate_many(&self.schema, records) {
            Ok(docs) => docs,
            Err(e) => return Ok(Response::batch_validation_failed(e)),
        };

        let payload = Value::Array(documents.into_iter().map(Value::Object).collect());
        let context = HookContext::new(HookEvent::PreInsert, self.name()).with_payload(payload);
        let (context, mut warnings) = match self.db.hooks.dispatch(context) {
            Ok(dispatched) => dispatched,
            Err(e) => return hook_failure(e),
        };
        let documents: Vec<Document> = match context.payload {
            Some(Value::Array(items)) if items.iter().all(Value::is_object) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(doc) => Some(doc),
                    _ => None,
                })
                .collect(),
            _ => return Ok(payload_lost(HookEvent::PreInsert).with_warnings(warnings)),
        };

        let response = if documents.is_empty() {
            Response::inserted(Vec::new())
        } else {
            match self.db.driver.insert_many(self.name(), documents).await {
                Ok(ids) => Response::inserted(ids),
                Err(e) => {
                    log::warn!("Batch insert into '{}' failed: {}", self.name(), e);
                    Response::storage_failed(&e)
                }
            }
        };

        self.finish(HookEvent::PostInsert, None, None, response, &mut warnings)
    }

    /// Update every match. `update` is either an operator document
    /// (`{"$set": {...}, "$inc": {...}}`) or plain fields, which mean `$set`.
    pub async fn update(&self, filter: &Filter, update: &Value) -> Result<Response> {
        self.update_matching(filter, update, true).await
    }

    /// Update the first match only.
    pub async fn update_one(&self, filter: &Filter, update: &Value) -> Result<Response> {
        self.update_matching(filter, update, false).await
    }

    /// Delete every match.
    pub async fn delete(&self, filter: &Filter) -> Result<Response> {
        let native = compile(&filter.to_expr());
        let context = HookContext::new(HookEvent::PreDelete, self.name()).with_filter(native);
        let (context, mut warnings) = match self.db.hooks.dispatch(context) {
            Ok(dispatched) => dispatched,
            Err(e) => return hook_failure(e),
        };
        let native = match context.filter {
            Some(native) => native,
            None => return Ok(filter_lost(HookEvent::PreDelete).with_warnings(warnings)),
        };

        let response = match self.db.driver.delete_many(self.name(), &native).await {
            Ok(deleted) => Response::deleted(deleted),
            Err(e) => {
                log::warn!("Delete from '{}' failed: {}", self.name(), e);
                Response::storage_failed(&e)
            }
        };

        self.finish(HookEvent::PostDelete, Some(native), None, response, &mut warnings)
    }

    // ── Blocking twins ─────────────────────────────────────────────

    pub fn insert_sync(&self, record: Value) -> Result<Response> {
        runtime::block_on(self.insert(record))?
    }

    pub fn insert_many_sync(&self, records: &[Value]) -> Result<Response> {
        runtime::block_on(self.insert_many(records))?
    }

    pub fn update_sync(&self, filter: &Filter, update: &Value) -> Result<Response> {
        runtime::block_on(self.update(filter, update))?
    }

    pub fn update_one_sync(&self, filter: &Filter, update: &Value) -> Result<Response> {
        runtime::block_on(self.update_one(filter, update))?
    }

    pub fn delete_sync(&self, filter: &Filter) -> Result<Response> {
        runtime::block_on(self.delete(filter))?
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn update_matching(&self, filter: &Filter, update: &Value, many: bool) -> Result<Response> {
        let mut update = normalize_update(update)?;

        if self.db.config.validate_updates {
            update = match validation::validate_update(&self.schema, &update) {
                Ok(normalized) => normalized,
                Err(e) => return Ok(Response::validation_failed(e)),
            };
        }

        let native = compile(&filter.to_expr());
        let context = HookContext::new(HookEvent::PreUpdate, self.name())
            .with_filter(native)
            .with_payload(Value::Object(update));
        let (context, mut warnings) = match self.db.hooks.dispatch(context) {
            Ok(dispatched) => dispatched,
            Err(e) => return hook_failure(e),
        };
        let native = match context.filter {
            Some(native) => native,
            None => return Ok(filter_lost(HookEvent::PreUpdate).with_warnings(warnings)),
        };
        let update = match context.payload {
            Some(Value::Object(update)) => update,
            _ => return Ok(payload_lost(HookEvent::PreUpdate).with_warnings(warnings)),
        };

        let mut target = native.clone();
        if self.db.config.validate_updates {
            match self.guard_increments(&native, &update).await {
                Ok(Some(guarded)) => target = guarded,
                Ok(None) => {}
                Err(response) => return Ok(response.with_warnings(warnings)),
            }
        }

        let driver = &self.db.driver;
        let result = if many {
            driver.update_many(self.name(), &target, &update).await
        } else {
            driver.update_one(self.name(), &target, &update).await
        };
        let response = match result {
            Ok(outcome) => Response::updated(outcome),
            Err(e) => {
                log::warn!("Update on '{}' failed: {}", self.name(), e);
                Response::storage_failed(&e)
            }
        };

        self.finish(
            HookEvent::PostUpdate,
            Some(native),
            Some(Value::Object(update)),
            response,
            &mut warnings,
        )
    }

    /// Reject an `$inc` that would move any matched document out of its
    /// field's range. Otherwise return the filter narrowed to documents the
    /// increment keeps in range, or `None` when no field has a range.
    async fn guard_increments(
        &self,
        native: &Document,
        update: &Document,
    ) -> std::result::Result<Option<Document>, Response> {
        let guards = validation::increment_guards(&self.schema, update);
        if guards.is_empty() {
            return Ok(None);
        }

        let mut issues = Vec::new();
        for guard in &guards {
            let out_of_range = all_of(vec![native.clone(), guard.violations()]);
            match self.db.driver.count(self.name(), &out_of_range).await {
                Ok(0) => {}
                Ok(_) => issues.push(guard.issue()),
                Err(e) => {
                    log::warn!("Range check on '{}' failed: {}", self.name(), e);
                    return Err(Response::storage_failed(&e));
                }
            }
        }
        if !issues.is_empty() {
            return Err(Response::validation_failed(ValidationError { issues }));
        }

        let mut clauses = vec![native.clone()];
        clauses.extend(guards.iter().map(|g| g.within()));
        Ok(Some(all_of(clauses)))
    }

    /// Fire a `post_*` hook with the response and attach all warnings.
    fn finish(
        &self,
        event: HookEvent,
        filter: Option<Document>,
        payload: Option<Value>,
        response: Response,
        warnings: &mut Vec<HookWarning>,
    ) -> Result<Response> {
        if self.db.hooks.has(event) {
            let mut context =
                HookContext::new(event, self.name()).with_outcome(HookOutcome::Response(response.clone()));
            context.filter = filter;
            context.payload = payload;
            match self.db.hooks.dispatch(context) {
                Ok((_, more)) => warnings.extend(more),
                Err(e) => return hook_failure(e).map(|r| r.with_warnings(std::mem::take(warnings))),
            }
        }
        Ok(response.with_warnings(std::mem::take(warnings)))
    }
}

/// Plain field maps become `$set`. Mixing operators and plain fields is a
/// caller error.
fn normalize_update(update: &Value) -> Result<Document> {
    let fields = update
        .as_object()
        .ok_or_else(|| MongoliteError::MalformedFilter("update must be an object".into()))?;
    if fields.is_empty() {
        return Err(MongoliteError::MalformedFilter("update cannot be empty".into()));
    }

    let operators = fields.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 {
        if fields.contains_key(ID_FIELD) {
            return Err(MongoliteError::MalformedFilter(format!(
                "update cannot change '{ID_FIELD}'"
            )));
        }
        let mut wrapped = Document::new();
        wrapped.insert("$set".to_string(), update.clone());
        return Ok(wrapped);
    }
    if operators != fields.len() {
        return Err(MongoliteError::MalformedFilter(
            "update mixes '$' operators with plain fields".into(),
        ));
    }

    for (op, body) in fields {
        if !body.is_object() {
            return Err(MongoliteError::MalformedFilter(format!(
                "update operator '{op}' expects an object"
            )));
        }
    }
    Ok(fields.clone())
}

fn hook_failure(err: MongoliteError) -> Result<Response> {
    match err {
        MongoliteError::Hook { event, message } => Ok(Response::hook_failed(event, &message)),
        other => Err(other),
    }
}

fn payload_lost(event: HookEvent) -> Response {
    Response::hook_failed(event, "hook left the payload in an unusable shape")
}

/// A cleared filter would match every document, so the write is refused.
fn filter_lost(event: HookEvent) -> Response {
    Response::hook_failed(event, "hook removed the filter")
}

fn all_of(clauses: Vec<Document>) -> Document {
    let mut doc = Document::new();
    doc.insert(
        "$and".to_string(),
        Value::Array(clauses.into_iter().map(Value::Object).collect()),
    );
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HookFailurePolicy;
    use crate::driver::MemoryDriver;
    use crate::response::{ErrorKind, ResponseData};
    use crate::schema::{FieldKind, FieldType, FieldTypes};
    use crate::validation::IssueKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn user_schema() -> Schema {
        Schema::builder("User")
            .collection("users")
            .required("name", FieldTypes::name())
            .required("email", FieldTypes::email())
            .required("age", FieldTypes::age())
            .optional("hobbies", FieldType::list(FieldType::string()))
            .with_default("active", FieldType::boolean(), json!(true))
            .build()
            .unwrap()
    }

    fn database_with(config: DatabaseConfig) -> Database {
        let mut db = Database::with_config(Arc::new(MemoryDriver::new()), config);
        db.register_schema(user_schema()).unwrap();
        db
    }

    fn database() -> Database {
        database_with(DatabaseConfig::default())
    }

    fn user(id: i64, name: &str, age: i64) -> Value {
        json!({
            "_id": id,
            "name": name,
            "email": format!("{}@example.com", name.to_lowercase()),
            "age": age
        })
    }

    fn four_users() -> Vec<Value> {
        vec![
            user(1, "Alice", 28),
            user(2, "Bob", 35),
            user(3, "Carol", 42),
            user(4, "Dave", 29),
        ]
    }

    #[test]
    fn test_register_schema_rejects_duplicates() {
        let mut db = database();
        let err = db.register_schema(user_schema()).unwrap_err();
        assert!(matches!(err, MongoliteError::Schema(_)));

        let clash = Schema::builder("Person")
            .collection("users")
            .required("name", FieldType::string())
            .build()
            .unwrap();
        assert!(db.register_schema(clash).is_err());
    }

    #[test]
    fn test_collection_lookup() {
        let db = database();
        assert_eq!(db.collection("User").unwrap().name(), "users");
        assert_eq!(db.collection("users").unwrap().schema().name(), "User");
        assert!(matches!(
            db.collection("orders"),
            Err(MongoliteError::UnknownCollection(_))
        ));
    }

    #[test]
    fn test_register_schemas_yaml() {
        let mut db = Database::new(Arc::new(MemoryDriver::new()));
        let count = db
            .register_schemas_yaml(
                r#"
schemas:
  - name: Product
    collection: products
    fields:
      - name: title
        type: title
        required: true
      - name: price
        type: price
"#,
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(db.collection("products").unwrap().schema().name(), "Product");
    }

    #[test]
    fn test_unknown_hook_event() {
        let mut db = database();
        let err = db.on("pre_select", |_ctx: &mut HookContext| Ok(())).unwrap_err();
        assert!(matches!(err, MongoliteError::UnknownHookEvent(_)));
    }

    #[tokio::test]
    async fn test_invalid_insert_lists_every_violation() {
        let db = database();
        let users = db.collection("users").unwrap();
        let response = users
            .insert(json!({"name": "", "email": "not-an-email", "age": -5}))
            .await
            .unwrap();

        assert!(!response.is_success());
        let error = response.error().unwrap();
        assert_eq!(error.kind, ErrorKind::Validation);
        let mut fields: Vec<&str> = error.issues.iter().map(|i| i.field.as_str()).collect();
        fields.sort();
        assert_eq!(fields, vec!["age", "email", "name"]);
        assert_eq!(*users.find_all().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_valid_insert() {
        let db = database();
        let users = db.collection("users").unwrap();
        let response = users
            .insert(json!({"name": "Alice", "email": "alice@example.com", "age": 28}))
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.count(), 1);
        assert_eq!(response.ids().len(), 1);

        let stored = users.find_all().first().await.unwrap().into_inner().unwrap();
        assert_eq!(stored.get("active"), Some(&json!(true)));
        assert_eq!(stored.get("hobbies"), None);
    }

    #[tokio::test]
    async fn test_find_by_age() {
        let db = database();
        let users = db.collection("users").unwrap();
        users.insert_many(&four_users()).await.unwrap();

        let docs = users
            .find(Filter::field("age__gte", 30).unwrap())
            .sort("age")
            .to_list()
            .await
            .unwrap();
        let ages: Vec<&Value> = docs.iter().filter_map(|d| d.get("age")).collect();
        assert_eq!(ages, vec![&json!(35), &json!(42)]);
    }

    #[tokio::test]
    async fn test_batch_insert_is_all_or_nothing() {
        let db = database();
        let users = db.collection("users").unwrap();
        let mut records = four_users();
        records[1]["age"] = json!(200);
        records[3]["email"] = json!("nope");

        let response = users.insert_many(&records).await.unwrap();
        assert!(!response.is_success());
        let indexes: Vec<usize> = response
            .error()
            .unwrap()
            .records
            .iter()
            .map(|r| r.index)
            .collect();
        assert_eq!(indexes, vec![1, 3]);
        assert_eq!(*users.find_all().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failing_pre_query_hook_is_a_warning() {
        let mut db = database();
        db.on("pre_query", |_ctx: &mut HookContext| Err("metrics backend unreachable".into()))
            .unwrap();
        let users = db.collection("users").unwrap();
        users.insert_many(&four_users()).await.unwrap();

        let docs = users.find_all().to_list().await.unwrap();
        assert_eq!(docs.len(), 4);
        assert_eq!(docs.warnings().len(), 1);
        assert_eq!(docs.warnings()[0].event, HookEvent::PreQuery);
        assert_eq!(docs.warnings()[0].message, "metrics backend unreachable");
    }

    #[tokio::test]
    async fn test_abort_policy_fails_reads_and_writes() {
        let mut db = database_with(DatabaseConfig {
            hook_failure: HookFailurePolicy::Abort,
            ..DatabaseConfig::default()
        });
        db.on("pre_query", |_ctx: &mut HookContext| Err("denied".into())).unwrap();
        db.on("pre_insert", |_ctx: &mut HookContext| Err("denied".into())).unwrap();
        let users = db.collection("users").unwrap();

        let response = users.insert(user(1, "Alice", 28)).await.unwrap();
        assert!(!response.is_success());
        assert_eq!(response.error().unwrap().kind, ErrorKind::Hook);

        let err = users.find_all().to_list().await.unwrap_err();
        assert!(matches!(err, MongoliteError::Hook { event: HookEvent::PreQuery, .. }));
    }

    #[tokio::test]
    async fn test_post_hooks_see_response() {
        let mut db = database();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            db.register_hook(HookEvent::PostInsert, move |ctx: &mut HookContext| {
                if let Some(HookOutcome::Response(response)) = &ctx.outcome {
                    seen.lock().unwrap().push(response.count());
                }
                Ok(())
            });
        }
        let users = db.collection("users").unwrap();
        users.insert(user(1, "Alice", 28)).await.unwrap();
        users.insert_many(&four_users()[1..]).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_pre_insert_hook_can_enrich() {
        let mut db = database();
        db.on("pre_insert", |ctx: &mut HookContext| {
            if let Some(Value::Object(doc)) = ctx.payload.as_mut() {
                doc.insert("hobbies".into(), json!(["auditing"]));
            }
            Ok(())
        })
        .unwrap();
        let users = db.collection("users").unwrap();
        users.insert(user(1, "Alice", 28)).await.unwrap();
        let found = users.find_where(&json!({"hobbies": "auditing"})).unwrap().count().await.unwrap();
        assert_eq!(*found, 1);
    }

    #[tokio::test]
    async fn test_update_counts_and_plain_set() {
        let db = database();
        let users = db.collection("users").unwrap();
        users.insert_many(&four_users()).await.unwrap();

        let filter = Filter::field("age__lt", 30).unwrap();
        let response = users.update(&filter, &json!({"active": false})).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.count(), 2);
        assert_eq!(
            response.data(),
            &ResponseData::Updated {
                matched: 2,
                modified: 2
            }
        );

        let response = users
            .update_one(&Filter::all(), &json!({"$inc": {"age": 1}}))
            .await
            .unwrap();
        assert_eq!(response.count(), 1);

        let inactive = users.find_where(&json!({"active": false})).unwrap().count().await.unwrap();
        assert_eq!(*inactive, 2);
    }

    #[tokio::test]
    async fn test_update_validation() {
        let db = database();
        let users = db.collection("users").unwrap();
        users.insert_many(&four_users()).await.unwrap();

        let response = users
            .update(&Filter::all(), &json!({"$set": {"age": 500}}))
            .await
            .unwrap();
        assert!(!response.is_success());
        let issue = &response.error().unwrap().issues[0];
        assert_eq!(issue.field, "age");
        assert!(matches!(issue.kind, IssueKind::MaxValue { .. }));

        let response = users
            .update(&Filter::all(), &json!({"$set": {"age": "31"}}))
            .await
            .unwrap();
        assert!(response.is_success());
        let ages = users.find_all().distinct("age").await.unwrap();
        assert_eq!(*ages, vec![json!(31)]);
    }

    #[tokio::test]
    async fn test_update_operators_are_validated() {
        let db = database();
        let users = db.collection("users").unwrap();
        users.insert_many(&four_users()).await.unwrap();

        let response = users
            .update(&Filter::all(), &json!({"$inc": {"age": 500}}))
            .await
            .unwrap();
        assert!(!response.is_success());
        let issue = &response.error().unwrap().issues[0];
        assert_eq!(issue.field, "age");
        assert!(matches!(issue.kind, IssueKind::MaxValue { .. }));
        let ages = users.find_all().distinct("age").await.unwrap();
        assert_eq!(*ages, vec![json!(28), json!(35), json!(42), json!(29)]);

        let response = users
            .update(&Filter::field("name", "Bob").unwrap(), &json!({"$unset": {"name": ""}}))
            .await
            .unwrap();
        assert!(!response.is_success());
        assert_eq!(response.error().unwrap().issues[0].kind, IssueKind::MissingField);
        let named = users.find_where(&json!({"name": "Bob"})).unwrap().count().await.unwrap();
        assert_eq!(*named, 1);

        let response = users
            .update(&Filter::all(), &json!({"$push": {"email": "second@example.com"}}))
            .await
            .unwrap();
        assert!(!response.is_success());
        assert!(matches!(
            response.error().unwrap().issues[0].kind,
            IssueKind::TypeMismatch { expected: FieldKind::List, .. }
        ));

        let response = users
            .update(&Filter::field("age__gte", 40).unwrap(), &json!({"$inc": {"age": 100}}))
            .await
            .unwrap();
        assert!(response.is_success(), "{}", response.message());
        assert_eq!(response.count(), 1);
        let carol = users.find_where(&json!({"name": "Carol"})).unwrap().first().await.unwrap();
        assert_eq!(carol.into_inner().unwrap()["age"], json!(142));
    }

    #[tokio::test]
    async fn test_pre_write_hook_clearing_filter_is_refused() {
        let mut db = database();
        db.on("pre_delete", |ctx: &mut HookContext| {
            ctx.filter = None;
            Ok(())
        })
        .unwrap();
        db.on("pre_update", |ctx: &mut HookContext| {
            ctx.filter = None;
            Ok(())
        })
        .unwrap();
        let users = db.collection("users").unwrap();
        users.insert_many(&four_users()).await.unwrap();

        let response = users.delete(&Filter::field("name", "Alice").unwrap()).await.unwrap();
        assert!(!response.is_success());
        assert_eq!(response.error().unwrap().kind, ErrorKind::Hook);
        assert_eq!(*users.find_all().count().await.unwrap(), 4);

        let response = users
            .update(&Filter::field("name", "Alice").unwrap(), &json!({"active": false}))
            .await
            .unwrap();
        assert!(!response.is_success());
        assert_eq!(response.error().unwrap().kind, ErrorKind::Hook);
        let inactive = users.find_where(&json!({"active": false})).unwrap().count().await.unwrap();
        assert_eq!(*inactive, 0);
    }

    #[tokio::test]
    async fn test_failing_write_hooks_are_warnings() {
        let mut db = database();
        db.on("post_insert", |_ctx: &mut HookContext| Err("audit log full".into()))
            .unwrap();
        db.on("pre_delete", |_ctx: &mut HookContext| Err("audit log full".into()))
            .unwrap();
        db.on("post_update", |_ctx: &mut HookContext| Err("audit log full".into()))
            .unwrap();
        let users = db.collection("users").unwrap();

        let response = users.insert(user(1, "Alice", 28)).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.count(), 1);
        assert_eq!(response.warnings().len(), 1);
        assert_eq!(response.warnings()[0].event, HookEvent::PostInsert);
        assert_eq!(response.warnings()[0].message, "audit log full");

        let response = users
            .update(&Filter::all(), &json!({"$inc": {"age": 1}}))
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.count(), 1);
        assert_eq!(response.warnings()[0].event, HookEvent::PostUpdate);

        let response = users.delete(&Filter::all()).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.count(), 1);
        assert_eq!(response.warnings().len(), 1);
        assert_eq!(response.warnings()[0].event, HookEvent::PreDelete);
        assert_eq!(*users.find_all().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_update_is_an_error() {
        let db = database();
        let users = db.collection("users").unwrap();
        let err = users
            .update(&Filter::all(), &json!({"$set": {"age": 3}, "name": "x"}))
            .await
            .unwrap_err();
        assert!(err.is_filter_error());
    }

    #[tokio::test]
    async fn test_delete_counts() {
        let db = database();
        let users = db.collection("users").unwrap();
        users.insert_many(&four_users()).await.unwrap();

        let response = users
            .delete(&Filter::parse(&json!({"$or": [{"name": "Alice"}, {"age__gt": 40}]})).unwrap())
            .await
            .unwrap();
        assert_eq!(response.count(), 2);
        assert_eq!(response.data(), &ResponseData::Deleted { deleted: 2 });

        let response = users.delete(&Filter::field("name", "Nobody").unwrap()).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.count(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_becomes_envelope() {
        let db = database();
        let users = db.collection("users").unwrap();
        users.insert(user(1, "Alice", 28)).await.unwrap();
        let response = users.insert(user(1, "Alice", 28)).await.unwrap();
        assert!(!response.is_success());
        assert_eq!(response.error().unwrap().kind, ErrorKind::Storage);
    }

    #[tokio::test]
    async fn test_round_trip_reinsert() {
        let source = database();
        let target = database();
        let from = source.collection("users").unwrap();
        let to = target.collection("users").unwrap();
        from.insert_many(&four_users()).await.unwrap();

        let filter = Filter::field("age__gte", 29).unwrap();
        let exported: Vec<Value> = from
            .find(filter.clone())
            .to_list()
            .await
            .unwrap()
            .into_inner()
            .into_iter()
            .map(Value::Object)
            .collect();

        let response = to.insert_many(&exported).await.unwrap();
        assert!(response.is_success(), "{}", response.message());
        assert_eq!(response.count(), exported.len() as u64);
        assert_eq!(*to.find(filter).count().await.unwrap(), exported.len() as u64);
    }

    #[test]
    fn test_sync_matches_async() {
        let sync_db = database();
        let async_db = database();
        let sync_users = sync_db.collection("users").unwrap();
        let async_users = async_db.collection("users").unwrap();

        let record = user(7, "Grace", 51);
        let filter = Filter::field("name", "Grace").unwrap();
        let update = json!({"$set": {"age": 52}});

        let sync_responses = vec![
            sync_users.insert_sync(record.clone()).unwrap(),
            sync_users.insert_many_sync(&four_users()).unwrap(),
            sync_users.update_sync(&filter, &update).unwrap(),
            sync_users.update_one_sync(&filter, &update).unwrap(),
            sync_users.delete_sync(&filter).unwrap(),
        ];

        let async_responses = runtime::block_on(async {
            vec![
                async_users.insert(record.clone()).await.unwrap(),
                async_users.insert_many(&four_users()).await.unwrap(),
                async_users.update(&filter, &update).await.unwrap(),
                async_users.update_one(&filter, &update).await.unwrap(),
                async_users.delete(&filter).await.unwrap(),
            ]
        })
        .unwrap();

        assert_eq!(sync_responses, async_responses);
    }

    #[tokio::test]
    async fn test_sync_call_inside_runtime() {
        let db = database();
        let users = db.collection("users").unwrap();
        let response = users.insert_sync(user(1, "Alice", 28)).unwrap();
        assert!(response.is_success());
        assert_eq!(*users.find_all().count().await.unwrap(), 1);
    }
}
