// Query builder: immutable, chainable cursor compiled only at its terminals

use crate::driver::{Document, DocumentStream};
use crate::error::{MongoliteError, Result};
use crate::filter::{compile, Filter};
use crate::hooks::{HookContext, HookDispatcher, HookEvent, HookOutcome, HookWarning};
use crate::runtime;
use crate::store::Collection;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Deref;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Prefix marking a descending sort field, as in `"-age"`.
pub const DESCENDING_MARKER: char = '-';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "asc")]
    Ascending,
    #[serde(rename = "desc")]
    Descending,
}

impl SortDirection {
    pub fn is_descending(&self) -> bool {
        matches!(self, SortDirection::Descending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        SortKey {
            field: field.into(),
            direction,
        }
    }

    /// `"age"` sorts ascending, `"-age"` descending. `"+age"` is accepted too.
    pub fn parse(spec: &str) -> Option<SortKey> {
        let spec = spec.trim();
        let (field, direction) = match spec.strip_prefix(DESCENDING_MARKER) {
            Some(rest) => (rest, SortDirection::Descending),
            None => (spec.strip_prefix('+').unwrap_or(spec), SortDirection::Ascending),
        };
        let field = field.trim();
        (!field.is_empty()).then(|| SortKey::new(field, direction))
    }
}

/// Which fields a read returns. Include and exclude are mutually exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "fields", rename_all = "snake_case")]
pub enum Projection {
    #[default]
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl Projection {
    /// The store-native projection document, `None` for `All`.
    pub fn to_native(&self) -> Option<Document> {
        let (fields, flag) = match self {
            Projection::All => return None,
            Projection::Include(fields) => (fields, 1),
            Projection::Exclude(fields) => (fields, 0),
        };
        Some(
            fields
                .iter()
                .map(|f| (f.clone(), Value::from(flag)))
                .collect(),
        )
    }
}

/// Everything besides the filter that a `find_many` call needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindOptions {
    pub sort: Vec<SortKey>,
    pub projection: Option<Document>,
    pub skip: u64,
    /// `None` means unbounded.
    pub limit: Option<u64>,
}

/// A read result together with the warnings of the hooks that ran around it.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub warnings: Vec<HookWarning>,
}

impl<T> Fetched<T> {
    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn warnings(&self) -> &[HookWarning] {
        &self.warnings
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        Fetched {
            value: f(self.value),
            warnings: self.warnings,
        }
    }
}

impl<T> Deref for Fetched<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Immutable query description. Every chain method returns a new cursor and
/// leaves `self` untouched; terminals compile and run it.
#[derive(Clone)]
pub struct Cursor<'a> {
    collection: Collection<'a>,
    filter: Filter,
    sort: Vec<SortKey>,
    projection: Projection,
    skip: u64,
    limit: u64,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(collection: Collection<'a>, filter: Filter) -> Self {
        Cursor {
            collection,
            filter,
            sort: Vec::new(),
            projection: Projection::All,
            skip: 0,
            limit: 0,
        }
    }

    // ── Chain ──────────────────────────────────────────────────────

    /// AND a keyword mapping such as `{"age__gte": 30}` onto the filter.
    pub fn filter(&self, mapping: &Value) -> Result<Cursor<'a>> {
        let extra = Filter::parse(mapping)?;
        Ok(self.and(&extra))
    }

    /// AND an already parsed filter onto this one.
    pub fn and(&self, filter: &Filter) -> Cursor<'a> {
        Cursor {
            filter: self.filter.and(filter),
            ..self.clone()
        }
    }

    /// Append sort keys. `spec` is a comma separated list like `"name,-age"`.
    /// A field sorted again moves to the end with its new direction.
    pub fn sort(&self, spec: &str) -> Cursor<'a> {
        let mut sort = self.sort.clone();
        for key in spec.split(',').filter_map(SortKey::parse) {
            sort.retain(|existing| existing.field != key.field);
            sort.push(key);
        }
        Cursor {
            sort,
            ..self.clone()
        }
    }

    /// Return only `fields` (plus `_id`). Replaces any earlier projection.
    pub fn project(&self, fields: &[&str]) -> Cursor<'a> {
        Cursor {
            projection: Projection::Include(fields.iter().map(|f| f.to_string()).collect()),
            ..self.clone()
        }
    }

    /// Return everything but `fields`. Replaces any earlier projection.
    pub fn exclude(&self, fields: &[&str]) -> Cursor<'a> {
        Cursor {
            projection: Projection::Exclude(fields.iter().map(|f| f.to_string()).collect()),
            ..self.clone()
        }
    }

    pub fn skip(&self, n: u64) -> Cursor<'a> {
        Cursor {
            skip: n,
            ..self.clone()
        }
    }

    /// `0` removes the limit.
    pub fn limit(&self, n: u64) -> Cursor<'a> {
        Cursor {
            limit: n,
            ..self.clone()
        }
    }

    pub fn sort_keys(&self) -> &[SortKey] {
        &self.sort
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// The native filter and find options this cursor would execute.
    pub fn compile(&self) -> (Document, FindOptions) {
        let filter = compile(&self.filter.to_expr());
        let options = FindOptions {
            sort: self.sort.clone(),
            projection: self.projection.to_native(),
            skip: self.skip,
            limit: (self.limit > 0).then_some(self.limit),
        };
        (filter, options)
    }

    // ── Terminals ──────────────────────────────────────────────────

    /// Every matching document.
    pub async fn to_list(&self) -> Result<Fetched<Vec<Document>>> {
        let (filter, options, mut warnings) = self.before(true, None).await?;
        let stream = self.find_many(&filter, &options).await?;
        let docs: Vec<Document> = stream.try_collect().await?;

        self.after(filter, Some(options), || HookOutcome::Documents(docs.clone()), &mut warnings)?;
        Ok(Fetched {
            value: docs,
            warnings,
        })
    }

    /// The first match, or `None` when nothing matches.
    pub async fn first(&self) -> Result<Fetched<Option<Document>>> {
        let (filter, options, mut warnings) = self.before(true, Some(1)).await?;
        let mut stream = self.find_many(&filter, &options).await?;
        let doc = stream.next().await.transpose()?;

        self.after(
            filter,
            Some(options),
            || HookOutcome::Documents(doc.iter().cloned().collect()),
            &mut warnings,
        )?;
        Ok(Fetched {
            value: doc,
            warnings,
        })
    }

    /// Number of matches. Skip, limit and projection do not apply.
    pub async fn count(&self) -> Result<Fetched<u64>> {
        let (filter, _, mut warnings) = self.before(false, None).await?;
        let count = self
            .collection
            .database()
            .driver()
            .count(self.collection.name(), &filter)
            .await?;

        self.after(filter, None, || HookOutcome::Count(count), &mut warnings)?;
        Ok(Fetched {
            value: count,
            warnings,
        })
    }

    /// Distinct values of `field` among the matches. Array values are flattened.
    pub async fn distinct(&self, field: &str) -> Result<Fetched<Vec<Value>>> {
        let (filter, _, mut warnings) = self.before(false, None).await?;
        let values = self
            .collection
            .database()
            .driver()
            .distinct(self.collection.name(), field, &filter)
            .await?;

        self.after(filter, None, || HookOutcome::Values(values.clone()), &mut warnings)?;
        Ok(Fetched {
            value: values,
            warnings,
        })
    }

    /// Lazily stream the matches. Each call runs the query again; a stream
    /// cannot be resumed once dropped. `post_query` fires when it is exhausted.
    pub async fn stream(&self) -> Result<QueryStream<'a>> {
        let (filter, options, warnings) = self.before(true, None).await?;
        let inner = self.find_many(&filter, &options).await?;
        Ok(QueryStream {
            inner,
            hooks: self.collection.database().hooks(),
            collection: self.collection.name().to_string(),
            filter: Some(filter),
            options: Some(options),
            yielded: 0,
            warnings,
            done: false,
        })
    }

    // ── Blocking twins ─────────────────────────────────────────────

    pub fn to_list_sync(&self) -> Result<Fetched<Vec<Document>>> {
        runtime::block_on(self.to_list())?
    }

    pub fn first_sync(&self) -> Result<Fetched<Option<Document>>> {
        runtime::block_on(self.first())?
    }

    pub fn count_sync(&self) -> Result<Fetched<u64>> {
        runtime::block_on(self.count())?
    }

    pub fn distinct_sync(&self, field: &str) -> Result<Fetched<Vec<Value>>> {
        runtime::block_on(self.distinct(field))?
    }

    // ── Internals ──────────────────────────────────────────────────

    /// Compile and fire `pre_query`. Returns whatever filter and options the
    /// hooks left in the context.
    async fn before(
        &self,
        with_options: bool,
        limit_override: Option<u64>,
    ) -> Result<(Document, FindOptions, Vec<HookWarning>)> {
        let (filter, mut options) = self.compile();
        if let Some(limit) = limit_override {
            options.limit = Some(limit);
        }
        log::debug!(
            "Query on '{}': filter={} options={:?}",
            self.collection.name(),
            Value::Object(filter.clone()),
            options
        );

        let mut context =
            HookContext::new(HookEvent::PreQuery, self.collection.name()).with_filter(filter);
        if with_options {
            context = context.with_options(options);
        }
        let (context, warnings) = self.collection.database().hooks().dispatch(context)?;

        Ok((
            context.filter.unwrap_or_default(),
            context.options.unwrap_or_default(),
            warnings,
        ))
    }

    /// Fire `post_query`. The outcome is only built when someone listens.
    fn after(
        &self,
        filter: Document,
        options: Option<FindOptions>,
        outcome: impl FnOnce() -> HookOutcome,
        warnings: &mut Vec<HookWarning>,
    ) -> Result<()> {
        let hooks = self.collection.database().hooks();
        if !hooks.has(HookEvent::PostQuery) {
            return Ok(());
        }
        let mut context = HookContext::new(HookEvent::PostQuery, self.collection.name())
            .with_filter(filter)
            .with_outcome(outcome());
        context.options = options;
        let (_, more) = hooks.dispatch(context)?;
        warnings.extend(more);
        Ok(())
    }

    async fn find_many(&self, filter: &Document, options: &FindOptions) -> Result<DocumentStream> {
        let stream = self
            .collection
            .database()
            .driver()
            .find_many(self.collection.name(), filter, options)
            .await?;
        Ok(stream)
    }
}

/// Lazy sequence of matching documents.
pub struct QueryStream<'a> {
    inner: DocumentStream,
    hooks: &'a HookDispatcher,
    collection: String,
    filter: Option<Document>,
    options: Option<FindOptions>,
    yielded: u64,
    warnings: Vec<HookWarning>,
    done: bool,
}

impl QueryStream<'_> {
    /// Hook warnings so far. Complete once the stream has been exhausted.
    pub fn warnings(&self) -> &[HookWarning] {
        &self.warnings
    }

    fn finish(&mut self) -> Option<MongoliteError> {
        self.done = true;
        if !self.hooks.has(HookEvent::PostQuery) {
            return None;
        }
        let mut context = HookContext::new(HookEvent::PostQuery, self.collection.as_str())
            .with_outcome(HookOutcome::Count(self.yielded));
        context.filter = self.filter.take();
        context.options = self.options.take();
        match self.hooks.dispatch(context) {
            Ok((_, warnings)) => {
                self.warnings.extend(warnings);
                None
            }
            Err(e) => Some(e),
        }
    }
}

/// A stream dropped before exhaustion still reports what it yielded.
impl Drop for QueryStream<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(e) = self.finish() {
            log::warn!("post_query hook on '{}' failed after early drop: {e}", self.collection);
        }
    }
}

impl Stream for QueryStream<'_> {
    type Item = Result<Document>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(doc))) => {
                this.yielded += 1;
                Poll::Ready(Some(Ok(doc)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e.into()))),
            Poll::Ready(None) => Poll::Ready(this.finish().map(Err)),
        }
    }
}
