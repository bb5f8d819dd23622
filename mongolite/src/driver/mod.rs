// Storage driver seam: the narrow interface the core calls into the document store

mod memory;

pub use memory::MemoryDriver;

use crate::query::FindOptions;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A stored record or a native filter/update tree.
pub type Document = serde_json::Map<String, Value>;

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Lazily produced query results.
pub type DocumentStream = BoxStream<'static, DriverResult<Document>>;

/// Failure reported by a storage driver. Never retried by the core.
#[derive(Debug)]
pub struct DriverError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        DriverError {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DriverError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Matched and modified counts of an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

/// Document store collaborator. Every call is assumed atomic on its own;
/// filters and updates arrive already compiled to the native tree.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    async fn find_many(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
    ) -> DriverResult<DocumentStream>;

    /// Insert one document, returning its identifier.
    async fn insert_one(&self, collection: &str, document: Document) -> DriverResult<Value>;

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DriverResult<Vec<Value>>;

    async fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> DriverResult<UpdateOutcome>;

    async fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> DriverResult<UpdateOutcome>;

    /// Delete every match, returning the deleted count.
    async fn delete_many(&self, collection: &str, filter: &Document) -> DriverResult<u64>;

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: &Document,
    ) -> DriverResult<Vec<Value>>;

    async fn count(&self, collection: &str, filter: &Document) -> DriverResult<u64>;
}
