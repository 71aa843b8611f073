//! Document store capability.
//!
//! Documents live at slash-separated paths alternating collection and
//! document ids (`ProductItems/abc/History/Q32024`). Backends provide plain
//! reads and writes, a single-document read-modify-write transaction and a
//! change subscription.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::utils::error::StoreError;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: String,
    pub data: Value,
}

impl Document {
    pub fn new(path: impl Into<String>, data: Value) -> Self {
        Self {
            path: path.into(),
            data,
        }
    }

    /// Last path segment.
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    Overwrite,
    /// Shallow merge of top-level fields into the existing document.
    Merge,
}

/// Body of a transaction: receives the current document body (if any) and
/// returns the body to write, or `None` to leave the document untouched.
pub type TransactionFn =
    Box<dyn FnOnce(Option<Value>) -> Result<Option<Value>, StoreError> + Send>;

/// Snapshots of one document: the current state on subscribe, then one item
/// per change. An `Err` item means the subscription is broken; the stream
/// ends after it.
pub type DocumentStream = BoxStream<'static, Result<Option<Document>, StoreError>>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError>;

    /// Direct child documents of a collection.
    async fn get_all(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    async fn set(&self, path: &str, data: Value, mode: SetMode) -> Result<(), StoreError>;

    /// Atomic read-modify-write of one document. Returns the written body.
    async fn transaction(&self, path: &str, update: TransactionFn)
        -> Result<Option<Value>, StoreError>;

    fn watch(&self, path: &str) -> DocumentStream;
}

/// Open the backend selected by `database.url`.
pub async fn connect(
    config: &DatabaseConfig,
    poll_interval: Duration,
) -> Result<Arc<dyn DocumentStore>, StoreError> {
    if config.url.starts_with("memory:") {
        tracing::warn!("Using in-memory document store; nothing will be persisted");
        return Ok(Arc::new(MemoryDocumentStore::new()));
    }
    let store = SqliteDocumentStore::connect(config, poll_interval).await?;
    Ok(Arc::new(store))
}

pub fn join_path(segments: &[&str]) -> String {
    segments.join("/")
}

/// Validates a document path and returns its parent collection path.
pub fn document_parent(path: &str) -> Result<&str, StoreError> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() < 2 || segments.len() % 2 != 0 || segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPath {
            path: path.to_string(),
        });
    }
    let split = path.len() - segments[segments.len() - 1].len() - 1;
    Ok(&path[..split])
}

pub fn validate_collection(path: &str) -> Result<(), StoreError> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() % 2 != 1 || segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPath {
            path: path.to_string(),
        });
    }
    Ok(())
}

/// Applies a write of `data` in `mode` on top of `existing`.
pub fn apply_set(existing: Option<Value>, data: Value, mode: SetMode) -> Value {
    match (mode, existing, data) {
        (SetMode::Merge, Some(Value::Object(mut current)), Value::Object(fields)) => {
            for (key, value) in fields {
                current.insert(key, value);
            }
            Value::Object(current)
        }
        (_, _, data) => data,
    }
}

pub(crate) fn field_object(field: &str, value: Value) -> Value {
    let mut fields = Map::new();
    fields.insert(field.to_string(), value);
    Value::Object(fields)
}
