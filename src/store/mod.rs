//! Document store abstraction.
//!
//! Collections hold JSON documents addressed by id. Every document carries a
//! version that grows by one on each write, which is what `put_versioned` and
//! [`modify`] use for optimistic concurrency.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub version: i64,
    pub body: Value,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Unconditional upsert.
    async fn set(&self, collection: &str, id: &str, body: Value) -> Result<(), StoreError>;

    /// Write only if the stored version equals `expected`; `None` means the
    /// document must not exist yet.
    async fn put_versioned(
        &self,
        collection: &str,
        id: &str,
        body: Value,
        expected: Option<i64>,
    ) -> Result<i64, StoreError>;

    /// Shallow merge of top-level fields into an existing document.
    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), StoreError>;

    async fn add(&self, collection: &str, body: Value) -> Result<String, StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    fn query_eq<'a>(
        &'a self,
        collection: &'a str,
        field: &'a str,
        value: Value,
    ) -> BoxStream<'a, Result<Document, StoreError>>;
}

pub async fn get_as<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(collection, id).await? {
        Some(doc) => Ok(Some(doc.decode()?)),
        None => Ok(None),
    }
}

pub async fn collect_eq<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    field: &str,
    value: &str,
) -> Result<Vec<(String, T)>, StoreError> {
    store
        .query_eq(collection, field, Value::String(value.to_string()))
        .and_then(|doc| async move {
            let decoded = doc.decode::<T>()?;
            Ok::<_, StoreError>((doc.id, decoded))
        })
        .try_collect()
        .await
}

/// Optimistic read-modify-write of one typed document.
///
/// `apply` receives the current value (or `None`) and returns the value to
/// store. On a version conflict the document is re-read and `apply` runs
/// again, up to `attempts` times in total.
pub async fn modify<T, F>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
    attempts: u32,
    mut apply: F,
) -> Result<T, StoreError>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(Option<T>) -> T,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let current = store.get(collection, id).await?;
        let (expected, existing) = match current {
            Some(doc) => (Some(doc.version), Some(doc.decode::<T>()?)),
            None => (None, None),
        };

        let next = apply(existing);
        let body = serde_json::to_value(&next)?;

        match store.put_versioned(collection, id, body, expected).await {
            Ok(_) => return Ok(next),
            Err(StoreError::VersionConflict { .. }) if attempt < attempts => {
                debug!(collection, id, attempt, "version conflict, retrying");
            }
            Err(err) => return Err(err),
        }
    }
}
