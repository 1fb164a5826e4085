#[cfg(test)]
use std::collections::HashMap;
use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use super::{Document, DocumentStore};
use crate::error::StoreError;

type Key = (String, String);

#[cfg(test)]
type PendingWrite = Box<dyn FnOnce(&Value) -> Value + Send>;

/// Process-local store used for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<Key, (i64, Value)>>,
    failing: RwLock<HashSet<String>>,
    #[cfg(test)]
    interleaved: parking_lot::Mutex<HashMap<Key, PendingWrite>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `collection` fail until cleared.
    #[cfg(test)]
    pub fn fail_writes_to(&self, collection: &str) {
        self.failing.write().insert(collection.to_string());
    }

    /// Overwrite a document behind any reader's back, as a concurrent writer would.
    #[cfg(test)]
    pub fn bump_version(&self, collection: &str, id: &str, body: Value) {
        let mut docs = self.docs.write();
        let entry = docs
            .entry((collection.to_string(), id.to_string()))
            .or_insert((0, Value::Null));
        entry.0 += 1;
        entry.1 = body;
    }

    /// Run `write` as a competing writer right before the next versioned put
    /// on the document, after the caller has already read it.
    #[cfg(test)]
    pub fn interleave_before_put(
        &self,
        collection: &str,
        id: &str,
        write: impl FnOnce(&Value) -> Value + Send + 'static,
    ) {
        self.interleaved.lock().insert(key(collection, id), Box::new(write));
    }

    #[cfg(test)]
    fn run_interleaved(&self, docs: &mut BTreeMap<Key, (i64, Value)>, k: &Key) {
        if let Some(write) = self.interleaved.lock().remove(k) {
            let entry = docs.entry(k.clone()).or_insert((0, Value::Null));
            entry.0 += 1;
            entry.1 = write(&entry.1);
        }
    }

    fn check_writable(&self, collection: &str) -> Result<(), StoreError> {
        if self.failing.read().contains(collection) {
            return Err(StoreError::Injected(collection.to_string()));
        }
        Ok(())
    }
}

fn key(collection: &str, id: &str) -> Key {
    (collection.to_string(), id.to_string())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self
            .docs
            .read()
            .get(&key(collection, id))
            .map(|(version, body)| Document {
                id: id.to_string(),
                version: *version,
                body: body.clone(),
            }))
    }

    async fn set(&self, collection: &str, id: &str, body: Value) -> Result<(), StoreError> {
        self.check_writable(collection)?;
        let mut docs = self.docs.write();
        let entry = docs.entry(key(collection, id)).or_insert((0, Value::Null));
        entry.0 += 1;
        entry.1 = body;
        Ok(())
    }

    async fn put_versioned(
        &self,
        collection: &str,
        id: &str,
        body: Value,
        expected: Option<i64>,
    ) -> Result<i64, StoreError> {
        self.check_writable(collection)?;
        let mut docs = self.docs.write();
        let k = key(collection, id);
        #[cfg(test)]
        self.run_interleaved(&mut docs, &k);
        let current = docs.get(&k).map(|(version, _)| *version);

        if current != expected {
            return Err(StoreError::VersionConflict {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        let version = current.unwrap_or(0) + 1;
        docs.insert(k, (version, body));
        Ok(version)
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), StoreError> {
        self.check_writable(collection)?;
        let mut docs = self.docs.write();
        let Some((version, body)) = docs.get_mut(&key(collection, id)) else {
            return Err(StoreError::Missing {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        };

        if let (Value::Object(target), Value::Object(source)) = (body, fields) {
            target.extend(source);
        }
        *version += 1;
        Ok(())
    }

    async fn add(&self, collection: &str, body: Value) -> Result<String, StoreError> {
        self.check_writable(collection)?;
        let id = Uuid::new_v4().to_string();
        self.docs.write().insert(key(collection, &id), (1, body));
        Ok(id)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.check_writable(collection)?;
        Ok(self.docs.write().remove(&key(collection, id)).is_some())
    }

    fn query_eq<'a>(
        &'a self,
        collection: &'a str,
        field: &'a str,
        value: Value,
    ) -> BoxStream<'a, Result<Document, StoreError>> {
        let matches: Vec<Result<Document, StoreError>> = self
            .docs
            .read()
            .iter()
            .filter(|((c, _), (_, body))| c == collection && body.get(field) == Some(&value))
            .map(|((_, id), (version, body))| {
                Ok(Document {
                    id: id.clone(),
                    version: *version,
                    body: body.clone(),
                })
            })
            .collect();

        stream::iter(matches).boxed()
    }
}
