use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::document_store::{DocumentChange, DocumentStore, DocumentStoreError};

/// In-memory document store for tests/dev.
///
/// `set_available(false)` makes every call fail with `Unavailable` until it is
/// switched back on.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    inner: RwLock<HashMap<(String, String), JsonValue>>,
    available: AtomicBool,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// All documents of a collection, ordered by id.
    pub fn collection(&self, collection: &str) -> Vec<(String, JsonValue)> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        let mut docs: Vec<_> = map
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|((_, id), body)| (id.clone(), body.clone()))
            .collect();
        docs.sort_by(|a, b| a.0.cmp(&b.0));
        docs
    }

    fn ensure_available(&self) -> Result<(), DocumentStoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DocumentStoreError::Unavailable(
                "in-memory document store switched off".to_string(),
            ))
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn load(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<JsonValue>, DocumentStoreError> {
        self.ensure_available()?;
        let map = self
            .inner
            .read()
            .map_err(|_| DocumentStoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(map.get(&(collection.to_string(), id.to_string())).cloned())
    }

    async fn commit(&self, changes: Vec<DocumentChange>) -> Result<(), DocumentStoreError> {
        self.ensure_available()?;
        let mut map = self
            .inner
            .write()
            .map_err(|_| DocumentStoreError::Unavailable("lock poisoned".to_string()))?;

        for change in changes {
            match change {
                DocumentChange::Put {
                    collection,
                    id,
                    body,
                } => {
                    map.insert((collection, id), body);
                }
                DocumentChange::Delete { collection, id } => {
                    map.remove(&(collection, id));
                }
            }
        }
        Ok(())
    }
}
