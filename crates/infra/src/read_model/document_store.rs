use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

/// A read-model document: a JSON body stored under `(COLLECTION, id)`.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection (table-like namespace) the document lives in.
    const COLLECTION: &'static str;

    fn document_id(&self) -> String;
}

/// One write of a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentChange {
    Put {
        collection: String,
        id: String,
        body: JsonValue,
    },
    Delete {
        collection: String,
        id: String,
    },
}

#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),

    #[error("document '{collection}/{id}' could not be (de)serialized: {message}")]
    Serialization {
        collection: String,
        id: String,
        message: String,
    },
}

/// Keyed JSON document storage.
///
/// `commit` applies a whole batch of changes atomically. Callers normally go
/// through a [`DocumentSession`] instead of using these methods directly.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load(&self, collection: &str, id: &str)
    -> Result<Option<JsonValue>, DocumentStoreError>;

    async fn commit(&self, changes: Vec<DocumentChange>) -> Result<(), DocumentStoreError>;
}

#[async_trait]
impl<S> DocumentStore for Arc<S>
where
    S: DocumentStore + ?Sized,
{
    async fn load(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<JsonValue>, DocumentStoreError> {
        (**self).load(collection, id).await
    }

    async fn commit(&self, changes: Vec<DocumentChange>) -> Result<(), DocumentStoreError> {
        (**self).commit(changes).await
    }
}

#[derive(Debug, Clone)]
enum Pending {
    Put(JsonValue),
    Delete,
}

/// Unit of work over a [`DocumentStore`].
///
/// Writes are buffered and only reach the store on [`save_changes`]. Loads see
/// the session's own buffered writes. Dropping a session without saving
/// discards everything it buffered.
///
/// [`save_changes`]: DocumentSession::save_changes
pub struct DocumentSession<'a> {
    store: &'a dyn DocumentStore,
    pending: BTreeMap<(&'static str, String), Pending>,
}

impl<'a> DocumentSession<'a> {
    pub fn open(store: &'a dyn DocumentStore) -> Self {
        Self {
            store,
            pending: BTreeMap::new(),
        }
    }

    pub async fn load<T: Document>(&mut self, id: &str) -> Result<Option<T>, DocumentStoreError> {
        let body = match self.pending.get(&(T::COLLECTION, id.to_string())) {
            Some(Pending::Put(body)) => Some(body.clone()),
            Some(Pending::Delete) => None,
            None => self.store.load(T::COLLECTION, id).await?,
        };

        body.map(|body| {
            serde_json::from_value(body).map_err(|e| DocumentStoreError::Serialization {
                collection: T::COLLECTION.to_string(),
                id: id.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
    }

    /// Insert or overwrite `document`.
    pub fn store<T: Document>(&mut self, document: &T) -> Result<(), DocumentStoreError> {
        let id = document.document_id();
        let body = serde_json::to_value(document).map_err(|e| DocumentStoreError::Serialization {
            collection: T::COLLECTION.to_string(),
            id: id.clone(),
            message: e.to_string(),
        })?;
        self.pending.insert((T::COLLECTION, id), Pending::Put(body));
        Ok(())
    }

    /// Delete the document if it exists.
    pub fn delete<T: Document>(&mut self, id: &str) {
        self.pending
            .insert((T::COLLECTION, id.to_string()), Pending::Delete);
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Commit every buffered write in one batch.
    pub async fn save_changes(mut self) -> Result<(), DocumentStoreError> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }

        let changes = pending
            .into_iter()
            .map(|((collection, id), change)| match change {
                Pending::Put(body) => DocumentChange::Put {
                    collection: collection.to_string(),
                    id,
                    body,
                },
                Pending::Delete => DocumentChange::Delete {
                    collection: collection.to_string(),
                    id,
                },
            })
            .collect();

        self.store.commit(changes).await
    }
}

impl Drop for DocumentSession<'_> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            debug!(
                discarded = self.pending.len(),
                "document session dropped without saving"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryDocumentStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        text: String,
    }

    impl Document for Note {
        const COLLECTION: &'static str = "notes";

        fn document_id(&self) -> String {
            self.id.clone()
        }
    }

    fn note(id: &str, text: &str) -> Note {
        Note {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn session_reads_its_own_writes_before_saving() {
        let store = InMemoryDocumentStore::new();
        let mut session = DocumentSession::open(&store);

        session.store(&note("a", "first")).unwrap();
        assert_eq!(session.load::<Note>("a").await.unwrap(), Some(note("a", "first")));

        session.delete::<Note>("a");
        assert_eq!(session.load::<Note>("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn saved_changes_are_visible_to_new_sessions() {
        let store = InMemoryDocumentStore::new();

        let mut session = DocumentSession::open(&store);
        session.store(&note("a", "first")).unwrap();
        session.save_changes().await.unwrap();

        let mut session = DocumentSession::open(&store);
        assert_eq!(session.load::<Note>("a").await.unwrap(), Some(note("a", "first")));
    }

    #[tokio::test]
    async fn dropped_session_discards_pending_writes() {
        let store = InMemoryDocumentStore::new();
        {
            let mut session = DocumentSession::open(&store);
            session.store(&note("a", "lost")).unwrap();
            assert!(session.has_changes());
        }

        let mut session = DocumentSession::open(&store);
        assert_eq!(session.load::<Note>("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unavailable_store_fails_the_commit() {
        let store = InMemoryDocumentStore::new();
        store.set_available(false);

        let mut session = DocumentSession::open(&store);
        session.store(&note("a", "x")).unwrap();
        assert!(matches!(
            session.save_changes().await,
            Err(DocumentStoreError::Unavailable(_))
        ));

        store.set_available(true);
        let mut session = DocumentSession::open(&store);
        assert_eq!(session.load::<Note>("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn mismatched_body_is_a_serialization_error() {
        let store = InMemoryDocumentStore::new();
        store
            .commit(vec![DocumentChange::Put {
                collection: "notes".to_string(),
                id: "a".to_string(),
                body: serde_json::json!({ "id": "a" }),
            }])
            .await
            .unwrap();

        let mut session = DocumentSession::open(&store);
        assert!(matches!(
            session.load::<Note>("a").await,
            Err(DocumentStoreError::Serialization { .. })
        ));
    }
}
