//! Projection checkpoint persistence.
//!
//! One document per projection records the global position of the last event
//! whose effect has been applied. This enables:
//! - Resume after crash (subscribe strictly after the checkpoint)
//! - Idempotent replay (at most the boundary event is seen twice)
//! - Deterministic rebuilds (`reset` and replay from the start)

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use carelog_events::GlobalPosition;

use crate::read_model::{Document, DocumentSession, DocumentStore, DocumentStoreError};

/// Stored checkpoint; `id` is the projection name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionCheckpoint {
    pub id: String,
    pub commit_position: u64,
    pub prepare_position: u64,
}

impl ProjectionCheckpoint {
    pub fn new(projection: &str, position: GlobalPosition) -> Self {
        Self {
            id: projection.to_string(),
            commit_position: position.commit,
            prepare_position: position.prepare,
        }
    }

    pub fn position(&self) -> GlobalPosition {
        GlobalPosition::new(self.commit_position, self.prepare_position)
    }
}

impl Document for ProjectionCheckpoint {
    const COLLECTION: &'static str = "projection_checkpoints";

    fn document_id(&self) -> String {
        self.id.clone()
    }
}

/// Reads and writes projection checkpoints through the document store.
///
/// Stored positions never move backwards: a save below the stored position is
/// ignored.
#[derive(Clone)]
pub struct CheckpointStore {
    documents: Arc<dyn DocumentStore>,
}

impl CheckpointStore {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    pub async fn load(&self, projection: &str) -> Result<Option<GlobalPosition>, DocumentStoreError> {
        let mut session = DocumentSession::open(self.documents.as_ref());
        Ok(session
            .load::<ProjectionCheckpoint>(projection)
            .await?
            .map(|c| c.position()))
    }

    /// Persist `position` for `projection`.
    ///
    /// Returns `false` when the stored checkpoint is already at or past it.
    pub async fn save(
        &self,
        projection: &str,
        position: GlobalPosition,
    ) -> Result<bool, DocumentStoreError> {
        let mut session = DocumentSession::open(self.documents.as_ref());
        if let Some(current) = session.load::<ProjectionCheckpoint>(projection).await? {
            if current.position() >= position {
                debug!(
                    projection,
                    stored = %current.position(),
                    position = %position,
                    "ignoring non-advancing checkpoint"
                );
                return Ok(false);
            }
        }

        session.store(&ProjectionCheckpoint::new(projection, position))?;
        session.save_changes().await?;
        Ok(true)
    }

    /// Forget the checkpoint so the projection restarts from the beginning.
    pub async fn reset(&self, projection: &str) -> Result<(), DocumentStoreError> {
        let mut session = DocumentSession::open(self.documents.as_ref());
        session.delete::<ProjectionCheckpoint>(projection);
        session.save_changes().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_model::InMemoryDocumentStore;

    fn store() -> CheckpointStore {
        CheckpointStore::new(Arc::new(InMemoryDocumentStore::new()))
    }

    #[tokio::test]
    async fn missing_checkpoint_loads_as_none() {
        assert_eq!(store().load("p").await.unwrap(), None);
    }

    #[tokio::test]
    async fn checkpoints_only_move_forward() {
        let checkpoints = store();

        assert!(checkpoints.save("p", GlobalPosition::new(5, 5)).await.unwrap());
        assert!(!checkpoints.save("p", GlobalPosition::new(3, 3)).await.unwrap());
        assert!(!checkpoints.save("p", GlobalPosition::new(5, 5)).await.unwrap());
        assert_eq!(checkpoints.load("p").await.unwrap(), Some(GlobalPosition::new(5, 5)));

        assert!(checkpoints.save("p", GlobalPosition::new(9, 9)).await.unwrap());
        assert_eq!(checkpoints.load("p").await.unwrap(), Some(GlobalPosition::new(9, 9)));
    }

    #[tokio::test]
    async fn checkpoints_are_per_projection() {
        let checkpoints = store();
        checkpoints.save("a", GlobalPosition::new(2, 2)).await.unwrap();
        checkpoints.save("b", GlobalPosition::new(7, 7)).await.unwrap();

        assert_eq!(checkpoints.load("a").await.unwrap(), Some(GlobalPosition::new(2, 2)));
        assert_eq!(checkpoints.load("b").await.unwrap(), Some(GlobalPosition::new(7, 7)));
    }

    #[tokio::test]
    async fn reset_forgets_the_position() {
        let checkpoints = store();
        checkpoints.save("p", GlobalPosition::new(4, 4)).await.unwrap();
        checkpoints.reset("p").await.unwrap();
        assert_eq!(checkpoints.load("p").await.unwrap(), None);
    }
}
