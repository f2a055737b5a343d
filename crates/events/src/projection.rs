use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{GlobalPosition, RecordedEvent};

/// Failure while applying one event to a read model.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProjectionError {
    /// The payload could not be decoded into the projection's event type.
    ///
    /// Skipping such an event would silently corrupt the read model, so the
    /// projection stops instead.
    #[error("failed to deserialize '{event_type}' event: {message}")]
    Deserialize { event_type: String, message: String },

    /// The read-model store rejected or could not perform a write.
    #[error("read model store failure: {0}")]
    Store(String),
}

impl ProjectionError {
    pub fn store(err: impl core::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }
}

/// A projection builds a read model from the global event log.
///
/// Projections implement the **CQRS read model pattern**: they transform events (write model)
/// into queryable state (read model).
///
/// ## Resume & Idempotency
///
/// A projection is driven from its last persisted checkpoint. After a crash the
/// event at (or right after) the checkpoint may be delivered again, so `handle`
/// must be safe to re-run: upserts, deletes and set operations are naturally
/// overwrite-safe.
///
/// ## State
///
/// Projections hold no in-memory state between calls; everything they know
/// lives in the documents they write.
#[async_trait]
pub trait Projection: Send + Sync + 'static {
    /// Typed event the payloads decode into.
    type Event: DeserializeOwned + Send + 'static;

    /// Logical name; also the checkpoint key.
    fn name(&self) -> &str;

    /// Whether events of this type affect the read model.
    fn can_handle(&self, event_type: &str) -> bool;

    /// Apply one event's effect to the read model.
    async fn handle(
        &self,
        event_type: &str,
        event: Self::Event,
        position: GlobalPosition,
    ) -> Result<(), ProjectionError>;
}

/// Object-safe view of a [`Projection`], as stored by the projection manager.
///
/// Implemented for every `Projection`; decoding the payload happens here.
#[async_trait]
pub trait ProjectionHandler: Send + Sync {
    fn name(&self) -> &str;

    fn can_handle(&self, event_type: &str) -> bool;

    async fn handle_recorded(&self, recorded: &RecordedEvent) -> Result<(), ProjectionError>;
}

#[async_trait]
impl<P> ProjectionHandler for P
where
    P: Projection,
{
    fn name(&self) -> &str {
        Projection::name(self)
    }

    fn can_handle(&self, event_type: &str) -> bool {
        Projection::can_handle(self, event_type)
    }

    async fn handle_recorded(&self, recorded: &RecordedEvent) -> Result<(), ProjectionError> {
        let event: P::Event = recorded
            .decode()
            .map_err(|e| ProjectionError::Deserialize {
                event_type: recorded.event_type.clone(),
                message: e.to_string(),
            })?;

        Projection::handle(self, &recorded.event_type, event, recorded.position).await
    }
}
