use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use carelog_core::ExpectedVersion;
use carelog_events::{AllSubscription, GlobalPosition, RecordedEvent, StreamId};

/// An event ready to be appended to a stream (no revision or position yet).
///
/// ## Event Lifecycle
///
/// 1. **Domain event**: raised by an aggregate
/// 2. **UncommittedEvent**: serialized with its metadata, waiting for append
/// 3. **RecordedEvent**: persisted, with stream revision and global position
///
/// Use `UncommittedEvent::from_typed()` to build one from a typed domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Serialize a typed domain event, capturing the metadata needed to decode
    /// it again later.
    pub fn from_typed<E>(event_id: Uuid, event: &E) -> Result<Self, EventStoreError>
    where
        E: carelog_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }

    /// Attach the coordinates assigned by the log.
    pub fn record(
        self,
        stream_id: StreamId,
        stream_revision: u64,
        position: GlobalPosition,
    ) -> RecordedEvent {
        RecordedEvent {
            event_id: self.event_id,
            stream_id,
            stream_revision,
            event_type: self.event_type,
            event_version: self.event_version,
            occurred_at: self.occurred_at,
            payload: self.payload,
            position,
        }
    }
}

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error(
        "optimistic concurrency check failed on '{stream}' (expected: {expected:?}, actual: {actual})"
    )]
    Concurrency {
        stream: StreamId,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("stored event is corrupt: {0}")]
    Corrupt(String),

    #[error("event store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only event log.
///
/// Events are organized into **streams** (one per aggregate instance) and into
/// one **global log** that totally orders every event of every stream.
///
/// ## Append Semantics
///
/// `append()`:
/// - checks optimistic concurrency against the stream's current version
/// - assigns stream revisions `current + 1 ..` and increasing global positions
/// - persists the batch atomically (all or nothing)
/// - returns the new stream version
///
/// ## Subscriptions
///
/// `subscribe_all(from)` opens a catch-up subscription: every event strictly
/// after `from` (or from the very beginning when `None`), in global order,
/// followed by `CaughtUp` and then live appends. Backlog and live delivery
/// never interleave out of order.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(
        &self,
        stream: &StreamId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError>;

    /// Full stream in revision order; empty when the stream does not exist.
    async fn read_stream(&self, stream: &StreamId) -> Result<Vec<RecordedEvent>, EventStoreError>;

    async fn subscribe_all(
        &self,
        from: Option<GlobalPosition>,
    ) -> Result<AllSubscription, EventStoreError>;
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn append(
        &self,
        stream: &StreamId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError> {
        (**self).append(stream, expected_version, events).await
    }

    async fn read_stream(&self, stream: &StreamId) -> Result<Vec<RecordedEvent>, EventStoreError> {
        (**self).read_stream(stream).await
    }

    async fn subscribe_all(
        &self,
        from: Option<GlobalPosition>,
    ) -> Result<AllSubscription, EventStoreError> {
        (**self).subscribe_all(from).await
    }
}
