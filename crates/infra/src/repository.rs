//! Aggregate repository: load-by-replay and optimistic save.
//!
//! ```text
//! get::<A>(id)
//!   1. read the aggregate's stream
//!   2. check revisions are 1..n
//!   3. decode payloads into A::Event
//!   4. fold into A::empty(id)
//!
//! save(&mut aggregate)
//!   1. serialize pending events
//!   2. append with the expected version observed at load time
//!   3. clear pending, advance the tracked version
//! ```
//!
//! Nothing is cached between commands; every `get` replays the full stream.
//! A concurrency failure is returned to the caller, never retried here.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{Span, debug, instrument};
use uuid::Uuid;

use carelog_core::{Aggregate, AggregateId, EventSourced, ExpectedVersion};
use carelog_events::{RecordedEvent, StreamId};

use crate::event_store::{EventStore, EventStoreError, UncommittedEvent};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("stream '{stream}' not found")]
    NotFound { stream: StreamId },

    #[error(
        "optimistic concurrency check failed on '{stream}' (expected: {expected:?}, actual: {actual})"
    )]
    Concurrency {
        stream: StreamId,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("failed to deserialize event {revision} of '{stream}': {message}")]
    Deserialize {
        stream: StreamId,
        revision: u64,
        message: String,
    },

    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for RepositoryError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency {
                stream,
                expected,
                actual,
            } => RepositoryError::Concurrency {
                stream,
                expected,
                actual,
            },
            other => RepositoryError::Store(other),
        }
    }
}

/// Loads and saves event-sourced aggregates against one shared event store.
pub struct AggregateRepository<S: ?Sized = dyn EventStore> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for AggregateRepository<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> AggregateRepository<S>
where
    S: EventStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Rebuild aggregate `id` from its full stream.
    #[instrument(
        skip(self),
        fields(aggregate_type = A::aggregate_type(), version = tracing::field::Empty),
        err
    )]
    pub async fn get<A>(&self, id: AggregateId) -> Result<EventSourced<A>, RepositoryError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let stream = StreamId::for_aggregate(A::aggregate_type(), id);
        let history = self.store.read_stream(&stream).await?;
        if history.is_empty() {
            return Err(RepositoryError::NotFound { stream });
        }
        validate_revisions(&stream, &history)?;

        let events = history
            .iter()
            .map(|recorded| {
                recorded
                    .decode::<A::Event>()
                    .map_err(|e| RepositoryError::Deserialize {
                        stream: stream.clone(),
                        revision: recorded.stream_revision,
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let aggregate = EventSourced::<A>::rehydrate(id, events);
        Span::current().record("version", aggregate.persisted_version());
        Ok(aggregate)
    }

    /// Append the aggregate's pending events.
    ///
    /// Returns the stream version after the save. With nothing pending this
    /// is a no-op returning the tracked version.
    #[instrument(
        skip(self, aggregate),
        fields(
            aggregate_type = A::aggregate_type(),
            aggregate_id = %aggregate.id(),
            expected_version = ?aggregate.expected_version(),
            event_count = aggregate.pending().len()
        ),
        err
    )]
    pub async fn save<A>(&self, aggregate: &mut EventSourced<A>) -> Result<u64, RepositoryError>
    where
        A: Aggregate,
        A::Event: carelog_events::Event + Serialize,
    {
        if !aggregate.has_pending() {
            return Ok(aggregate.persisted_version());
        }

        let stream = StreamId::for_aggregate(A::aggregate_type(), aggregate.id());
        let uncommitted = aggregate
            .pending()
            .iter()
            .map(|event| UncommittedEvent::from_typed(Uuid::now_v7(), event))
            .collect::<Result<Vec<_>, _>>()?;

        let new_version = self
            .store
            .append(&stream, aggregate.expected_version(), uncommitted)
            .await?;

        aggregate.mark_committed(new_version);
        debug!(%stream, new_version, "aggregate saved");
        Ok(new_version)
    }
}

fn validate_revisions(stream: &StreamId, history: &[RecordedEvent]) -> Result<(), RepositoryError> {
    for (idx, recorded) in history.iter().enumerate() {
        let expected = idx as u64 + 1;
        if recorded.stream_revision != expected {
            return Err(RepositoryError::Store(EventStoreError::Corrupt(format!(
                "stream '{stream}' has revision {} where {expected} was expected",
                recorded.stream_revision
            ))));
        }
        if &recorded.stream_id != stream {
            return Err(RepositoryError::Store(EventStoreError::Corrupt(format!(
                "stream '{stream}' returned an event of '{}'",
                recorded.stream_id
            ))));
        }
    }
    Ok(())
}
