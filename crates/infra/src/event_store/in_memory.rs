use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use carelog_core::ExpectedVersion;
use carelog_events::{
    AllSubscription, DropReason, GlobalPosition, RecordedEvent, StreamId, SubscriptionSender,
};

use super::r#trait::{EventStore, EventStoreError, UncommittedEvent};

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<StreamId, Vec<RecordedEvent>>,
    /// Every event of every stream, in global order.
    log: Vec<RecordedEvent>,
    subscribers: Vec<SubscriptionSender>,
    failing_subscribes: usize,
}

/// In-memory append-only event log.
///
/// Intended for tests/dev. Streams, the global log and live subscribers sit
/// behind one lock, so a subscription's backlog hand-off and its registration
/// as a live subscriber happen atomically with respect to appends.
///
/// Positions start at 1 and `commit == prepare`.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    inner: Mutex<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, EventStoreError> {
        self.inner
            .lock()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))
    }

    /// Drop every live subscription with `reason`.
    pub fn drop_subscriptions(&self, reason: DropReason) {
        if let Ok(mut inner) = self.inner.lock() {
            for sender in inner.subscribers.drain(..) {
                sender.try_drop_with(reason, Some("dropped by the in-memory event log".to_string()));
            }
        }
    }

    /// Make the next `n` calls to `subscribe_all` fail with `Unavailable`.
    pub fn fail_next_subscribes(&self, n: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing_subscribes = n;
        }
    }

    /// Number of subscriptions still connected.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .map(|mut inner| {
                inner.subscribers.retain(|s| !s.is_closed());
                inner.subscribers.len()
            })
            .unwrap_or(0)
    }

    /// Snapshot of the global log.
    pub fn all_events(&self) -> Vec<RecordedEvent> {
        self.inner
            .lock()
            .map(|inner| inner.log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        stream: &StreamId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError> {
        let mut inner = self.lock()?;

        let current = inner.streams.get(stream).map(|s| s.len() as u64).unwrap_or(0);
        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency {
                stream: stream.clone(),
                expected: expected_version,
                actual: current,
            });
        }
        if events.is_empty() {
            return Ok(current);
        }

        let mut next_position = inner.log.len() as u64 + 1;
        let mut committed = Vec::with_capacity(events.len());
        for (offset, event) in events.into_iter().enumerate() {
            let position = GlobalPosition::new(next_position, next_position);
            next_position += 1;
            committed.push(event.record(stream.clone(), current + 1 + offset as u64, position));
        }
        let new_version = current + committed.len() as u64;

        inner.log.extend(committed.iter().cloned());
        inner
            .streams
            .entry(stream.clone())
            .or_default()
            .extend(committed.iter().cloned());

        // Live delivery; disconnected subscribers are pruned.
        inner.subscribers.retain(|sender| {
            committed
                .iter()
                .all(|event| sender.try_send_event(event.clone()))
        });

        Ok(new_version)
    }

    async fn read_stream(&self, stream: &StreamId) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let inner = self.lock()?;
        Ok(inner.streams.get(stream).cloned().unwrap_or_default())
    }

    async fn subscribe_all(
        &self,
        from: Option<GlobalPosition>,
    ) -> Result<AllSubscription, EventStoreError> {
        let mut inner = self.lock()?;

        if inner.failing_subscribes > 0 {
            inner.failing_subscribes -= 1;
            return Err(EventStoreError::Unavailable(
                "subscription refused by the in-memory event log".to_string(),
            ));
        }

        let (sender, subscription) = AllSubscription::channel();
        for event in inner
            .log
            .iter()
            .filter(|e| from.is_none_or(|from| e.position > from))
        {
            sender.try_send_event(event.clone());
        }
        sender.try_send_caught_up();
        inner.subscribers.push(sender);

        Ok(subscription)
    }
}
