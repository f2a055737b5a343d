//! Append-only event log boundary.
//!
//! Streams are addressed by [`StreamId`](carelog_events::StreamId); the global
//! log orders every event of every stream and feeds catch-up subscriptions.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::{PostgresEventStore, PostgresEventStoreConfig};
pub use r#trait::{EventStore, EventStoreError, UncommittedEvent};
