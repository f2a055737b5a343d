//! Postgres-backed event store implementation.
//!
//! One `events` table holds every stream. `global_position` is a `BIGSERIAL`
//! and appends take a transaction-scoped advisory lock, so positions become
//! visible in commit order and a subscription that has read up to position `P`
//! never later discovers an event below `P`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError | Scenario |
//! |------------|----------------------|-----------------|----------|
//! | Database (unique violation) | `23505` | `Concurrency` | Concurrent append on `(stream_id, stream_revision)` |
//! | Database (check constraint violation) | `23514` | `InvalidAppend` | Invalid data (e.g. revision <= 0) |
//! | Database (other) | Any other | `Unavailable` | Other database errors |
//! | PoolClosed / Io / other | N/A | `Unavailable` | Connection failures |
//!
//! ## Subscriptions
//!
//! `subscribe_all` spawns a reader task per subscription. The task drains the
//! backlog in batches, reports `CaughtUp`, then waits for a `pg_notify` on
//! [`NOTIFY_CHANNEL`] (or the poll interval, whichever comes first) before
//! reading again. Any database failure drops the subscription with
//! `ServerError`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgListener, PgRow};
use sqlx::{PgPool, Row};
use tracing::{Span, debug, instrument, warn};

use carelog_core::ExpectedVersion;
use carelog_events::{
    AllSubscription, DropReason, GlobalPosition, RecordedEvent, StreamId, SubscriptionSender,
};

use super::r#trait::{EventStore, EventStoreError, UncommittedEvent};

/// Channel used to wake subscriptions after an append.
pub const NOTIFY_CHANNEL: &str = "carelog_events";

/// Advisory lock key serializing appends.
const APPEND_LOCK_KEY: i64 = 0x6361_7265_6c6f_67;

/// Subscription tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostgresEventStoreConfig {
    /// Upper bound on the wait between reads when no notification arrives.
    pub poll_interval: Duration,
    /// Events fetched per backlog query.
    pub batch_size: u32,
}

impl Default for PostgresEventStoreConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 256,
        }
    }
}

/// Postgres-backed append-only event store.
///
/// ## Optimistic Concurrency
///
/// `append()` runs in one transaction:
/// 1. take the append advisory lock
/// 2. read the stream's current revision
/// 3. compare it with `expected_version`
/// 4. insert the batch and `pg_notify`
///
/// The unique constraint on `(stream_id, stream_revision)` backs the check up
/// and surfaces as `Concurrency` too.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
    config: PostgresEventStoreConfig,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, PostgresEventStoreConfig::default())
    }

    pub fn with_config(pool: PgPool, config: PostgresEventStoreConfig) -> Self {
        Self {
            pool: Arc::new(pool),
            config,
        }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(
        skip(self, events),
        fields(
            stream = %stream,
            expected_version = ?expected_version,
            event_count = events.len(),
            new_version = tracing::field::Empty
        ),
        err
    )]
    async fn append(
        &self,
        stream: &StreamId,
        expected_version: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("advisory_lock", e))?;

        let current: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(stream_revision), 0) FROM events WHERE stream_id = $1",
        )
        .bind(stream.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("current_version", e))?;
        let current = current as u64;

        if !expected_version.matches(current) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(EventStoreError::Concurrency {
                stream: stream.clone(),
                expected: expected_version,
                actual: current,
            });
        }
        if events.is_empty() {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(current);
        }

        let mut revision = current;
        for event in events {
            revision += 1;
            sqlx::query(
                r#"
                INSERT INTO events (
                    event_id,
                    stream_id,
                    stream_revision,
                    event_type,
                    event_version,
                    occurred_at,
                    payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(event.event_id)
            .bind(stream.as_str())
            .bind(revision as i64)
            .bind(&event.event_type)
            .bind(event.event_version as i32)
            .bind(event.occurred_at)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EventStoreError::Concurrency {
                        stream: stream.clone(),
                        expected: expected_version,
                        actual: revision,
                    }
                } else {
                    map_sqlx_error("insert_event", e)
                }
            })?;
        }

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(stream.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("notify", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("new_version", revision);
        Ok(revision)
    }

    #[instrument(skip(self), fields(stream = %stream), err)]
    async fn read_stream(&self, stream: &StreamId) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                global_position,
                event_id,
                stream_id,
                stream_revision,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM events
            WHERE stream_id = $1
            ORDER BY stream_revision ASC
            "#,
        )
        .bind(stream.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("read_stream", e))?;

        rows.iter().map(recorded_from_row).collect()
    }

    #[instrument(skip(self), fields(from = ?from), err)]
    async fn subscribe_all(
        &self,
        from: Option<GlobalPosition>,
    ) -> Result<AllSubscription, EventStoreError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("listener_connect", e))?;
        listener
            .listen(NOTIFY_CHANNEL)
            .await
            .map_err(|e| map_sqlx_error("listen", e))?;

        // The reader waits while a full batch is still unconsumed.
        let (sender, subscription) = AllSubscription::bounded(self.config.batch_size as usize);
        let reader = SubscriptionReader {
            pool: Arc::clone(&self.pool),
            config: self.config,
            after: from.map(|p| p.commit as i64).unwrap_or(0),
        };
        tokio::spawn(reader.run(listener, sender));

        Ok(subscription)
    }
}

/// Background reader feeding one subscription.
struct SubscriptionReader {
    pool: Arc<PgPool>,
    config: PostgresEventStoreConfig,
    /// Last global position handed to the consumer.
    after: i64,
}

impl SubscriptionReader {
    async fn run(mut self, mut listener: PgListener, sender: SubscriptionSender) {
        let mut caught_up = false;

        loop {
            if sender.is_closed() {
                debug!(after = self.after, "subscription disposed by consumer");
                return;
            }

            let batch = match self.read_batch().await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, after = self.after, "subscription read failed");
                    sender
                        .drop_with(DropReason::ServerError, Some(e.to_string()))
                        .await;
                    return;
                }
            };

            let full = batch.len() as u32 >= self.config.batch_size;
            for event in batch {
                self.after = event.position.commit as i64;
                if !sender.send_event(event).await {
                    return;
                }
            }
            if full {
                continue;
            }

            if !caught_up {
                caught_up = true;
                if !sender.send_caught_up().await {
                    return;
                }
            }

            // A timeout just means "poll again".
            match tokio::time::timeout(self.config.poll_interval, listener.try_recv()).await {
                Ok(Err(e)) => {
                    warn!(error = %e, "notification listener failed");
                    sender
                        .drop_with(
                            DropReason::ServerError,
                            Some(map_sqlx_error("listener_recv", e).to_string()),
                        )
                        .await;
                    return;
                }
                Ok(Ok(_)) | Err(_) => {}
            }
        }
    }

    async fn read_batch(&self) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                global_position,
                event_id,
                stream_id,
                stream_revision,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM events
            WHERE global_position > $1
            ORDER BY global_position ASC
            LIMIT $2
            "#,
        )
        .bind(self.after)
        .bind(i64::from(self.config.batch_size))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("read_all", e))?;

        rows.iter().map(recorded_from_row).collect()
    }
}

fn recorded_from_row(row: &PgRow) -> Result<RecordedEvent, EventStoreError> {
    let corrupt = |e: sqlx::Error| EventStoreError::Corrupt(format!("failed to read event row: {e}"));

    let global_position: i64 = row.try_get("global_position").map_err(corrupt)?;
    let stream_id: String = row.try_get("stream_id").map_err(corrupt)?;
    let stream_revision: i64 = row.try_get("stream_revision").map_err(corrupt)?;
    let event_version: i32 = row.try_get("event_version").map_err(corrupt)?;
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(corrupt)?;

    Ok(RecordedEvent {
        event_id: row.try_get("event_id").map_err(corrupt)?,
        stream_id: StreamId::new(stream_id),
        stream_revision: stream_revision as u64,
        event_type: row.try_get("event_type").map_err(corrupt)?,
        event_version: event_version as u32,
        occurred_at,
        payload: row.try_get("payload").map_err(corrupt)?,
        position: GlobalPosition::new(global_position as u64, global_position as u64),
    })
}

/// Map SQLx errors to EventStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
            EventStoreError::Corrupt(format!("sqlx error in {operation}: {err}"))
        }
        _ => EventStoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
