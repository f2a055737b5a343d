//! Projection manager: one supervisor task per projection.
//!
//! ```text
//!  Resolving ──► Subscribed(CatchingUp) ──CaughtUp──► Subscribed(Live)
//!                      │   ▲                               │
//!                      │   └──────── Resubscribing ◄───────┤ drop / store failure
//!                      │                                   │
//!                      └──► Paused (undecodable event) ◄───┘
//!
//!  any state ──cancel──► Stopped
//! ```
//!
//! Per event: `can_handle` → decode → `handle` → checkpoint. The checkpoint is
//! only written once the handler succeeded. A handler store failure or a
//! failed checkpoint write is treated like a subscriber-side drop; the
//! supervisor re-resolves its checkpoint and subscribes again, so the event
//! is delivered again (at-least-once).
//!
//! Resubscription attempts of all projections are serialized by one lock per
//! manager. A failed attempt is retried after a fixed delay until it succeeds
//! or the manager is cancelled.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use carelog_events::{
    AllSubscription, DropReason, GlobalPosition, ProjectionError, ProjectionHandler,
    RecordedEvent, SubscriptionDropped, SubscriptionMessage,
};

use crate::event_store::{EventStore, EventStoreError};
use crate::projections::CheckpointStore;
use crate::read_model::{DocumentStore, DocumentStoreError};

/// When the checkpoint advances.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum CheckpointPolicy {
    /// After every observed event, handled or not.
    #[default]
    EveryEvent,
    /// Only after events the projection handled.
    HandledOnly,
}

impl FromStr for CheckpointPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "every_event" => Ok(CheckpointPolicy::EveryEvent),
            "handled_only" => Ok(CheckpointPolicy::HandledOnly),
            other => Err(format!(
                "unknown checkpoint policy '{other}' (expected every_event or handled_only)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionManagerConfig {
    /// Wait after a failed resubscription attempt.
    pub resubscribe_delay: Duration,
    pub checkpoint_policy: CheckpointPolicy,
}

impl Default for ProjectionManagerConfig {
    fn default() -> Self {
        Self {
            resubscribe_delay: Duration::from_secs(1),
            checkpoint_policy: CheckpointPolicy::EveryEvent,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubscriptionPhase {
    CatchingUp,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    Resolving,
    Subscribed(SubscriptionPhase),
    Resubscribing,
    /// Stopped on an event it could not decode; needs operator attention.
    Paused,
    Stopped,
}

/// Snapshot of one supervisor, published on a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionStatus {
    pub projection: String,
    pub state: SubscriptionState,
    /// Last persisted checkpoint (as resolved or written by this supervisor).
    pub checkpoint: Option<GlobalPosition>,
    /// Successful resubscriptions since start.
    pub resubscriptions: u64,
    pub last_error: Option<String>,
}

impl ProjectionStatus {
    fn new(projection: &str) -> Self {
        Self {
            projection: projection.to_string(),
            state: SubscriptionState::Resolving,
            checkpoint: None,
            resubscriptions: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProjectionManagerError {
    #[error("projection '{0}' is registered twice")]
    DuplicateProjection(String),

    #[error("projection '{projection}' could not subscribe: {source}")]
    Subscribe {
        projection: String,
        #[source]
        source: EventStoreError,
    },

    #[error("projection '{projection}' could not read its checkpoint: {source}")]
    Checkpoint {
        projection: String,
        #[source]
        source: DocumentStoreError,
    },
}

/// Registers projections and starts their supervisors.
pub struct ProjectionManager {
    event_store: Arc<dyn EventStore>,
    checkpoints: CheckpointStore,
    projections: Vec<Arc<dyn ProjectionHandler>>,
    config: ProjectionManagerConfig,
}

impl ProjectionManager {
    pub fn new(
        event_store: Arc<dyn EventStore>,
        documents: Arc<dyn DocumentStore>,
        config: ProjectionManagerConfig,
    ) -> Self {
        Self {
            event_store,
            checkpoints: CheckpointStore::new(documents),
            projections: Vec::new(),
            config,
        }
    }

    pub fn register<P>(mut self, projection: P) -> Result<Self, ProjectionManagerError>
    where
        P: ProjectionHandler + 'static,
    {
        if self.projections.iter().any(|p| p.name() == projection.name()) {
            return Err(ProjectionManagerError::DuplicateProjection(
                projection.name().to_string(),
            ));
        }
        self.projections.push(Arc::new(projection));
        Ok(self)
    }

    /// Subscribe every projection and spawn its supervisor.
    ///
    /// Projections start one after the other. If one cannot start, the
    /// supervisors already running are cancelled and the error is returned.
    /// Cancelling `ct` (or calling [`ProjectionManagerHandle::shutdown`])
    /// stops every supervisor.
    pub async fn start(
        self,
        ct: CancellationToken,
    ) -> Result<ProjectionManagerHandle, ProjectionManagerError> {
        let ct = ct.child_token();
        let resubscribe_lock = Arc::new(Mutex::new(()));
        let mut statuses = BTreeMap::new();
        let mut tasks = Vec::with_capacity(self.projections.len());

        for projection in self.projections {
            let name = projection.name().to_string();
            let (status_tx, status_rx) = watch::channel(ProjectionStatus::new(&name));
            let supervisor = Supervisor {
                projection,
                event_store: Arc::clone(&self.event_store),
                checkpoints: self.checkpoints.clone(),
                config: self.config.clone(),
                resubscribe_lock: Arc::clone(&resubscribe_lock),
                ct: ct.clone(),
                status: status_tx,
            };

            match supervisor.subscribe().await {
                Ok(subscription) => {
                    info!(projection = %name, checkpoint = ?supervisor.status.borrow().checkpoint, "projection subscribed");
                    tasks.push(tokio::spawn(supervisor.run(subscription)));
                    statuses.insert(name, status_rx);
                }
                Err(e) => {
                    error!(projection = %name, error = %e, "projection failed to start");
                    ct.cancel();
                    join_all(tasks).await;
                    return Err(e);
                }
            }
        }

        Ok(ProjectionManagerHandle {
            ct,
            statuses,
            tasks,
        })
    }
}

/// Control surface of a running manager.
pub struct ProjectionManagerHandle {
    ct: CancellationToken,
    statuses: BTreeMap<String, watch::Receiver<ProjectionStatus>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ProjectionManagerHandle {
    pub fn status(&self, projection: &str) -> Option<ProjectionStatus> {
        self.statuses.get(projection).map(|rx| rx.borrow().clone())
    }

    pub fn statuses(&self) -> Vec<ProjectionStatus> {
        self.statuses.values().map(|rx| rx.borrow().clone()).collect()
    }

    /// Follow one projection's status changes.
    pub fn watch(&self, projection: &str) -> Option<watch::Receiver<ProjectionStatus>> {
        self.statuses.get(projection).cloned()
    }

    /// Cancel every supervisor and wait for them to stop.
    ///
    /// An event being handled at that moment completes (checkpoint included).
    pub async fn shutdown(self) {
        self.ct.cancel();
        join_all(self.tasks).await;
        info!("projection manager stopped");
    }
}

async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "projection supervisor ended abnormally");
        }
    }
}

/// Why the supervisor stopped following a subscription.
enum Outcome {
    Dropped(SubscriptionDropped),
    Paused(ProjectionError),
    Cancelled,
}

/// Why delivering one event failed.
enum DeliveryFailure {
    Undecodable(ProjectionError),
    Subscriber(String),
}

struct Supervisor {
    projection: Arc<dyn ProjectionHandler>,
    event_store: Arc<dyn EventStore>,
    checkpoints: CheckpointStore,
    config: ProjectionManagerConfig,
    resubscribe_lock: Arc<Mutex<()>>,
    ct: CancellationToken,
    status: watch::Sender<ProjectionStatus>,
}

impl Supervisor {
    fn name(&self) -> &str {
        self.projection.name()
    }

    fn set_state(&self, state: SubscriptionState) {
        self.status.send_modify(|s| s.state = state);
    }

    async fn run(self, mut subscription: AllSubscription) {
        loop {
            match self.follow(&mut subscription).await {
                Outcome::Cancelled => break,
                Outcome::Paused(e) => {
                    error!(
                        projection = self.name(),
                        error = %e,
                        "projection paused on an event it cannot decode"
                    );
                    self.status.send_modify(|s| {
                        s.state = SubscriptionState::Paused;
                        s.last_error = Some(e.to_string());
                    });
                    drop(subscription);
                    self.ct.cancelled().await;
                    break;
                }
                Outcome::Dropped(dropped) => {
                    warn!(
                        projection = self.name(),
                        reason = %dropped.reason,
                        cause = dropped.cause.as_deref().unwrap_or(""),
                        "subscription dropped"
                    );
                    self.status.send_modify(|s| {
                        s.state = SubscriptionState::Resubscribing;
                        s.last_error = Some(dropped.to_string());
                    });
                    match self.resubscribe().await {
                        Some(next) => subscription = next,
                        None => break,
                    }
                }
            }
        }

        self.set_state(SubscriptionState::Stopped);
        debug!(projection = self.name(), "projection supervisor stopped");
    }

    /// Resolve the checkpoint and open a subscription right after it.
    async fn subscribe(&self) -> Result<AllSubscription, ProjectionManagerError> {
        self.set_state(SubscriptionState::Resolving);

        let checkpoint = self.checkpoints.load(self.name()).await.map_err(|source| {
            ProjectionManagerError::Checkpoint {
                projection: self.name().to_string(),
                source,
            }
        })?;

        let subscription = self
            .event_store
            .subscribe_all(checkpoint)
            .await
            .map_err(|source| ProjectionManagerError::Subscribe {
                projection: self.name().to_string(),
                source,
            })?;

        self.status.send_modify(|s| {
            s.state = SubscriptionState::Subscribed(SubscriptionPhase::CatchingUp);
            s.checkpoint = checkpoint;
        });
        Ok(subscription)
    }

    /// Retry until subscribed again; `None` once cancelled.
    async fn resubscribe(&self) -> Option<AllSubscription> {
        loop {
            let attempt = {
                let _guard = tokio::select! {
                    _ = self.ct.cancelled() => return None,
                    guard = self.resubscribe_lock.lock() => guard,
                };
                if self.ct.is_cancelled() {
                    return None;
                }
                self.subscribe().await
            };

            match attempt {
                Ok(subscription) => {
                    self.status.send_modify(|s| s.resubscriptions += 1);
                    info!(
                        projection = self.name(),
                        checkpoint = ?self.status.borrow().checkpoint,
                        "projection resubscribed"
                    );
                    return Some(subscription);
                }
                Err(e) => {
                    warn!(
                        projection = self.name(),
                        error = %e,
                        retry_in_ms = self.config.resubscribe_delay.as_millis() as u64,
                        "resubscription failed"
                    );
                    self.status.send_modify(|s| {
                        s.state = SubscriptionState::Resubscribing;
                        s.last_error = Some(e.to_string());
                    });
                }
            }

            tokio::select! {
                _ = self.ct.cancelled() => return None,
                _ = tokio::time::sleep(self.config.resubscribe_delay) => {}
            }
        }
    }

    async fn follow(&self, subscription: &mut AllSubscription) -> Outcome {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.ct.cancelled() => return Outcome::Cancelled,
                message = subscription.next() => message,
            };

            match message {
                SubscriptionMessage::Event(recorded) => match self.deliver(&recorded).await {
                    Ok(()) => {}
                    Err(DeliveryFailure::Undecodable(e)) => return Outcome::Paused(e),
                    Err(DeliveryFailure::Subscriber(cause)) => {
                        return Outcome::Dropped(SubscriptionDropped::new(
                            DropReason::SubscriberError,
                            Some(cause),
                        ));
                    }
                },
                SubscriptionMessage::CaughtUp => {
                    info!(projection = self.name(), "projection caught up, now live");
                    self.set_state(SubscriptionState::Subscribed(SubscriptionPhase::Live));
                }
                SubscriptionMessage::Dropped(dropped) => return Outcome::Dropped(dropped),
            }
        }
    }

    /// Apply one event, then advance the checkpoint.
    async fn deliver(&self, recorded: &RecordedEvent) -> Result<(), DeliveryFailure> {
        let handled = self.projection.can_handle(&recorded.event_type);
        if handled {
            match self.projection.handle_recorded(recorded).await {
                Ok(()) => {}
                Err(e @ ProjectionError::Deserialize { .. }) => {
                    return Err(DeliveryFailure::Undecodable(e));
                }
                Err(e @ ProjectionError::Store(_)) => {
                    return Err(DeliveryFailure::Subscriber(e.to_string()));
                }
            }
        }

        if handled || self.config.checkpoint_policy == CheckpointPolicy::EveryEvent {
            self.checkpoints
                .save(self.name(), recorded.position)
                .await
                .map_err(|e| DeliveryFailure::Subscriber(format!("checkpoint write failed: {e}")))?;
            self.status
                .send_modify(|s| s.checkpoint = Some(recorded.position));
        }

        debug!(
            projection = self.name(),
            event_type = %recorded.event_type,
            position = %recorded.position,
            handled,
            "event delivered"
        );
        Ok(())
    }
}
