//! Subscription to the global event log (mechanics only).
//!
//! A subscription delivers every event of the global log from a starting point,
//! first the persisted backlog ("catching up"), then live appends. Delivery is
//! strictly in global order and one message at a time.
//!
//! A subscription can be dropped at any point (server failure, consumer-side
//! failure, disposal). The drop is reported in-band as the last message, so a
//! consumer only ever waits on one thing. After a drop the subscription is dead
//! and a new one must be opened.
//!
//! Delivery is **at-least-once** across subscriptions: a consumer resuming
//! from its checkpoint may see the event at the checkpoint boundary again if it
//! crashed before persisting the checkpoint.

use tokio::sync::mpsc;

use crate::RecordedEvent;

/// Why a subscription stopped delivering events.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The log service failed or the connection was lost.
    ServerError,
    /// The consumer failed while handling an event.
    SubscriberError,
    /// The subscription was closed deliberately.
    Disposed,
}

impl core::fmt::Display for DropReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            DropReason::ServerError => "server_error",
            DropReason::SubscriberError => "subscriber_error",
            DropReason::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

/// Drop notification: a reason and an optional cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionDropped {
    pub reason: DropReason,
    pub cause: Option<String>,
}

impl SubscriptionDropped {
    pub fn new(reason: DropReason, cause: Option<String>) -> Self {
        Self { reason, cause }
    }
}

impl core::fmt::Display for SubscriptionDropped {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{} ({cause})", self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// One item delivered by an [`AllSubscription`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionMessage {
    Event(RecordedEvent),
    /// The backlog has been delivered; what follows is live.
    CaughtUp,
    Dropped(SubscriptionDropped),
}

/// Producer half of a subscription, held by the event log implementation.
///
/// `try_*` methods never wait; on a bounded subscription a full buffer makes
/// them fail. The async methods wait for room, which is how a reader paces
/// itself to the consumer.
#[derive(Debug, Clone)]
pub struct SubscriptionSender {
    tx: Tx,
}

#[derive(Debug, Clone)]
enum Tx {
    Bounded(mpsc::Sender<SubscriptionMessage>),
    Unbounded(mpsc::UnboundedSender<SubscriptionMessage>),
}

#[derive(Debug)]
enum Rx {
    Bounded(mpsc::Receiver<SubscriptionMessage>),
    Unbounded(mpsc::UnboundedReceiver<SubscriptionMessage>),
}

impl SubscriptionSender {
    fn try_send(&self, message: SubscriptionMessage) -> bool {
        match &self.tx {
            Tx::Bounded(tx) => tx.try_send(message).is_ok(),
            Tx::Unbounded(tx) => tx.send(message).is_ok(),
        }
    }

    async fn send(&self, message: SubscriptionMessage) -> bool {
        match &self.tx {
            Tx::Bounded(tx) => tx.send(message).await.is_ok(),
            Tx::Unbounded(tx) => tx.send(message).is_ok(),
        }
    }

    /// Deliver an event without waiting. Returns `false` once the consumer
    /// went away (or, when bounded, the buffer is full).
    pub fn try_send_event(&self, event: RecordedEvent) -> bool {
        self.try_send(SubscriptionMessage::Event(event))
    }

    pub fn try_send_caught_up(&self) -> bool {
        self.try_send(SubscriptionMessage::CaughtUp)
    }

    /// Deliver an event, waiting for buffer room. Returns `false` once the
    /// consumer went away.
    pub async fn send_event(&self, event: RecordedEvent) -> bool {
        self.send(SubscriptionMessage::Event(event)).await
    }

    pub async fn send_caught_up(&self) -> bool {
        self.send(SubscriptionMessage::CaughtUp).await
    }

    /// Report a drop without waiting. The sender is consumed: nothing follows
    /// a drop. If the report does not fit, the consumer sees `Disposed` once
    /// the buffer drains.
    pub fn try_drop_with(self, reason: DropReason, cause: Option<String>) {
        let _ = self.try_send(SubscriptionMessage::Dropped(SubscriptionDropped::new(
            reason, cause,
        )));
    }

    /// Report a drop, waiting for buffer room.
    pub async fn drop_with(self, reason: DropReason, cause: Option<String>) {
        let _ = self
            .send(SubscriptionMessage::Dropped(SubscriptionDropped::new(reason, cause)))
            .await;
    }

    pub fn is_closed(&self) -> bool {
        match &self.tx {
            Tx::Bounded(tx) => tx.is_closed(),
            Tx::Unbounded(tx) => tx.is_closed(),
        }
    }
}

/// Consumer half: an ordered feed of the global log.
///
/// Dropping the value disposes the subscription.
#[derive(Debug)]
pub struct AllSubscription {
    receiver: Rx,
    dropped: Option<SubscriptionDropped>,
}

impl AllSubscription {
    /// Unbounded pair, for producers that must never wait (e.g. under a lock).
    pub fn channel() -> (SubscriptionSender, AllSubscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        Self::pair(Tx::Unbounded(tx), Rx::Unbounded(rx))
    }

    /// Pair buffering at most `capacity` messages (at least one).
    pub fn bounded(capacity: usize) -> (SubscriptionSender, AllSubscription) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self::pair(Tx::Bounded(tx), Rx::Bounded(rx))
    }

    fn pair(tx: Tx, receiver: Rx) -> (SubscriptionSender, AllSubscription) {
        (
            SubscriptionSender { tx },
            AllSubscription {
                receiver,
                dropped: None,
            },
        )
    }

    /// Wait for the next message.
    ///
    /// If every sender disappears without reporting a drop, a `Disposed` drop
    /// is synthesized. Once dropped, every later call returns the same drop.
    pub async fn next(&mut self) -> SubscriptionMessage {
        if let Some(dropped) = &self.dropped {
            return SubscriptionMessage::Dropped(dropped.clone());
        }

        let received = match &mut self.receiver {
            Rx::Bounded(rx) => rx.recv().await,
            Rx::Unbounded(rx) => rx.recv().await,
        };
        let message = received.unwrap_or_else(|| {
            SubscriptionMessage::Dropped(SubscriptionDropped::new(
                DropReason::Disposed,
                Some("event log closed the subscription".to_string()),
            ))
        });

        if let SubscriptionMessage::Dropped(dropped) = &message {
            self.dropped = Some(dropped.clone());
            match &mut self.receiver {
                Rx::Bounded(rx) => rx.close(),
                Rx::Unbounded(rx) => rx.close(),
            }
        }
        message
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.is_some()
    }
}
