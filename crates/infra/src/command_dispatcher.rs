//! Command routing (application-level orchestration).
//!
//! Every command type has exactly one handler. Handlers are registered once at
//! startup on a [`CommandHandlerMapBuilder`]; `build()` freezes the table and
//! the resulting [`Dispatcher`] is shared (cheaply cloned) by every caller.
//!
//! ## Handler Shape
//!
//! A handler is an async function `(C, CancellationToken) -> Result<(), DispatchError>`.
//! The usual body is:
//!
//! ```text
//! Command
//!   ↓
//! 1. Repository::get (or EventSourced::new for a creating command)
//!   ↓
//! 2. Domain operation (pure; raises events or fails with DomainError)
//!   ↓
//! 3. Repository::save (append-only, optimistic concurrency check)
//! ```
//!
//! The dispatcher itself does no retrying and no queueing: a handler's
//! outcome is returned to the caller unchanged.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use carelog_core::DomainError;
use carelog_events::Command;

use crate::repository::RepositoryError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The targeted aggregate does not exist (or no longer accepts commands).
    #[error("not found: {0}")]
    NotFound(String),
    /// Optimistic concurrency failure (e.g. stale aggregate version).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    /// No handler is registered for the command type.
    #[error("no handler registered for command '{command_type}'")]
    UnregisteredCommand { command_type: &'static str },
    /// A second handler was registered for the same command type.
    #[error("a handler for command '{command_type}' is already registered")]
    DuplicateHandler { command_type: &'static str },
    /// Domain validation failure (deterministic).
    #[error("validation failed: {0}")]
    Validation(String),
    /// Domain invariant failure (deterministic).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// Failed to deserialize historical event payloads into the aggregate event type.
    #[error("failed to deserialize history: {0}")]
    Deserialize(String),
    /// The event store failed.
    #[error("event store failure: {0}")]
    Store(String),
    /// The cancellation token was cancelled before any event was appended.
    #[error("command cancelled before it was handled")]
    Cancelled,
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::NotFound => DispatchError::NotFound("aggregate not found".to_string()),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

impl From<RepositoryError> for DispatchError {
    fn from(value: RepositoryError) -> Self {
        match value {
            e @ RepositoryError::NotFound { .. } => DispatchError::NotFound(e.to_string()),
            e @ RepositoryError::Concurrency { .. } => DispatchError::Concurrency(e.to_string()),
            e @ RepositoryError::Deserialize { .. } => DispatchError::Deserialize(e.to_string()),
            RepositoryError::Store(e) => DispatchError::Store(e.to_string()),
        }
    }
}

pub type HandlerFuture = BoxFuture<'static, Result<(), DispatchError>>;

type ErasedHandler =
    Arc<dyn Fn(Box<dyn Any + Send>, CancellationToken) -> HandlerFuture + Send + Sync>;

struct Registration {
    command_type: &'static str,
    handler: ErasedHandler,
}

/// Startup-time registration of command handlers.
#[derive(Default)]
pub struct CommandHandlerMapBuilder {
    handlers: HashMap<TypeId, Registration>,
}

impl CommandHandlerMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for command type `C`.
    ///
    /// Fails with `DuplicateHandler` if `C` already has one.
    pub fn register<C, F, Fut>(mut self, handler: F) -> Result<Self, DispatchError>
    where
        C: Command,
        F: Fn(C, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DispatchError>> + Send + 'static,
    {
        let key = TypeId::of::<C>();
        if self.handlers.contains_key(&key) {
            return Err(DispatchError::DuplicateHandler {
                command_type: C::command_type(),
            });
        }

        let erased: ErasedHandler = Arc::new(
            move |command: Box<dyn Any + Send>, ct: CancellationToken| -> HandlerFuture {
                match command.downcast::<C>() {
                    Ok(command) => Box::pin(handler(*command, ct)),
                    Err(_) => Box::pin(async {
                        Err(DispatchError::UnregisteredCommand {
                            command_type: C::command_type(),
                        })
                    }),
                }
            },
        );

        self.handlers.insert(
            key,
            Registration {
                command_type: C::command_type(),
                handler: erased,
            },
        );
        Ok(self)
    }

    pub fn build(self) -> CommandHandlerMap {
        CommandHandlerMap {
            handlers: self.handlers,
        }
    }
}

/// Frozen command type → handler table.
pub struct CommandHandlerMap {
    handlers: HashMap<TypeId, Registration>,
}

impl CommandHandlerMap {
    pub fn builder() -> CommandHandlerMapBuilder {
        CommandHandlerMapBuilder::new()
    }

    /// Names of the registered command types, sorted.
    pub fn command_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.values().map(|r| r.command_type).collect();
        names.sort_unstable();
        names
    }
}

/// Routes each command to its single registered handler.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<CommandHandlerMap>,
}

impl Dispatcher {
    pub fn new(handlers: CommandHandlerMap) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }

    pub fn handlers(&self) -> &CommandHandlerMap {
        &self.handlers
    }

    pub async fn dispatch<C: Command>(
        &self,
        command: C,
        ct: CancellationToken,
    ) -> Result<(), DispatchError> {
        let Some(registration) = self.handlers.handlers.get(&TypeId::of::<C>()) else {
            return Err(DispatchError::UnregisteredCommand {
                command_type: C::command_type(),
            });
        };
        if ct.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        debug!(
            command_type = registration.command_type,
            aggregate_id = %command.target_aggregate_id(),
            "dispatching command"
        );
        (registration.handler)(Box::new(command), ct).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelog_core::AggregateId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    struct Ping(AggregateId);

    impl Command for Ping {
        fn command_type() -> &'static str {
            "test.ping"
        }

        fn target_aggregate_id(&self) -> AggregateId {
            self.0
        }
    }

    #[derive(Debug, Clone)]
    struct Pong(AggregateId);

    impl Command for Pong {
        fn command_type() -> &'static str {
            "test.pong"
        }

        fn target_aggregate_id(&self) -> AggregateId {
            self.0
        }
    }

    fn counting_dispatcher(pings: Arc<AtomicUsize>, pongs: Arc<AtomicUsize>) -> Dispatcher {
        let map = CommandHandlerMap::builder()
            .register(move |_: Ping, _| {
                let pings = Arc::clone(&pings);
                async move {
                    pings.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap()
            .register(move |_: Pong, _| {
                let pongs = Arc::clone(&pongs);
                async move {
                    pongs.fetch_add(1, Ordering::SeqCst);
                    Err(DispatchError::Validation("pong refused".to_string()))
                }
            })
            .unwrap()
            .build();
        Dispatcher::new(map)
    }

    #[tokio::test]
    async fn routes_each_command_to_exactly_its_handler() {
        let pings = Arc::new(AtomicUsize::new(0));
        let pongs = Arc::new(AtomicUsize::new(0));
        let dispatcher = counting_dispatcher(Arc::clone(&pings), Arc::clone(&pongs));

        dispatcher
            .dispatch(Ping(AggregateId::new()), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(pings.load(Ordering::SeqCst), 1);
        assert_eq!(pongs.load(Ordering::SeqCst), 0);

        let err = dispatcher
            .dispatch(Pong(AggregateId::new()), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::Validation("pong refused".to_string()));
        assert_eq!(pings.load(Ordering::SeqCst), 1);
        assert_eq!(pongs.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.handlers().command_types(), vec!["test.ping", "test.pong"]);
    }

    #[tokio::test]
    async fn unregistered_command_is_rejected() {
        let pings = Arc::new(AtomicUsize::new(0));
        let map = CommandHandlerMap::builder()
            .register({
                let pings = Arc::clone(&pings);
                move |_: Ping, _| {
                    let pings = Arc::clone(&pings);
                    async move {
                        pings.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }
            })
            .unwrap()
            .build();
        let dispatcher = Dispatcher::new(map);

        let err = dispatcher
            .dispatch(Pong(AggregateId::new()), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::UnregisteredCommand {
                command_type: "test.pong"
            }
        );
        assert_eq!(pings.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn duplicate_registration_is_a_configuration_error() {
        let result = CommandHandlerMap::builder()
            .register(|_: Ping, _| async { Ok(()) })
            .unwrap()
            .register(|_: Ping, _| async { Ok(()) });

        assert!(matches!(
            result,
            Err(DispatchError::DuplicateHandler {
                command_type: "test.ping"
            })
        ));
    }

    #[tokio::test]
    async fn cancelled_token_refuses_the_command() {
        let pings = Arc::new(AtomicUsize::new(0));
        let dispatcher = counting_dispatcher(Arc::clone(&pings), Arc::new(AtomicUsize::new(0)));

        let ct = CancellationToken::new();
        ct.cancel();
        let err = dispatcher.dispatch(Ping(AggregateId::new()), ct).await.unwrap_err();
        assert_eq!(err, DispatchError::Cancelled);
        assert_eq!(pings.load(Ordering::SeqCst), 0);
    }
}
