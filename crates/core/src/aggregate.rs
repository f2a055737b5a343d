//! Aggregate traits and the pending-event tracker used by repositories.

use crate::id::AggregateId;

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Number of events applied to this instance so far.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for a stream append.
///
/// Stream versions count appended events: `0` means the stream does not exist.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking.
    Any,
    /// The stream must not exist yet (first save of a new aggregate).
    NoStream,
    /// Require the stream to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => actual == 0,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` returns events.
/// - **State mutation**: `apply(&mut self, event)` evolves state.
///
/// Aggregates must not perform IO or side effects. They should only return events
/// describing what happened.
pub trait Aggregate: AggregateRoot + Sized {
    type Command: core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Stable stream prefix for this aggregate type (e.g. `"encounter"`).
    fn aggregate_type() -> &'static str;

    /// Fresh, not-yet-created instance used as the seed of the history fold.
    fn empty(id: AggregateId) -> Self;

    /// Evolve in-memory state from a single event.
    ///
    /// Implementations should keep `version()` consistent (+1 per applied event).
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    ///
    /// This must not mutate state. State evolution is done through `apply`.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

/// An aggregate together with its persistence bookkeeping.
///
/// Tracks the stream version observed when the aggregate was loaded and the
/// events raised since then that have not been appended yet. Instances are
/// short-lived: loaded (or created) for one command and dropped afterwards.
#[derive(Debug, Clone)]
pub struct EventSourced<A: Aggregate> {
    id: AggregateId,
    aggregate: A,
    persisted_version: u64,
    pending: Vec<A::Event>,
}

impl<A: Aggregate> EventSourced<A> {
    /// A brand new aggregate whose stream does not exist yet.
    pub fn new(id: AggregateId) -> Self {
        Self {
            id,
            aggregate: A::empty(id),
            persisted_version: 0,
            pending: Vec::new(),
        }
    }

    /// Rebuild an aggregate by folding its history in stream order.
    pub fn rehydrate(id: AggregateId, history: impl IntoIterator<Item = A::Event>) -> Self {
        let mut aggregate = A::empty(id);
        let mut version = 0u64;
        for event in history {
            aggregate.apply(&event);
            version += 1;
        }
        Self {
            id,
            aggregate,
            persisted_version: version,
            pending: Vec::new(),
        }
    }

    /// Run a command: decide, then apply and record every resulting event.
    ///
    /// On error nothing is applied or recorded.
    pub fn execute(&mut self, command: &A::Command) -> Result<&[A::Event], A::Error> {
        let decided = self.aggregate.handle(command)?;
        let start = self.pending.len();
        for event in decided {
            self.raise(event);
        }
        Ok(&self.pending[start..])
    }

    /// Apply an event and queue it for the next save.
    pub fn raise(&mut self, event: A::Event) {
        self.aggregate.apply(&event);
        self.pending.push(event);
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub fn state(&self) -> &A {
        &self.aggregate
    }

    pub fn pending(&self) -> &[A::Event] {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Stream version observed at load time (or after the last successful save).
    pub fn persisted_version(&self) -> u64 {
        self.persisted_version
    }

    /// Concurrency expectation for appending the pending events.
    pub fn expected_version(&self) -> ExpectedVersion {
        if self.persisted_version == 0 {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(self.persisted_version)
        }
    }

    /// Record a successful append: pending events are now part of the stream.
    pub fn mark_committed(&mut self, new_version: u64) {
        self.pending.clear();
        self.persisted_version = new_version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainError;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Tally {
        id: AggregateId,
        total: i64,
        version: u64,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TallyEvent {
        Added(i64),
    }

    impl AggregateRoot for Tally {
        type Id = AggregateId;

        fn id(&self) -> &Self::Id {
            &self.id
        }

        fn version(&self) -> u64 {
            self.version
        }
    }

    impl Aggregate for Tally {
        type Command = i64;
        type Event = TallyEvent;
        type Error = DomainError;

        fn aggregate_type() -> &'static str {
            "tally"
        }

        fn empty(id: AggregateId) -> Self {
            Self {
                id,
                total: 0,
                version: 0,
            }
        }

        fn apply(&mut self, event: &Self::Event) {
            let TallyEvent::Added(n) = event;
            self.total += n;
            self.version += 1;
        }

        fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
            if *command == 0 {
                return Err(DomainError::validation("amount cannot be zero"));
            }
            Ok(vec![TallyEvent::Added(*command)])
        }
    }

    #[test]
    fn expected_version_semantics() {
        assert!(ExpectedVersion::Any.matches(7));
        assert!(ExpectedVersion::NoStream.matches(0));
        assert!(!ExpectedVersion::NoStream.matches(1));
        assert!(ExpectedVersion::Exact(3).matches(3));
        assert!(!ExpectedVersion::Exact(3).matches(4));
    }

    #[test]
    fn new_aggregate_expects_no_stream() {
        let agg: EventSourced<Tally> = EventSourced::new(AggregateId::new());
        assert_eq!(agg.expected_version(), ExpectedVersion::NoStream);
        assert!(!agg.has_pending());
    }

    #[test]
    fn execute_records_pending_and_mark_committed_clears_them() {
        let mut agg: EventSourced<Tally> =
            EventSourced::rehydrate(AggregateId::new(), vec![TallyEvent::Added(2)]);
        assert_eq!(agg.expected_version(), ExpectedVersion::Exact(1));

        agg.execute(&5).unwrap();
        assert_eq!(agg.pending(), &[TallyEvent::Added(5)]);
        assert_eq!(agg.state().total, 7);

        agg.mark_committed(2);
        assert!(agg.pending().is_empty());
        assert_eq!(agg.expected_version(), ExpectedVersion::Exact(2));
    }

    #[test]
    fn rejected_command_leaves_state_untouched() {
        let mut agg: EventSourced<Tally> = EventSourced::new(AggregateId::new());
        assert!(agg.execute(&0).is_err());
        assert!(agg.pending().is_empty());
        assert_eq!(agg.state().version, 0);
    }

    proptest! {
        /// Executing commands one by one yields the same state as folding the
        /// produced events from scratch.
        #[test]
        fn rehydrated_state_equals_incremental_state(
            amounts in prop::collection::vec(1i64..1_000, 0..32)
        ) {
            let id = AggregateId::new();
            let mut live: EventSourced<Tally> = EventSourced::new(id);
            for amount in &amounts {
                live.execute(amount).unwrap();
            }

            let history = live.pending().to_vec();
            let rebuilt: EventSourced<Tally> = EventSourced::rehydrate(id, history);

            prop_assert_eq!(rebuilt.state(), live.state());
            prop_assert_eq!(rebuilt.persisted_version(), amounts.len() as u64);
        }
    }
}
