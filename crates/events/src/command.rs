use carelog_core::AggregateId;

/// A command targets a specific aggregate (command abstraction).
///
/// Commands represent **intent** - a request to perform an action on an aggregate.
/// They are **transient** (never persisted) and are consumed exactly once by the
/// handler registered for their concrete type.
///
/// ## Command vs Event
///
/// - **Command**: Intent to do something (e.g., "Transfer patient to ward 34")
/// - **Event**: Fact that something happened (e.g., "PatientTransferred { ward_number: 34 }")
///
/// Commands are rejected if invalid (validation errors). Events represent accepted changes.
///
/// ## Design Constraints
///
/// Commands must be:
/// - **Cloneable**: callers may re-dispatch after a concurrency conflict
/// - **Send + Sync + 'static**: handlers run on the async runtime
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable, human-readable command name used in logs and errors.
    fn command_type() -> &'static str
    where
        Self: Sized;

    fn target_aggregate_id(&self) -> AggregateId;
}
