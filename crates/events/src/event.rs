use chrono::{DateTime, Utc};

/// A typed domain event, as raised by an aggregate.
///
/// The three accessors become the stored metadata of each appended event
/// (`event_type`, `event_version`, `occurred_at` columns); the event itself
/// is stored as the JSON payload.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name projections filter on, e.g. `"patient.admitted"`.
    fn event_type(&self) -> &'static str;

    /// Payload schema version of this event type.
    fn version(&self) -> u32;

    /// Business time; the log's global position carries the recording order.
    fn occurred_at(&self) -> DateTime<Utc>;
}
