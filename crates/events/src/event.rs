use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// A domain event emitted by an event-sourced aggregate.
///
/// Events represent facts that happened. They are immutable, append-only, and
/// replayable: state is rebuilt by folding events in stream order.
///
/// The `type` tag stored alongside each event is the only dispatch key used by
/// folds and projections, so it must stay stable for the lifetime of the data.
/// Payload encoding goes through `payload`/`decode` rather than serde's enum
/// representation so the stored object carries the event's fields directly.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event type tag (e.g. `ResourceCreated`).
    fn event_type(&self) -> &'static str;

    /// When the event occurred (business time, wall-clock metadata only).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Serialize this event's fields as the stored payload object.
    fn payload(&self) -> serde_json::Result<JsonValue>;

    /// Decode a stored payload by type tag.
    ///
    /// Returns `None` for unrecognized tags; folds treat those as identity.
    fn decode(event_type: &str, payload: &JsonValue) -> Option<Self>
    where
        Self: Sized;
}
