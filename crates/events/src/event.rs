use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A domain event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - created only by aggregate command methods
/// - identified by a stable tag (e.g. "BookingCreated") stored beside the payload
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event tag.
    fn event_type(&self) -> &'static str;

    /// Unique id of this event occurrence.
    fn event_id(&self) -> Uuid;

    /// When the event occurred (business time, UTC).
    fn occurred_at(&self) -> DateTime<Utc>;
}
