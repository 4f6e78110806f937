use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use bunkhouse_core::{AggregateId, ExpectedVersion};
use bunkhouse_events::{Event, RegisteredEvent, SerializationError, deserialize_event, serialize_event};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a version).
///
/// ## Event Lifecycle
///
/// 1. **Domain event**: raised by an aggregate command method
/// 2. **UncommittedEvent**: tag + JSON payload, built with `from_typed()`
/// 3. **StoredEvent**: persisted with its 0-based stream version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Encode a typed domain event.
    pub fn from_typed<E>(event: &E) -> Result<Self, SerializationError>
    where
        E: Event + Serialize,
    {
        let encoded = serialize_event(event)?;
        Ok(Self {
            event_id: event.event_id(),
            event_type: encoded.event_type.to_string(),
            occurred_at: event.occurred_at(),
            payload: encoded.payload,
        })
    }
}

/// A persisted log row.
///
/// Versions are 0-based per aggregate, gap-free and strictly increasing;
/// `(aggregate_id, version)` is unique. `timestamp` is the event's occurred-at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub event_type: String,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: JsonValue,
}

impl StoredEvent {
    /// Decode the payload into the aggregate's closed event enum.
    pub fn decode<E: RegisteredEvent>(&self) -> Result<E, SerializationError> {
        deserialize_event(&self.event_type, &self.payload)
    }
}

/// Latest full-state checkpoint of an aggregate. At most one is kept per aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub version: u64,
    pub data: JsonValue,
    pub timestamp: DateTime<Utc>,
}

/// Event store operation error.
///
/// ## Error Categories
///
/// - **Concurrency**: the expected version was stale; nothing was written
/// - **AggregateTypeMismatch**: the stream belongs to another aggregate type
/// - **Serialization**: a payload could not be encoded/decoded (incl. unknown tags)
/// - **Storage**: the backing store failed; the batch was rolled back
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error(
        "concurrency conflict on aggregate {aggregate_id}: expected version {expected}, but current version is {current}"
    )]
    Concurrency {
        aggregate_id: AggregateId,
        expected: i64,
        current: i64,
    },

    #[error(
        "aggregate type mismatch on {aggregate_id}: stream is '{existing}', attempted append with '{attempted}'"
    )]
    AggregateTypeMismatch {
        aggregate_id: AggregateId,
        existing: String,
        attempted: String,
    },

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EventStoreError {
    pub fn concurrency(aggregate_id: AggregateId, expected: ExpectedVersion, current: Option<u64>) -> Self {
        Self::Concurrency {
            aggregate_id,
            expected: expected.as_i64(),
            current: ExpectedVersion::from_current(current).as_i64(),
        }
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

/// Append-only event store shared by all aggregate types.
///
/// ## Append Semantics
///
/// `save_events()`:
/// - computes the current version of the stream (`None` if it has no events)
/// - fails with `Concurrency` and writes nothing if it differs from `expected_version`
/// - assigns versions sequentially from `expected_version.next_version()`
/// - persists the whole batch atomically (all or nothing)
/// - an empty batch is a no-op
///
/// ## Load Semantics
///
/// `get_events()` returns the events with version strictly greater than `after`
/// (`None` returns the whole stream), in ascending version order.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get_events(
        &self,
        aggregate_id: AggregateId,
        after: Option<u64>,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    async fn save_events(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>, EventStoreError>;

    /// Replace any prior snapshot of the aggregate.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), EventStoreError>;

    /// Distinct ids of every stream of the given aggregate type.
    async fn get_all_aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, EventStoreError>;
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn get_events(
        &self,
        aggregate_id: AggregateId,
        after: Option<u64>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).get_events(aggregate_id, after).await
    }

    async fn save_events(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self)
            .save_events(aggregate_id, aggregate_type, events, expected_version)
            .await
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>, EventStoreError> {
        (**self).get_snapshot(aggregate_id).await
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), EventStoreError> {
        (**self).save_snapshot(snapshot).await
    }

    async fn get_all_aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, EventStoreError> {
        (**self).get_all_aggregate_ids(aggregate_type).await
    }
}
