//! Event-sourced repository: load by replay, save by append + publish.
//!
//! ```text
//! get_by_id:  get_events(id) → decode each tag → EventSourced::replay
//! save:       encode uncommitted → save_events(expected_version) → mark_committed → publish
//! ```
//!
//! The append is the commit point. Events are only published after it succeeded,
//! and a projection failure reported by the dispatcher never undoes it: the caller
//! gets `RepositoryError::Projection` while the aggregate is already marked committed.

use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use bunkhouse_core::{Aggregate, AggregateId, AggregateRoot, DomainError, EventSourced};
use bunkhouse_events::{RegisteredEvent, SerializationError};

use crate::dispatcher::{DispatchError, EventDispatcher};
use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("aggregate {0} not found")]
    NotFound(AggregateId),

    /// A command was rejected by the aggregate before any event was raised.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("stream {aggregate_id} is corrupt: {reason}")]
    CorruptStream { aggregate_id: AggregateId, reason: String },

    /// The events are durable up to `committed_version`; only the read models lag.
    #[error("events committed up to version {committed_version}, but projection failed: {source}")]
    Projection {
        committed_version: u64,
        #[source]
        source: DispatchError,
    },
}

impl RepositoryError {
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_concurrency_conflict())
    }
}

/// Loads and saves one aggregate type against an event store.
pub struct EventSourcedRepository<A, S> {
    store: S,
    dispatcher: Arc<EventDispatcher>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A, S> EventSourcedRepository<A, S>
where
    A: Aggregate,
    A::Event: RegisteredEvent,
    S: EventStore,
{
    pub fn new(store: S, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            _aggregate: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Rehydrate from the full stream; `None` when the aggregate has no events.
    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE), err)]
    pub async fn get_by_id(&self, id: A::Id) -> Result<Option<EventSourced<A>>, RepositoryError> {
        let aggregate_id: AggregateId = id.into();
        let history = self.store.get_events(aggregate_id, None).await?;
        if history.is_empty() {
            return Ok(None);
        }

        let mut aggregate = EventSourced::<A>::new(id);
        replay_history(&mut aggregate, aggregate_id, &history)?;
        debug!(version = ?aggregate.version(), events = history.len(), "aggregate rehydrated");
        Ok(Some(aggregate))
    }

    /// Like `get_by_id`, but a missing stream is an error.
    pub async fn load(&self, id: A::Id) -> Result<EventSourced<A>, RepositoryError> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(id.into()))
    }

    /// Append the buffered events, then publish them.
    ///
    /// Returns the stored events (empty when nothing was buffered).
    #[instrument(skip(self, aggregate), fields(aggregate_type = A::AGGREGATE_TYPE), err)]
    pub async fn save(&self, aggregate: &mut EventSourced<A>) -> Result<Vec<StoredEvent>, RepositoryError> {
        if aggregate.uncommitted().is_empty() {
            return Ok(Vec::new());
        }

        let events = aggregate
            .uncommitted()
            .iter()
            .map(UncommittedEvent::from_typed)
            .collect::<Result<Vec<_>, _>>()?;

        let stored = self
            .store
            .save_events(aggregate.id().into(), A::AGGREGATE_TYPE, events, aggregate.expected_version())
            .await?;

        let Some(last) = stored.last().map(|e| e.version) else {
            return Ok(stored);
        };
        aggregate.mark_committed(last);

        if let Err(source) = self.dispatcher.publish_all(&stored).await {
            warn!(committed_version = last, error = %source, "events committed; projection failed");
            return Err(RepositoryError::Projection {
                committed_version: last,
                source,
            });
        }
        Ok(stored)
    }
}

impl<A, S> EventSourcedRepository<A, S>
where
    A: Aggregate<Error = DomainError>,
    A::Event: RegisteredEvent,
    S: EventStore,
{
    /// Load (or start) the aggregate, run one command and save the result.
    ///
    /// A concurrency conflict is returned as-is; retrying the whole command is the
    /// caller's decision.
    pub async fn execute(&self, id: A::Id, command: &A::Command) -> Result<EventSourced<A>, RepositoryError> {
        let mut aggregate = self.get_by_id(id).await?.unwrap_or_else(|| EventSourced::new(id));
        aggregate.execute(command)?;
        self.save(&mut aggregate).await?;
        Ok(aggregate)
    }
}

/// Replay a loaded stream, checking that it is contiguous and of the right type.
fn replay_history<A>(
    aggregate: &mut EventSourced<A>,
    aggregate_id: AggregateId,
    history: &[StoredEvent],
) -> Result<(), RepositoryError>
where
    A: Aggregate,
    A::Event: RegisteredEvent,
{
    for (expected, stored) in (0u64..).zip(history) {
        if stored.aggregate_type != A::AGGREGATE_TYPE {
            return Err(RepositoryError::CorruptStream {
                aggregate_id,
                reason: format!(
                    "event {} belongs to '{}', not '{}'",
                    stored.version,
                    stored.aggregate_type,
                    A::AGGREGATE_TYPE
                ),
            });
        }
        if stored.version != expected {
            return Err(RepositoryError::CorruptStream {
                aggregate_id,
                reason: format!("expected version {expected}, found {}", stored.version),
            });
        }
        let event: A::Event = stored.decode()?;
        aggregate.replay(stored.version, &event);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::HandlerRegistry;
    use crate::event_store::InMemoryEventStore;
    use crate::projections::{ProjectionService, SleepingAccommodationReadModel};
    use crate::read_model::{InMemoryReadModelRepository, ReadModelRepository};
    use bunkhouse_accommodations::{
        AccommodationCommand, AccommodationType, CreateAccommodation, SleepingAccommodation, SleepingAccommodationId,
    };
    use bunkhouse_core::ExpectedVersion;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    type Repo = EventSourcedRepository<SleepingAccommodation, Arc<InMemoryEventStore>>;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn create(name: &str) -> AccommodationCommand {
        AccommodationCommand::Create(CreateAccommodation {
            name: name.to_string(),
            accommodation_type: AccommodationType::Tent,
            max_capacity: 3,
            occurred_at: t(0),
        })
    }

    fn repo(store: Arc<InMemoryEventStore>) -> Repo {
        EventSourcedRepository::new(store, Arc::new(EventDispatcher::inline(HandlerRegistry::new())))
    }

    fn new_id() -> SleepingAccommodationId {
        SleepingAccommodationId::new(AggregateId::new())
    }

    #[tokio::test]
    async fn save_then_load_rehydrates_state() {
        let store = Arc::new(InMemoryEventStore::new());
        let repo = repo(store.clone());
        let id = new_id();

        let mut agg = EventSourced::<SleepingAccommodation>::new(id);
        agg.execute(&create("Meadow tent")).unwrap();
        agg.execute(&AccommodationCommand::Deactivate { occurred_at: t(5) }).unwrap();
        let stored = repo.save(&mut agg).await.unwrap();

        assert_eq!(stored.iter().map(|e| e.version).collect::<Vec<_>>(), vec![0, 1]);
        assert!(agg.uncommitted().is_empty());
        assert_eq!(agg.version(), Some(1));

        let loaded = repo.load(id).await.unwrap();
        assert_eq!(loaded.version(), Some(1));
        assert_eq!(loaded.name(), "Meadow tent");
        assert!(!loaded.is_active());
        assert_eq!(loaded.changed_at(), Some(t(5)));
    }

    #[tokio::test]
    async fn missing_stream_is_none() {
        let repo = repo(Arc::new(InMemoryEventStore::new()));
        let id = new_id();
        assert!(repo.get_by_id(id).await.unwrap().is_none());
        assert!(matches!(repo.load(id).await, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn saving_nothing_is_a_no_op() {
        let store = Arc::new(InMemoryEventStore::new());
        let repo = repo(store.clone());
        let mut agg = EventSourced::<SleepingAccommodation>::new(new_id());
        assert!(repo.save(&mut agg).await.unwrap().is_empty());
        assert_eq!(store.total_events().unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_aggregate_conflicts_and_keeps_its_buffer() {
        let store = Arc::new(InMemoryEventStore::new());
        let repo = repo(store.clone());
        let id = new_id();
        repo.execute(id, &create("Loft")).await.unwrap();

        let mut first = repo.load(id).await.unwrap();
        let mut second = repo.load(id).await.unwrap();
        first.execute(&AccommodationCommand::Deactivate { occurred_at: t(1) }).unwrap();
        second.execute(&AccommodationCommand::Deactivate { occurred_at: t(2) }).unwrap();

        repo.save(&mut first).await.unwrap();
        let err = repo.save(&mut second).await.unwrap_err();

        assert!(err.is_concurrency_conflict(), "got {err:?}");
        assert_eq!(second.uncommitted().len(), 1);
        assert_eq!(store.get_events(id.into(), None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn domain_errors_surface_before_anything_is_written() {
        let store = Arc::new(InMemoryEventStore::new());
        let repo = repo(store.clone());
        let err = repo
            .execute(new_id(), &AccommodationCommand::Deactivate { occurred_at: t(0) })
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Domain(DomainError::NotFound)));
        assert_eq!(store.total_events().unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_tag_in_history_is_fatal() {
        let store = Arc::new(InMemoryEventStore::new());
        let repo = repo(store.clone());
        let id = new_id();
        store
            .save_events(
                id.into(),
                SleepingAccommodation::AGGREGATE_TYPE,
                vec![UncommittedEvent {
                    event_id: Uuid::now_v7(),
                    event_type: "SleepingAccommodationRenamed".to_string(),
                    occurred_at: t(0),
                    payload: json!({}),
                }],
                ExpectedVersion::NoStream,
            )
            .await
            .unwrap();

        let err = repo.get_by_id(id).await.unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Serialization(SerializationError::UnknownEventType(ref tag)) if tag == "SleepingAccommodationRenamed"
        ));
    }

    #[tokio::test]
    async fn inline_projection_runs_on_save() {
        let store = Arc::new(InMemoryEventStore::new());
        let projection: Arc<ProjectionService<SleepingAccommodationReadModel, _, _>> = Arc::new(ProjectionService::new(
            store.clone(),
            InMemoryReadModelRepository::new(),
        ));
        let mut registry = HandlerRegistry::new();
        registry.register_projection(projection.clone());
        let repo: Repo = EventSourcedRepository::new(store, Arc::new(EventDispatcher::inline(registry)));

        let id = new_id();
        repo.execute(id, &create("Bunk room")).await.unwrap();

        let rm = projection.read_models().get(id.into()).await.unwrap().unwrap();
        assert_eq!(rm.name, "Bunk room");
        assert_eq!(rm.last_event_version, Some(0));
    }
}
