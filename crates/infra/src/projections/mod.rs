//! Projection engine (read model builders).
//!
//! Each read model declares one applier per event tag. A projection run loads the
//! events after the read model's `last_event_version`, applies them in version
//! order on a working copy and persists the copy only when every event applied.
//! A missing applier, an undecodable payload or a failing applier aborts the run
//! and leaves the stored read model at its last consistent version.

pub mod accommodations;
pub mod bookings;

use std::marker::PhantomData;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

use bunkhouse_core::AggregateId;
use bunkhouse_events::{RegisteredEvent, SerializationError};

use crate::dispatcher::EventHandler;
use crate::event_store::{EventStore, EventStoreError, StoredEvent};
use crate::read_model::{ReadModel, ReadModelError, ReadModelRepository};

pub use accommodations::SleepingAccommodationReadModel;
pub use bookings::BookingReadModel;

/// A pure state transition for one event tag.
pub struct EventApplier<M, E> {
    pub event_type: &'static str,
    pub apply: fn(&mut M, &E) -> Result<(), String>,
}

impl<M, E> EventApplier<M, E> {
    pub const fn new(event_type: &'static str, apply: fn(&mut M, &E) -> Result<(), String>) -> Self {
        Self { event_type, apply }
    }
}

/// A read model built from one aggregate type's events.
pub trait ProjectedReadModel: ReadModel {
    type Event: RegisteredEvent;

    /// Used in logs and error messages.
    const NAME: &'static str;
    const AGGREGATE_TYPE: &'static str;
    const APPLIERS: &'static [EventApplier<Self, Self::Event>];

    /// Blank row for a stream that has not been projected yet.
    fn empty(id: AggregateId) -> Self;

    fn handled_event_types() -> impl Iterator<Item = &'static str> {
        Self::APPLIERS.iter().map(|a| a.event_type)
    }
}

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("no applier for event type '{event_type}' in {read_model}")]
    MissingApplier {
        read_model: &'static str,
        event_type: String,
    },

    #[error("failed to apply {event_type} (version {version}) to {aggregate_id}: {reason}")]
    Apply {
        aggregate_id: AggregateId,
        event_type: String,
        version: u64,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    ReadModel(#[from] ReadModelError),
}

/// Apply stored events in order, advancing `last_event_version` after each one.
pub fn apply_events<M: ProjectedReadModel>(model: &mut M, events: &[StoredEvent]) -> Result<(), ProjectionError> {
    for stored in events {
        let event: M::Event = stored.decode()?;

        let applier = M::APPLIERS
            .iter()
            .find(|a| a.event_type == stored.event_type)
            .ok_or_else(|| ProjectionError::MissingApplier {
                read_model: M::NAME,
                event_type: stored.event_type.clone(),
            })?;

        (applier.apply)(model, &event).map_err(|reason| ProjectionError::Apply {
            aggregate_id: stored.aggregate_id,
            event_type: stored.event_type.clone(),
            version: stored.version,
            reason,
        })?;
        model.set_last_event_version(stored.version);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildFailure {
    pub aggregate_id: AggregateId,
    pub error: String,
}

/// Outcome of `rebuild_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    pub rebuilt: usize,
    pub failures: Vec<RebuildFailure>,
}

impl RebuildSummary {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Maintains one read model type from the event log.
///
/// Runs are serialized per service, so two catch-ups for the same aggregate never
/// interleave their read-modify-write of the row.
pub struct ProjectionService<M, S, R> {
    store: S,
    read_models: R,
    guard: Mutex<()>,
    _model: PhantomData<fn() -> M>,
}

impl<M, S, R> ProjectionService<M, S, R>
where
    M: ProjectedReadModel,
    S: EventStore,
    R: ReadModelRepository<M>,
{
    pub fn new(store: S, read_models: R) -> Self {
        Self {
            store,
            read_models,
            guard: Mutex::new(()),
            _model: PhantomData,
        }
    }

    pub fn read_models(&self) -> &R {
        &self.read_models
    }

    /// Incremental catch-up from the stored read model's `last_event_version`.
    ///
    /// Returns the number of events applied.
    #[instrument(skip(self), fields(read_model = M::NAME), err)]
    pub async fn project(&self, aggregate_id: AggregateId) -> Result<usize, ProjectionError> {
        let _guard = self.guard.lock().await;
        let current = self.read_models.get(aggregate_id).await?;
        let after = current.as_ref().and_then(ReadModel::last_event_version);
        self.catch_up(aggregate_id, current, after).await
    }

    /// Apply the events after `from_version` on top of the current (or a fresh) read model.
    ///
    /// Events the read model has already applied are never applied twice.
    #[instrument(skip(self), fields(read_model = M::NAME), err)]
    pub async fn replay_from(
        &self,
        aggregate_id: AggregateId,
        from_version: Option<u64>,
    ) -> Result<usize, ProjectionError> {
        let _guard = self.guard.lock().await;
        let current = self.read_models.get(aggregate_id).await?;
        let after = current
            .as_ref()
            .and_then(ReadModel::last_event_version)
            .max(from_version);
        self.catch_up(aggregate_id, current, after).await
    }

    /// Replay the full history into a fresh read model and replace the stored one.
    ///
    /// The stored row is untouched if the replay fails; a stream without events
    /// removes the row.
    #[instrument(skip(self), fields(read_model = M::NAME), err)]
    pub async fn rebuild(&self, aggregate_id: AggregateId) -> Result<usize, ProjectionError> {
        let _guard = self.guard.lock().await;
        let events = self.store.get_events(aggregate_id, None).await?;

        if events.is_empty() {
            let removed = self.read_models.delete(aggregate_id).await?;
            debug!(%aggregate_id, removed, "no events to rebuild from");
            return Ok(0);
        }

        let mut model = M::empty(aggregate_id);
        apply_events(&mut model, &events)?;
        self.read_models.upsert(model).await?;

        info!(%aggregate_id, event_count = events.len(), "read model rebuilt");
        Ok(events.len())
    }

    /// Rebuild every stream of the aggregate type, continuing past individual failures.
    #[instrument(skip(self), fields(read_model = M::NAME), err)]
    pub async fn rebuild_all(&self) -> Result<RebuildSummary, ProjectionError> {
        let ids = self.store.get_all_aggregate_ids(M::AGGREGATE_TYPE).await?;
        let mut summary = RebuildSummary::default();

        for aggregate_id in ids {
            match self.rebuild(aggregate_id).await {
                Ok(_) => summary.rebuilt += 1,
                Err(err) => {
                    error!(%aggregate_id, error = %err, "read model rebuild failed");
                    summary.failures.push(RebuildFailure {
                        aggregate_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            rebuilt = summary.rebuilt,
            failed = summary.failures.len(),
            "read model rebuild finished"
        );
        Ok(summary)
    }

    async fn catch_up(
        &self,
        aggregate_id: AggregateId,
        current: Option<M>,
        after: Option<u64>,
    ) -> Result<usize, ProjectionError> {
        let events = self.store.get_events(aggregate_id, after).await?;
        if events.is_empty() {
            debug!(%aggregate_id, ?after, "read model up to date");
            return Ok(0);
        }

        let mut model = current.unwrap_or_else(|| M::empty(aggregate_id));
        apply_events(&mut model, &events)?;
        self.read_models.upsert(model).await?;

        debug!(%aggregate_id, event_count = events.len(), "read model projected");
        Ok(events.len())
    }
}

#[async_trait]
impl<M, S, R> EventHandler for ProjectionService<M, S, R>
where
    M: ProjectedReadModel,
    S: EventStore,
    R: ReadModelRepository<M>,
{
    fn name(&self) -> &str {
        M::NAME
    }

    async fn handle(&self, event: &StoredEvent) -> Result<(), ProjectionError> {
        // Catches up the whole stream, not only this event.
        self.project(event.aggregate_id).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{InMemoryEventStore, UncommittedEvent};
    use crate::read_model::InMemoryReadModelRepository;
    use bunkhouse_accommodations::{
        AccommodationEvent, AccommodationType, SleepingAccommodationCreated, SleepingAccommodationDeactivated,
        SleepingAccommodationId,
    };
    use bunkhouse_core::ExpectedVersion;
    use chrono::Utc;
    use std::sync::Arc;
    use uuid::Uuid;

    /// Knows only how to apply creations.
    #[derive(Debug, Clone, PartialEq)]
    struct NameOnly {
        id: AggregateId,
        name: String,
        last: Option<u64>,
    }

    impl ReadModel for NameOnly {
        fn id(&self) -> AggregateId {
            self.id
        }

        fn last_event_version(&self) -> Option<u64> {
            self.last
        }

        fn set_last_event_version(&mut self, version: u64) {
            self.last = Some(version);
        }
    }

    fn apply_created(model: &mut NameOnly, event: &AccommodationEvent) -> Result<(), String> {
        match event {
            AccommodationEvent::Created(e) => {
                model.name = e.name.clone();
                Ok(())
            }
            other => Err(format!("unexpected {other:?}")),
        }
    }

    impl ProjectedReadModel for NameOnly {
        type Event = AccommodationEvent;

        const NAME: &'static str = "NameOnly";
        const AGGREGATE_TYPE: &'static str = "SleepingAccommodationAggregate";
        const APPLIERS: &'static [EventApplier<Self, Self::Event>] =
            &[EventApplier::new(SleepingAccommodationCreated::EVENT_TYPE, apply_created)];

        fn empty(id: AggregateId) -> Self {
            Self {
                id,
                name: String::new(),
                last: None,
            }
        }
    }

    fn created(id: AggregateId, name: &str) -> UncommittedEvent {
        UncommittedEvent::from_typed(&AccommodationEvent::Created(SleepingAccommodationCreated {
            event_id: Uuid::now_v7(),
            occurred_at: Utc::now(),
            sleeping_accommodation_id: SleepingAccommodationId::new(id),
            name: name.to_string(),
            accommodation_type: AccommodationType::Tent,
            max_capacity: 2,
            is_active: true,
        }))
        .unwrap()
    }

    fn deactivated(id: AggregateId) -> UncommittedEvent {
        UncommittedEvent::from_typed(&AccommodationEvent::Deactivated(SleepingAccommodationDeactivated {
            event_id: Uuid::now_v7(),
            occurred_at: Utc::now(),
            sleeping_accommodation_id: SleepingAccommodationId::new(id),
        }))
        .unwrap()
    }

    fn service(
        store: Arc<InMemoryEventStore>,
    ) -> ProjectionService<NameOnly, Arc<InMemoryEventStore>, InMemoryReadModelRepository<NameOnly>> {
        ProjectionService::new(store, InMemoryReadModelRepository::new())
    }

    #[tokio::test]
    async fn missing_applier_aborts_without_persisting_partial_progress() {
        let store = Arc::new(InMemoryEventStore::new());
        let projection = service(store.clone());
        let id = AggregateId::new();

        store
            .save_events(id, "SleepingAccommodationAggregate", vec![created(id, "Loft")], ExpectedVersion::NoStream)
            .await
            .unwrap();
        assert_eq!(projection.project(id).await.unwrap(), 1);

        store
            .save_events(
                id,
                "SleepingAccommodationAggregate",
                vec![created(id, "Ignored"), deactivated(id)],
                ExpectedVersion::Exact(0),
            )
            .await
            .unwrap();

        let err = projection.project(id).await.unwrap_err();
        assert!(matches!(err, ProjectionError::MissingApplier { .. }), "got {err:?}");

        let stored = projection.read_models().get(id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Loft");
        assert_eq!(stored.last, Some(0));
    }

    #[tokio::test]
    async fn unknown_tag_is_a_serialization_failure() {
        let store = Arc::new(InMemoryEventStore::new());
        let projection = service(store.clone());
        let id = AggregateId::new();

        let mut bogus = created(id, "Loft");
        bogus.event_type = "SleepingAccommodationRenamed".to_string();
        store
            .save_events(id, "SleepingAccommodationAggregate", vec![bogus], ExpectedVersion::NoStream)
            .await
            .unwrap();

        let err = projection.project(id).await.unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::Serialization(SerializationError::UnknownEventType(_))
        ));
        assert!(projection.read_models().get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_the_stored_row() {
        let store = Arc::new(InMemoryEventStore::new());
        let projection = service(store.clone());
        let id = AggregateId::new();

        store
            .save_events(id, "SleepingAccommodationAggregate", vec![created(id, "Loft")], ExpectedVersion::NoStream)
            .await
            .unwrap();
        projection.project(id).await.unwrap();
        store
            .save_events(id, "SleepingAccommodationAggregate", vec![deactivated(id)], ExpectedVersion::Exact(0))
            .await
            .unwrap();

        assert!(projection.rebuild(id).await.is_err());
        let summary = projection.rebuild_all().await.unwrap();
        assert_eq!(summary.rebuilt, 0);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].aggregate_id, id);

        let stored = projection.read_models().get(id).await.unwrap().unwrap();
        assert_eq!(stored.last, Some(0));
    }

    #[test]
    fn handled_event_types_lists_every_applier() {
        let tags: Vec<_> = NameOnly::handled_event_types().collect();
        assert_eq!(tags, vec![SleepingAccommodationCreated::EVENT_TYPE]);
    }
}
