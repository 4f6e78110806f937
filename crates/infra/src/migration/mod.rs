//! One-shot migration of legacy sleeping accommodation rows into event streams.
//!
//! Each legacy row becomes a stream of synthesized events: `Created` at the row's
//! creation time and, for a row that was deactivated later, `Deactivated` at its
//! modification time. The events are raised through the aggregate's own command
//! methods so they carry the same shape as live events. The read model is then
//! written straight from the row's final values, with `last_event_version` set to
//! the synthesized event count minus one.
//!
//! The whole run commits or rolls back as one unit. A row whose stream already
//! exists fails the run with a concurrency conflict; re-running is safe because
//! `migrate` re-checks `is_migration_required` first.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use bunkhouse_accommodations::{
    AccommodationCommand, AccommodationType, CreateAccommodation, SleepingAccommodation, SleepingAccommodationId,
};
use bunkhouse_core::{AggregateId, AggregateRoot, DomainError, EventSourced};
use bunkhouse_events::SerializationError;

use crate::event_store::{EventStoreError, UncommittedEvent};
use crate::projections::SleepingAccommodationReadModel;
use crate::read_model::ReadModelError;

pub use in_memory::InMemoryMigrationStore;
pub use postgres::PostgresMigrationStore;

/// A row of the pre-event-sourcing `sleeping_accommodations` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyAccommodation {
    pub id: SleepingAccommodationId,
    pub name: String,
    #[serde(rename = "type")]
    pub accommodation_type: AccommodationType,
    pub max_capacity: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub changed_at: Option<DateTime<Utc>>,
}

/// Everything written for one legacy row.
#[derive(Debug, Clone, PartialEq)]
pub struct MigratedAccommodation {
    pub aggregate_id: AggregateId,
    pub events: Vec<UncommittedEvent>,
    pub read_model: SleepingAccommodationReadModel,
}

impl LegacyAccommodation {
    /// Synthesize the stream and read model for this row.
    pub fn to_migrated(&self) -> Result<MigratedAccommodation, MigrationError> {
        let invalid = |source| MigrationError::InvalidLegacyRow { id: self.id, source };

        let mut aggregate = EventSourced::<SleepingAccommodation>::new(self.id);
        aggregate
            .execute(&AccommodationCommand::Create(CreateAccommodation {
                name: self.name.clone(),
                accommodation_type: self.accommodation_type,
                max_capacity: self.max_capacity,
                occurred_at: self.created_at,
            }))
            .map_err(invalid)?;

        if let (false, Some(changed_at)) = (self.is_active, self.changed_at) {
            aggregate
                .execute(&AccommodationCommand::Deactivate { occurred_at: changed_at })
                .map_err(invalid)?;
        }

        let events = aggregate
            .uncommitted()
            .iter()
            .map(UncommittedEvent::from_typed)
            .collect::<Result<Vec<_>, _>>()?;

        let read_model = SleepingAccommodationReadModel {
            id: self.id,
            name: self.name.clone(),
            accommodation_type: self.accommodation_type,
            max_capacity: self.max_capacity,
            is_active: self.is_active,
            created_at: self.created_at,
            changed_at: self.changed_at,
            last_event_version: (events.len() as u64).checked_sub(1),
        };

        Ok(MigratedAccommodation {
            aggregate_id: self.id.into(),
            events,
            read_model,
        })
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("legacy accommodation {id} cannot be migrated: {source}")]
    InvalidLegacyRow {
        id: SleepingAccommodationId,
        #[source]
        source: DomainError,
    },

    #[error("migration failed, nothing was written: {0}")]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("migration failed, nothing was written: {0}")]
    ReadModel(#[from] ReadModelError),

    #[error("migration storage error: {0}")]
    Storage(String),
}

/// Backend the migration reads legacy rows from and commits its output to.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Legacy rows ordered by `created_at`.
    async fn legacy_accommodations(&self) -> Result<Vec<LegacyAccommodation>, MigrationError>;

    /// Whether the legacy table holds any row, without loading them.
    async fn has_legacy_rows(&self) -> Result<bool, MigrationError>;

    async fn has_events(&self, aggregate_type: &str) -> Result<bool, MigrationError>;

    async fn has_accommodation_read_models(&self) -> Result<bool, MigrationError>;

    /// Append every stream as new (`NoStream`) and upsert every read model, atomically.
    ///
    /// Returns the number of events written.
    async fn commit(&self, batch: Vec<MigratedAccommodation>) -> Result<usize, MigrationError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub rows_migrated: usize,
    pub events_written: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    NotRequired,
    Migrated(MigrationReport),
}

pub struct DataMigrationService<M> {
    store: M,
}

impl<M: MigrationStore> DataMigrationService<M> {
    pub fn new(store: M) -> Self {
        Self { store }
    }

    /// Legacy rows exist and either the event log or the read models are still empty.
    #[instrument(skip(self), err)]
    pub async fn is_migration_required(&self) -> Result<bool, MigrationError> {
        if !self.store.has_legacy_rows().await? {
            return Ok(false);
        }
        let has_events = self.store.has_events(SleepingAccommodation::AGGREGATE_TYPE).await?;
        let has_read_models = self.store.has_accommodation_read_models().await?;
        Ok(!has_events || !has_read_models)
    }

    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<MigrationOutcome, MigrationError> {
        if !self.is_migration_required().await? {
            info!("sleeping accommodation migration not required");
            return Ok(MigrationOutcome::NotRequired);
        }

        let rows = self.store.legacy_accommodations().await?;
        let batch = rows
            .iter()
            .map(LegacyAccommodation::to_migrated)
            .collect::<Result<Vec<_>, _>>()?;

        let rows_migrated = batch.len();
        let events_written = self.store.commit(batch).await?;

        info!(rows_migrated, events_written, "sleeping accommodations migrated to event streams");
        Ok(MigrationOutcome::Migrated(MigrationReport {
            rows_migrated,
            events_written,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bunkhouse_accommodations::{SleepingAccommodationCreated, SleepingAccommodationDeactivated};
    use chrono::TimeZone;

    /// Answers the existence checks but refuses to hand out legacy rows.
    struct ExistenceOnlyStore {
        has_events: bool,
    }

    #[async_trait]
    impl MigrationStore for ExistenceOnlyStore {
        async fn legacy_accommodations(&self) -> Result<Vec<LegacyAccommodation>, MigrationError> {
            Err(MigrationError::Storage("legacy rows loaded".to_string()))
        }

        async fn has_legacy_rows(&self) -> Result<bool, MigrationError> {
            Ok(true)
        }

        async fn has_events(&self, _aggregate_type: &str) -> Result<bool, MigrationError> {
            Ok(self.has_events)
        }

        async fn has_accommodation_read_models(&self) -> Result<bool, MigrationError> {
            Ok(true)
        }

        async fn commit(&self, _batch: Vec<MigratedAccommodation>) -> Result<usize, MigrationError> {
            Err(MigrationError::Storage("commit".to_string()))
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, day, 9, 30, 0).unwrap()
    }

    fn row(is_active: bool, changed_at: Option<DateTime<Utc>>) -> LegacyAccommodation {
        LegacyAccommodation {
            id: SleepingAccommodationId::new(AggregateId::new()),
            name: "Hayloft".to_string(),
            accommodation_type: AccommodationType::Room,
            max_capacity: 6,
            is_active,
            created_at: at(1),
            changed_at,
        }
    }

    #[test]
    fn active_row_becomes_a_single_created_event() {
        let migrated = row(true, Some(at(3))).to_migrated().unwrap();

        assert_eq!(migrated.events.len(), 1);
        assert_eq!(migrated.events[0].event_type, SleepingAccommodationCreated::EVENT_TYPE);
        assert_eq!(migrated.events[0].occurred_at, at(1));
        assert_eq!(migrated.read_model.last_event_version, Some(0));
        assert_eq!(migrated.read_model.changed_at, Some(at(3)));
    }

    #[test]
    fn deactivated_row_gets_a_second_event_at_its_change_time() {
        let migrated = row(false, Some(at(4))).to_migrated().unwrap();

        let tags: Vec<_> = migrated.events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            tags,
            vec![SleepingAccommodationCreated::EVENT_TYPE, SleepingAccommodationDeactivated::EVENT_TYPE]
        );
        assert_eq!(migrated.events[1].occurred_at, at(4));
        assert_eq!(migrated.read_model.last_event_version, Some(1));
        assert!(!migrated.read_model.is_active);
    }

    #[test]
    fn inactive_row_without_change_time_keeps_its_flag_on_the_read_model() {
        let migrated = row(false, None).to_migrated().unwrap();
        assert_eq!(migrated.events.len(), 1);
        assert!(!migrated.read_model.is_active);
        assert_eq!(migrated.read_model.last_event_version, Some(0));
    }

    #[test]
    fn invalid_legacy_row_is_rejected() {
        let mut bad = row(true, None);
        bad.max_capacity = 0;
        assert!(matches!(
            bad.to_migrated(),
            Err(MigrationError::InvalidLegacyRow { source: DomainError::Validation(_), .. })
        ));
    }

    #[tokio::test]
    async fn requirement_check_only_asks_whether_legacy_rows_exist() {
        let pending = DataMigrationService::new(ExistenceOnlyStore { has_events: false });
        assert!(pending.is_migration_required().await.unwrap());

        let done = DataMigrationService::new(ExistenceOnlyStore { has_events: true });
        assert!(!done.is_migration_required().await.unwrap());
        assert_eq!(done.migrate().await.unwrap(), MigrationOutcome::NotRequired);
    }
}
