use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use bunkhouse_accommodations::SleepingAccommodation;
use bunkhouse_core::{AggregateRoot, ExpectedVersion};

use super::{LegacyAccommodation, MigratedAccommodation, MigrationError, MigrationStore};
use crate::event_store::{AppendBatch, EventStore, InMemoryEventStore};
use crate::projections::SleepingAccommodationReadModel;
use crate::read_model::{InMemoryReadModelRepository, ReadModelRepository};

/// Legacy table plus the stores the migration writes to.
pub struct InMemoryMigrationStore {
    legacy: RwLock<Vec<LegacyAccommodation>>,
    events: Arc<InMemoryEventStore>,
    read_models: Arc<InMemoryReadModelRepository<SleepingAccommodationReadModel>>,
}

impl InMemoryMigrationStore {
    pub fn new(
        events: Arc<InMemoryEventStore>,
        read_models: Arc<InMemoryReadModelRepository<SleepingAccommodationReadModel>>,
    ) -> Self {
        Self {
            legacy: RwLock::new(Vec::new()),
            events,
            read_models,
        }
    }

    pub fn insert_legacy(&self, row: LegacyAccommodation) -> Result<(), MigrationError> {
        self.legacy
            .write()
            .map_err(|_| MigrationError::Storage("lock poisoned".to_string()))?
            .push(row);
        Ok(())
    }
}

#[async_trait]
impl MigrationStore for InMemoryMigrationStore {
    async fn legacy_accommodations(&self) -> Result<Vec<LegacyAccommodation>, MigrationError> {
        let mut rows = self
            .legacy
            .read()
            .map_err(|_| MigrationError::Storage("lock poisoned".to_string()))?
            .clone();
        rows.sort_by_key(|row| row.created_at);
        Ok(rows)
    }

    async fn has_legacy_rows(&self) -> Result<bool, MigrationError> {
        Ok(!self
            .legacy
            .read()
            .map_err(|_| MigrationError::Storage("lock poisoned".to_string()))?
            .is_empty())
    }

    async fn has_events(&self, aggregate_type: &str) -> Result<bool, MigrationError> {
        Ok(!self.events.get_all_aggregate_ids(aggregate_type).await?.is_empty())
    }

    async fn has_accommodation_read_models(&self) -> Result<bool, MigrationError> {
        Ok(self.read_models.count().await? > 0)
    }

    async fn commit(&self, batch: Vec<MigratedAccommodation>) -> Result<usize, MigrationError> {
        let mut read_models = Vec::with_capacity(batch.len());
        let appends = batch
            .into_iter()
            .map(|migrated| {
                read_models.push(migrated.read_model);
                AppendBatch {
                    aggregate_id: migrated.aggregate_id,
                    aggregate_type: SleepingAccommodation::AGGREGATE_TYPE.to_string(),
                    events: migrated.events,
                    expected_version: ExpectedVersion::NoStream,
                }
            })
            .collect();

        let written = self.events.save_batches(appends)?;
        for model in read_models {
            self.read_models.upsert(model).await?;
        }
        Ok(written.len())
    }
}
