//! Postgres migration backend: reads `sleeping_accommodations`, writes the log and
//! read models inside one transaction.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{instrument, warn};

use bunkhouse_accommodations::{AccommodationType, SleepingAccommodation, SleepingAccommodationId};
use bunkhouse_core::{AggregateId, AggregateRoot, ExpectedVersion};

use super::{LegacyAccommodation, MigratedAccommodation, MigrationError, MigrationStore};
use crate::event_store::postgres::append_in_tx;
use crate::read_model::postgres::upsert_accommodation;

#[derive(Debug, Clone)]
pub struct PostgresMigrationStore {
    pool: PgPool,
}

impl PostgresMigrationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn invalid_row(err: impl std::fmt::Display) -> MigrationError {
    MigrationError::Storage(format!("invalid legacy row: {err}"))
}

fn storage(operation: &str) -> impl FnOnce(sqlx::Error) -> MigrationError + '_ {
    move |err| MigrationError::Storage(format!("sqlx error in {operation}: {err}"))
}

#[async_trait]
impl MigrationStore for PostgresMigrationStore {
    #[instrument(skip(self), err)]
    async fn legacy_accommodations(&self) -> Result<Vec<LegacyAccommodation>, MigrationError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, type, max_capacity, is_active, created_at, changed_at
            FROM sleeping_accommodations
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage("legacy_accommodations"))?;

        rows.iter()
            .map(|row| {
                let id: uuid::Uuid = row.try_get("id").map_err(invalid_row)?;
                let accommodation_type: String = row.try_get("type").map_err(invalid_row)?;
                let max_capacity: i32 = row.try_get("max_capacity").map_err(invalid_row)?;

                Ok(LegacyAccommodation {
                    id: SleepingAccommodationId::new(AggregateId::from_uuid(id)),
                    name: row.try_get("name").map_err(invalid_row)?,
                    accommodation_type: accommodation_type
                        .parse::<AccommodationType>()
                        .map_err(invalid_row)?,
                    max_capacity: u32::try_from(max_capacity).map_err(invalid_row)?,
                    is_active: row.try_get("is_active").map_err(invalid_row)?,
                    created_at: row.try_get("created_at").map_err(invalid_row)?,
                    changed_at: row.try_get("changed_at").map_err(invalid_row)?,
                })
            })
            .collect()
    }

    async fn has_legacy_rows(&self) -> Result<bool, MigrationError> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sleeping_accommodations)")
            .fetch_one(&self.pool)
            .await
            .map_err(storage("has_legacy_rows"))
    }

    async fn has_events(&self, aggregate_type: &str) -> Result<bool, MigrationError> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM event_store_events WHERE aggregate_type = $1)")
            .bind(aggregate_type)
            .fetch_one(&self.pool)
            .await
            .map_err(storage("has_events"))
    }

    async fn has_accommodation_read_models(&self) -> Result<bool, MigrationError> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sleeping_accommodation_read_models)")
            .fetch_one(&self.pool)
            .await
            .map_err(storage("has_accommodation_read_models"))
    }

    #[instrument(skip(self, batch), fields(rows = batch.len()), err)]
    async fn commit(&self, batch: Vec<MigratedAccommodation>) -> Result<usize, MigrationError> {
        let mut tx = self.pool.begin().await.map_err(storage("begin"))?;
        let mut written = 0;

        for migrated in batch {
            let appended = append_in_tx(
                &mut tx,
                migrated.aggregate_id,
                SleepingAccommodation::AGGREGATE_TYPE,
                migrated.events,
                ExpectedVersion::NoStream,
            )
            .await;

            let appended = match appended {
                Ok(appended) => appended,
                Err(err) => {
                    warn!(aggregate_id = %migrated.aggregate_id, error = %err, "rolling back migration");
                    tx.rollback().await.map_err(storage("rollback"))?;
                    return Err(err.into());
                }
            };
            written += appended.len();

            if let Err(err) = upsert_accommodation(&mut *tx, &migrated.read_model).await {
                warn!(aggregate_id = %migrated.aggregate_id, error = %err, "rolling back migration");
                tx.rollback().await.map_err(storage("rollback"))?;
                return Err(err.into());
            }
        }

        tx.commit().await.map_err(storage("commit"))?;
        Ok(written)
    }
}
