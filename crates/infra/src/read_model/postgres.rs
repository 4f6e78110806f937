//! Postgres-backed read model repositories.
//!
//! One table per read model type, keyed by aggregate id. `last_event_version` is
//! stored as `-1` until the first event has been applied.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Executor, PgPool, Postgres, Row};
use tracing::instrument;

use bunkhouse_accommodations::{AccommodationType, SleepingAccommodationId};
use bunkhouse_bookings::{BookingId, BookingItem, BookingStatus};
use bunkhouse_core::{AggregateId, UserId};

use super::{ReadModelError, ReadModelRepository};
use crate::projections::{BookingReadModel, SleepingAccommodationReadModel};

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ReadModelError {
    ReadModelError::Storage(format!("sqlx error in {operation}: {err}"))
}

fn invalid_row(err: impl std::fmt::Display) -> ReadModelError {
    ReadModelError::InvalidRow(err.to_string())
}

fn version_to_db(version: Option<u64>) -> i64 {
    version.map_or(-1, |v| v as i64)
}

fn version_from_db(version: i64) -> Option<u64> {
    u64::try_from(version).ok()
}

/// Counts are stored in `INTEGER` columns; values past `i32::MAX` are rejected, not wrapped.
fn count_to_db(column: &'static str, value: u32) -> Result<i32, ReadModelError> {
    i32::try_from(value).map_err(|_| ReadModelError::InvalidRow(format!("{column} {value} does not fit an INTEGER column")))
}

/// Insert or replace a sleeping accommodation row.
///
/// Generic over the executor so the data migration can write inside its transaction.
pub(crate) async fn upsert_accommodation<'e, E>(
    executor: E,
    model: &SleepingAccommodationReadModel,
) -> Result<(), ReadModelError>
where
    E: Executor<'e, Database = Postgres>,
{
    let max_capacity = count_to_db("max_capacity", model.max_capacity)?;
    sqlx::query(
        r#"
        INSERT INTO sleeping_accommodation_read_models (
            id,
            name,
            type,
            max_capacity,
            is_active,
            created_at,
            changed_at,
            last_event_version
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id)
        DO UPDATE SET
            name = EXCLUDED.name,
            type = EXCLUDED.type,
            max_capacity = EXCLUDED.max_capacity,
            is_active = EXCLUDED.is_active,
            created_at = EXCLUDED.created_at,
            changed_at = EXCLUDED.changed_at,
            last_event_version = EXCLUDED.last_event_version
        "#,
    )
    .bind(model.id.0.as_uuid())
    .bind(&model.name)
    .bind(model.accommodation_type.as_str())
    .bind(max_capacity)
    .bind(model.is_active)
    .bind(model.created_at)
    .bind(model.changed_at)
    .bind(version_to_db(model.last_event_version))
    .execute(executor)
    .await
    .map_err(|e| map_sqlx_error("upsert_accommodation", e))?;
    Ok(())
}

fn accommodation_from_row(row: &PgRow) -> Result<SleepingAccommodationReadModel, ReadModelError> {
    let id: uuid::Uuid = row.try_get("id").map_err(invalid_row)?;
    let accommodation_type: String = row.try_get("type").map_err(invalid_row)?;
    let max_capacity: i32 = row.try_get("max_capacity").map_err(invalid_row)?;
    let last_event_version: i64 = row.try_get("last_event_version").map_err(invalid_row)?;

    Ok(SleepingAccommodationReadModel {
        id: SleepingAccommodationId::new(AggregateId::from_uuid(id)),
        name: row.try_get("name").map_err(invalid_row)?,
        accommodation_type: accommodation_type.parse::<AccommodationType>().map_err(invalid_row)?,
        max_capacity: u32::try_from(max_capacity).map_err(invalid_row)?,
        is_active: row.try_get("is_active").map_err(invalid_row)?,
        created_at: row.try_get("created_at").map_err(invalid_row)?,
        changed_at: row.try_get("changed_at").map_err(invalid_row)?,
        last_event_version: version_from_db(last_event_version),
    })
}

/// `sleeping_accommodation_read_models` table.
#[derive(Debug, Clone)]
pub struct PostgresAccommodationReadModels {
    pool: Arc<PgPool>,
}

impl PostgresAccommodationReadModels {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

const ACCOMMODATION_COLUMNS: &str =
    "id, name, type, max_capacity, is_active, created_at, changed_at, last_event_version";

#[async_trait]
impl ReadModelRepository<SleepingAccommodationReadModel> for PostgresAccommodationReadModels {
    #[instrument(skip(self), err)]
    async fn get(&self, id: AggregateId) -> Result<Option<SleepingAccommodationReadModel>, ReadModelError> {
        let sql = format!("SELECT {ACCOMMODATION_COLUMNS} FROM sleeping_accommodation_read_models WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_accommodation", e))?;

        row.as_ref().map(accommodation_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<SleepingAccommodationReadModel>, ReadModelError> {
        let sql = format!("SELECT {ACCOMMODATION_COLUMNS} FROM sleeping_accommodation_read_models ORDER BY id");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_accommodations", e))?;

        rows.iter().map(accommodation_from_row).collect()
    }

    #[instrument(skip(self, model), fields(id = %model.id), err)]
    async fn upsert(&self, model: SleepingAccommodationReadModel) -> Result<(), ReadModelError> {
        upsert_accommodation(&*self.pool, &model).await
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, id: AggregateId) -> Result<bool, ReadModelError> {
        let result = sqlx::query("DELETE FROM sleeping_accommodation_read_models WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_accommodation", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<u64, ReadModelError> {
        count_rows(&self.pool, "sleeping_accommodation_read_models").await
    }
}

async fn count_rows(pool: &PgPool, table: &str) -> Result<u64, ReadModelError> {
    let row = sqlx::query(&format!("SELECT COUNT(*) AS total FROM {table}"))
        .fetch_one(pool)
        .await
        .map_err(|e| map_sqlx_error("count", e))?;
    let total: i64 = row.try_get("total").map_err(invalid_row)?;
    Ok(total as u64)
}

pub(crate) async fn upsert_booking<'e, E>(executor: E, model: &BookingReadModel) -> Result<(), ReadModelError>
where
    E: Executor<'e, Database = Postgres>,
{
    let total_persons = count_to_db("total_persons", model.total_persons)?;
    sqlx::query(
        r#"
        INSERT INTO booking_read_models (
            id,
            user_id,
            start_date,
            end_date,
            status,
            notes,
            created_at,
            changed_at,
            last_event_version,
            booking_items,
            total_persons
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id)
        DO UPDATE SET
            user_id = EXCLUDED.user_id,
            start_date = EXCLUDED.start_date,
            end_date = EXCLUDED.end_date,
            status = EXCLUDED.status,
            notes = EXCLUDED.notes,
            created_at = EXCLUDED.created_at,
            changed_at = EXCLUDED.changed_at,
            last_event_version = EXCLUDED.last_event_version,
            booking_items = EXCLUDED.booking_items,
            total_persons = EXCLUDED.total_persons
        "#,
    )
    .bind(model.id.0.as_uuid())
    .bind(model.user_id.map(uuid::Uuid::from))
    .bind(model.start_date)
    .bind(model.end_date)
    .bind(model.status.as_str())
    .bind(&model.notes)
    .bind(model.created_at)
    .bind(model.changed_at)
    .bind(version_to_db(model.last_event_version))
    .bind(sqlx::types::Json(&model.booking_items))
    .bind(total_persons)
    .execute(executor)
    .await
    .map_err(|e| map_sqlx_error("upsert_booking", e))?;
    Ok(())
}

fn booking_from_row(row: &PgRow) -> Result<BookingReadModel, ReadModelError> {
    let id: uuid::Uuid = row.try_get("id").map_err(invalid_row)?;
    let user_id: Option<uuid::Uuid> = row.try_get("user_id").map_err(invalid_row)?;
    let status: String = row.try_get("status").map_err(invalid_row)?;
    let items: sqlx::types::Json<Vec<BookingItem>> = row.try_get("booking_items").map_err(invalid_row)?;
    let total_persons: i32 = row.try_get("total_persons").map_err(invalid_row)?;
    let last_event_version: i64 = row.try_get("last_event_version").map_err(invalid_row)?;

    Ok(BookingReadModel {
        id: BookingId::new(AggregateId::from_uuid(id)),
        user_id: user_id.map(UserId::from_uuid),
        start_date: row.try_get("start_date").map_err(invalid_row)?,
        end_date: row.try_get("end_date").map_err(invalid_row)?,
        status: status.parse::<BookingStatus>().map_err(invalid_row)?,
        notes: row.try_get("notes").map_err(invalid_row)?,
        created_at: row.try_get("created_at").map_err(invalid_row)?,
        changed_at: row.try_get("changed_at").map_err(invalid_row)?,
        last_event_version: version_from_db(last_event_version),
        booking_items: items.0,
        total_persons: u32::try_from(total_persons).map_err(invalid_row)?,
    })
}

/// `booking_read_models` table; items are stored as a JSON array.
#[derive(Debug, Clone)]
pub struct PostgresBookingReadModels {
    pool: Arc<PgPool>,
}

impl PostgresBookingReadModels {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

const BOOKING_COLUMNS: &str = "id, user_id, start_date, end_date, status, notes, created_at, changed_at, \
     last_event_version, booking_items, total_persons";

#[async_trait]
impl ReadModelRepository<BookingReadModel> for PostgresBookingReadModels {
    #[instrument(skip(self), err)]
    async fn get(&self, id: AggregateId) -> Result<Option<BookingReadModel>, ReadModelError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM booking_read_models WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_booking", e))?;

        row.as_ref().map(booking_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<BookingReadModel>, ReadModelError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM booking_read_models ORDER BY id");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_bookings", e))?;

        rows.iter().map(booking_from_row).collect()
    }

    #[instrument(skip(self, model), fields(id = %model.id), err)]
    async fn upsert(&self, model: BookingReadModel) -> Result<(), ReadModelError> {
        upsert_booking(&*self.pool, &model).await
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, id: AggregateId) -> Result<bool, ReadModelError> {
        let result = sqlx::query("DELETE FROM booking_read_models WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_booking", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<u64, ReadModelError> {
        count_rows(&self.pool, "booking_read_models").await
    }
}
