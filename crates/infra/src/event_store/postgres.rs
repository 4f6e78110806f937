//! Postgres-backed event store implementation.
//!
//! All aggregate types share one `event_store_events` table. Optimistic concurrency
//! is enforced twice: the transaction compares `MAX(version)` against the expected
//! version, and the unique constraint on `(aggregate_id, version)` catches any writer
//! that commits between that check and the inserts.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `Concurrency` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / Io / Tls / other | N/A | `Storage` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::{Span, instrument};

use bunkhouse_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, Snapshot, StoredEvent, UncommittedEvent};

/// Postgres-backed append-only event store.
///
/// `PostgresEventStore` is `Send + Sync`; every operation borrows a connection
/// from the shared pool and appends run inside their own transaction.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Append a batch to one stream inside an open transaction.
///
/// The caller owns the transaction: on `Err` it must roll back (dropping the
/// transaction does so). Shared by `save_events` and the data migration, which
/// appends many streams in a single transaction.
pub(crate) async fn append_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: AggregateId,
    aggregate_type: &str,
    events: Vec<UncommittedEvent>,
    expected_version: ExpectedVersion,
) -> Result<Vec<StoredEvent>, EventStoreError> {
    let (current_version, existing_type) = check_stream_version(tx, aggregate_id).await?;

    if !expected_version.matches(current_version) {
        return Err(EventStoreError::concurrency(aggregate_id, expected_version, current_version));
    }

    if let Some(existing) = existing_type {
        if existing != aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch {
                aggregate_id,
                existing,
                attempted: aggregate_type.to_string(),
            });
        }
    }

    let mut stored_events = Vec::with_capacity(events.len());
    let mut next_version = expected_version.next_version();

    for event in events {
        sqlx::query(
            r#"
            INSERT INTO event_store_events (
                id,
                aggregate_id,
                aggregate_type,
                event_type,
                event_data,
                version,
                timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.event_id)
        .bind(aggregate_id.as_uuid())
        .bind(aggregate_type)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(next_version as i64)
        .bind(event.occurred_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                EventStoreError::concurrency(aggregate_id, expected_version, Some(next_version))
            } else {
                map_sqlx_error("insert_event", e)
            }
        })?;

        stored_events.push(StoredEvent {
            event_id: event.event_id,
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: event.event_type,
            version: next_version,
            timestamp: event.occurred_at,
            payload: event.payload,
        });
        next_version += 1;
    }

    Ok(stored_events)
}

/// Current version (`None` for an empty stream) and aggregate type of a stream.
async fn check_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: AggregateId,
) -> Result<(Option<u64>, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            MAX(version) AS current_version,
            MAX(aggregate_type) AS aggregate_type
        FROM event_store_events
        WHERE aggregate_id = $1
        "#,
    )
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current_version: Option<i64> = row
        .try_get("current_version")
        .map_err(|e| EventStoreError::Storage(format!("failed to read current_version: {e}")))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| EventStoreError::Storage(format!("failed to read aggregate_type: {e}")))?;

    Ok((current_version.map(|v| v as u64), aggregate_type))
}

/// Map SQLx errors to EventStoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            EventStoreError::Storage(msg)
        }
        sqlx::Error::PoolClosed => EventStoreError::Storage(format!("connection pool closed in {operation}")),
        _ => EventStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(
        skip(self),
        fields(aggregate_id = %aggregate_id, event_count),
        err
    )]
    async fn get_events(
        &self,
        aggregate_id: AggregateId,
        after: Option<u64>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let after = after.map_or(-1, |v| v as i64);

        let rows = sqlx::query(
            r#"
            SELECT
                id,
                aggregate_id,
                aggregate_type,
                event_type,
                event_data,
                version,
                timestamp
            FROM event_store_events
            WHERE aggregate_id = $1 AND version > $2
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .bind(after)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_events", e))?;

        let mut stored_events = Vec::with_capacity(rows.len());
        for row in rows {
            let stored = StoredEventRow::from_row(&row)
                .map_err(|e| EventStoreError::Storage(format!("failed to read event row: {e}")))?;
            stored_events.push(stored.into());
        }

        Span::current().record("event_count", stored_events.len());
        Ok(stored_events)
    }

    #[instrument(
        skip(self, events),
        fields(
            aggregate_id = %aggregate_id,
            event_count = events.len(),
            expected_version = %expected_version
        ),
        err
    )]
    async fn save_events(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let stored_events = match append_in_tx(&mut tx, aggregate_id, aggregate_type, events, expected_version).await {
            Ok(stored) => stored,
            Err(err) => {
                tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(err);
            }
        };

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(stored_events)
    }

    #[instrument(skip(self), fields(aggregate_id = %aggregate_id), err)]
    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>, EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                aggregate_id,
                aggregate_type,
                version,
                data,
                timestamp
            FROM event_store_snapshots
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_snapshot", e))?;

        match row {
            Some(row) => {
                let snapshot = SnapshotRow::from_row(&row)
                    .map_err(|e| EventStoreError::Storage(format!("failed to read snapshot row: {e}")))?;
                Ok(Some(snapshot.into()))
            }
            None => Ok(None),
        }
    }

    #[instrument(
        skip(self, snapshot),
        fields(aggregate_id = %snapshot.aggregate_id, version = snapshot.version),
        err
    )]
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            INSERT INTO event_store_snapshots (
                aggregate_id,
                aggregate_type,
                version,
                data,
                timestamp
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_id)
            DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                version = EXCLUDED.version,
                data = EXCLUDED.data,
                timestamp = EXCLUDED.timestamp
            "#,
        )
        .bind(snapshot.aggregate_id.as_uuid())
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version as i64)
        .bind(&snapshot.data)
        .bind(snapshot.timestamp)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_snapshot", e))?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_all_aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT aggregate_id, MIN(timestamp) AS first_seen
            FROM event_store_events
            WHERE aggregate_type = $1
            GROUP BY aggregate_id
            ORDER BY first_seen ASC, aggregate_id ASC
            "#,
        )
        .bind(aggregate_type)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_all_aggregate_ids", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<uuid::Uuid, _>("aggregate_id")
                    .map(AggregateId::from_uuid)
                    .map_err(|e| EventStoreError::Storage(format!("failed to read aggregate_id: {e}")))
            })
            .collect()
    }
}

// SQLx row types

#[derive(Debug)]
struct StoredEventRow {
    id: uuid::Uuid,
    aggregate_id: uuid::Uuid,
    aggregate_type: String,
    event_type: String,
    event_data: serde_json::Value,
    version: i64,
    timestamp: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEventRow {
            id: row.try_get("id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            event_type: row.try_get("event_type")?,
            event_data: row.try_get("event_data")?,
            version: row.try_get("version")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

impl From<StoredEventRow> for StoredEvent {
    fn from(row: StoredEventRow) -> Self {
        StoredEvent {
            event_id: row.id,
            aggregate_id: AggregateId::from_uuid(row.aggregate_id),
            aggregate_type: row.aggregate_type,
            event_type: row.event_type,
            version: row.version as u64,
            timestamp: row.timestamp,
            payload: row.event_data,
        }
    }
}

#[derive(Debug)]
struct SnapshotRow {
    aggregate_id: uuid::Uuid,
    aggregate_type: String,
    version: i64,
    data: serde_json::Value,
    timestamp: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for SnapshotRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(SnapshotRow {
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            version: row.try_get("version")?,
            data: row.try_get("data")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

impl From<SnapshotRow> for Snapshot {
    fn from(row: SnapshotRow) -> Self {
        Snapshot {
            aggregate_id: AggregateId::from_uuid(row.aggregate_id),
            aggregate_type: row.aggregate_type,
            version: row.version as u64,
            data: row.data,
            timestamp: row.timestamp,
        }
    }
}
