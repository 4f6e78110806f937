//! Database schema for the event log, snapshots, read models and the legacy table.

use sqlx::PgPool;
use tracing::info;

/// Idempotent DDL; every statement uses `IF NOT EXISTS`.
pub const EVENT_SOURCING_SCHEMA: &str = include_str!("../migrations/0001_event_sourcing.sql");

/// Create any missing table or index.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(EVENT_SOURCING_SCHEMA).execute(pool).await?;
    info!("event sourcing schema ensured");
    Ok(())
}
