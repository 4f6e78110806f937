//! Administrative entry point over the Postgres wiring.
//!
//! Thin wrappers around the migration service, the projection services and the
//! booking history view. Connection settings come from `DATABASE_URL` and
//! `DATABASE_MAX_CONNECTIONS`.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use bunkhouse_bookings::BookingId;
use bunkhouse_core::AggregateId;
use bunkhouse_infra::migration::PostgresMigrationStore;
use bunkhouse_infra::projections::ProjectedReadModel;
use bunkhouse_infra::read_model::{PostgresAccommodationReadModels, PostgresBookingReadModels};
use bunkhouse_infra::{
    BookingHistoryService, DataMigrationService, DatabaseConfig, MigrationOutcome, PostgresEventStore,
    ProjectionService, ReadModelRepository, schema,
};

#[derive(Parser)]
#[command(name = "bunkhouse-admin")]
#[command(about = "Event store administration: legacy migration, projection rebuilds, booking history", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReadModelKind {
    Accommodations,
    Bookings,
}

#[derive(Subcommand)]
enum Command {
    /// Create any missing table or index.
    InitSchema,
    /// Report whether legacy accommodation rows still need migrating.
    MigrationStatus,
    /// Turn legacy accommodation rows into event streams (one transaction).
    Migrate,
    /// Replay one aggregate's full history into a fresh read model.
    Rebuild { model: ReadModelKind, id: Uuid },
    /// Rebuild every read model of a type, continuing past failures.
    RebuildAll { model: ReadModelKind },
    /// Apply the events after a version on top of the current read model.
    Project {
        model: ReadModelKind,
        id: Uuid,

        /// Only apply events with a version greater than this one
        #[arg(long)]
        from: Option<u64>,
    },
    /// Print a booking's history as JSON, newest first.
    History {
        booking_id: Uuid,

        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bunkhouse_observability::init();
    let cli = Cli::parse();

    let config = DatabaseConfig::from_env()?;
    let pool = config.connect().await.context("failed to open the Postgres pool")?;
    info!(max_connections = config.max_connections, "connected to Postgres");

    match &cli.command {
        Command::InitSchema => {
            schema::ensure_schema(&pool).await?;
            println!("schema is up to date");
        }
        Command::MigrationStatus => {
            let service = DataMigrationService::new(PostgresMigrationStore::new(pool));
            let required = service.is_migration_required().await?;
            println!("migration required: {required}");
        }
        Command::Migrate => {
            let service = DataMigrationService::new(PostgresMigrationStore::new(pool));
            match service.migrate().await? {
                MigrationOutcome::NotRequired => println!("nothing to migrate"),
                MigrationOutcome::Migrated(report) => println!(
                    "migrated {} accommodations ({} events)",
                    report.rows_migrated, report.events_written
                ),
            }
        }
        Command::History {
            booking_id,
            page,
            page_size,
        } => {
            let service = BookingHistoryService::new(PostgresEventStore::new(pool));
            let history = service
                .history(BookingId::new(AggregateId::from_uuid(*booking_id)), *page, *page_size)
                .await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        Command::Rebuild { model, .. } | Command::RebuildAll { model } | Command::Project { model, .. } => {
            match model {
                ReadModelKind::Accommodations => {
                    let read_models = PostgresAccommodationReadModels::new(pool.clone());
                    run_projection(projection(pool, read_models), &cli.command).await?;
                }
                ReadModelKind::Bookings => {
                    let read_models = PostgresBookingReadModels::new(pool.clone());
                    run_projection(projection(pool, read_models), &cli.command).await?;
                }
            }
        }
    }

    Ok(())
}

fn projection<M, R>(pool: PgPool, read_models: R) -> ProjectionService<M, PostgresEventStore, R>
where
    M: ProjectedReadModel,
    R: ReadModelRepository<M>,
{
    ProjectionService::new(PostgresEventStore::new(pool), read_models)
}

async fn run_projection<M, R>(
    service: ProjectionService<M, PostgresEventStore, R>,
    command: &Command,
) -> anyhow::Result<()>
where
    M: ProjectedReadModel,
    R: ReadModelRepository<M>,
{
    match command {
        Command::Rebuild { id, .. } => {
            let applied = service.rebuild(AggregateId::from_uuid(*id)).await?;
            println!("{}: rebuilt {id} from {applied} events", M::NAME);
        }
        Command::RebuildAll { .. } => {
            let summary = service.rebuild_all().await?;
            println!("{}: rebuilt {} read models", M::NAME, summary.rebuilt);
            for failure in &summary.failures {
                eprintln!("  {} failed: {}", failure.aggregate_id, failure.error);
            }
            if !summary.is_complete() {
                bail!("{} read models could not be rebuilt", summary.failures.len());
            }
        }
        Command::Project { id, from, .. } => {
            let applied = service.replay_from(AggregateId::from_uuid(*id), *from).await?;
            println!("{}: applied {applied} events to {id}", M::NAME);
        }
        _ => bail!("not a projection command"),
    }
    Ok(())
}
