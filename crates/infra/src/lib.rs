//! Infrastructure layer: event store, repository, dispatch, projections, migration.
//!
//! Every storage seam has an in-memory implementation (used by the tests) and a
//! Postgres implementation built on `sqlx`.

pub mod config;
pub mod dispatcher;
pub mod event_store;
pub mod history;
pub mod migration;
pub mod projections;
pub mod read_model;
pub mod repository;
pub mod schema;
pub mod workers;


pub use config::{ConfigError, DatabaseConfig, EventSourcingConfig, ProjectionRetryOptions};
pub use dispatcher::{DispatchError, EventDispatcher, EventHandler, HandlerRegistry};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, StoredEvent};
pub use history::{BookingHistory, BookingHistoryService, HistoryEntry, HistoryError};
pub use migration::{DataMigrationService, MigrationError, MigrationOutcome, MigrationReport};
pub use projections::{
    BookingReadModel, ProjectionError, ProjectionService, RebuildSummary, SleepingAccommodationReadModel,
};
pub use read_model::{InMemoryReadModelRepository, ReadModelError, ReadModelRepository};
pub use repository::{EventSourcedRepository, RepositoryError};
