//! Read model storage abstractions.
//!
//! Read models are disposable: one row per aggregate id, mutated in place by the
//! projection engine and rebuildable from the event log at any time.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use bunkhouse_core::AggregateId;

pub use in_memory::InMemoryReadModelRepository;
pub use postgres::{PostgresAccommodationReadModels, PostgresBookingReadModels};

/// A denormalized row keyed by aggregate id that tracks how far it has been projected.
pub trait ReadModel: Clone + Send + Sync + 'static {
    fn id(&self) -> AggregateId;

    /// Version of the last applied event (`None` before the first one).
    fn last_event_version(&self) -> Option<u64>;

    fn set_last_event_version(&mut self, version: u64);
}

#[derive(Debug, Error)]
pub enum ReadModelError {
    #[error("read model storage error: {0}")]
    Storage(String),

    #[error("invalid read model row: {0}")]
    InvalidRow(String),
}

/// Query-optimized store for one read model type.
#[async_trait]
pub trait ReadModelRepository<M: ReadModel>: Send + Sync {
    async fn get(&self, id: AggregateId) -> Result<Option<M>, ReadModelError>;

    /// All read models, ordered by id.
    async fn list(&self) -> Result<Vec<M>, ReadModelError>;

    /// Insert or replace the row keyed by `model.id()`.
    async fn upsert(&self, model: M) -> Result<(), ReadModelError>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: AggregateId) -> Result<bool, ReadModelError>;

    async fn count(&self) -> Result<u64, ReadModelError>;
}

#[async_trait]
impl<M, S> ReadModelRepository<M> for Arc<S>
where
    M: ReadModel,
    S: ReadModelRepository<M> + ?Sized,
{
    async fn get(&self, id: AggregateId) -> Result<Option<M>, ReadModelError> {
        (**self).get(id).await
    }

    async fn list(&self) -> Result<Vec<M>, ReadModelError> {
        (**self).list().await
    }

    async fn upsert(&self, model: M) -> Result<(), ReadModelError> {
        (**self).upsert(model).await
    }

    async fn delete(&self, id: AggregateId) -> Result<bool, ReadModelError> {
        (**self).delete(id).await
    }

    async fn count(&self) -> Result<u64, ReadModelError> {
        (**self).count().await
    }
}
