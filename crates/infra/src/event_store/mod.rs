//! Append-only event store boundary.
//!
//! One log is shared by every aggregate type; streams are keyed by aggregate id
//! and versioned from 0 without gaps.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{AppendBatch, InMemoryEventStore};
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, Snapshot, StoredEvent, UncommittedEvent};
