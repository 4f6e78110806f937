use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use bunkhouse_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, Snapshot, StoredEvent, UncommittedEvent};

/// One append request inside an atomic multi-stream batch.
#[derive(Debug, Clone)]
pub struct AppendBatch {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub events: Vec<UncommittedEvent>,
    pub expected_version: ExpectedVersion,
}

#[derive(Debug, Default)]
struct Streams {
    by_id: HashMap<AggregateId, Vec<StoredEvent>>,
    // Stream creation order, so id listings are deterministic.
    order: Vec<AggregateId>,
}

impl Streams {
    fn current_version(&self, aggregate_id: AggregateId) -> Option<u64> {
        self.by_id
            .get(&aggregate_id)
            .and_then(|s| s.last())
            .map(|e| e.version)
    }

    fn check(&self, batch: &AppendBatch) -> Result<(), EventStoreError> {
        let current = self.current_version(batch.aggregate_id);
        if !batch.expected_version.matches(current) {
            return Err(EventStoreError::concurrency(
                batch.aggregate_id,
                batch.expected_version,
                current,
            ));
        }

        if let Some(existing) = self.by_id.get(&batch.aggregate_id).and_then(|s| s.first()) {
            if existing.aggregate_type != batch.aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch {
                    aggregate_id: batch.aggregate_id,
                    existing: existing.aggregate_type.clone(),
                    attempted: batch.aggregate_type.clone(),
                });
            }
        }
        Ok(())
    }

    fn append(&mut self, batch: AppendBatch) -> Vec<StoredEvent> {
        if !self.by_id.contains_key(&batch.aggregate_id) {
            self.order.push(batch.aggregate_id);
        }
        let stream = self.by_id.entry(batch.aggregate_id).or_default();

        let mut next = batch.expected_version.next_version();
        let mut committed = Vec::with_capacity(batch.events.len());
        for e in batch.events {
            let stored = StoredEvent {
                event_id: e.event_id,
                aggregate_id: batch.aggregate_id,
                aggregate_type: batch.aggregate_type.clone(),
                event_type: e.event_type,
                version: next,
                timestamp: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }
        committed
    }
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<Streams>,
    snapshots: RwLock<HashMap<AggregateId, Snapshot>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to several streams atomically: every batch is checked before any is written.
    pub fn save_batches(&self, batches: Vec<AppendBatch>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        for (idx, batch) in batches.iter().enumerate() {
            streams.check(batch)?;
            let repeated = batches[..idx]
                .iter()
                .any(|b| b.aggregate_id == batch.aggregate_id);
            if repeated {
                return Err(EventStoreError::Storage(format!(
                    "aggregate {} appears twice in one batch",
                    batch.aggregate_id
                )));
            }
        }

        let mut committed = Vec::new();
        for batch in batches.into_iter().filter(|b| !b.events.is_empty()) {
            committed.extend(streams.append(batch));
        }
        Ok(committed)
    }

    /// Total number of stored events across all streams.
    pub fn total_events(&self) -> Result<usize, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;
        Ok(streams.by_id.values().map(Vec::len).sum())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn get_events(
        &self,
        aggregate_id: AggregateId,
        after: Option<u64>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        let events = streams
            .by_id
            .get(&aggregate_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| after.is_none_or(|a| e.version > a))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(events)
    }

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

        let batch = AppendBatch {
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            events,
            expected_version,
        };

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;
        streams.check(&batch)?;
        Ok(streams.append(batch))
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>, EventStoreError> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;
        Ok(snapshots.get(&aggregate_id).cloned())
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), EventStoreError> {
        let mut snapshots = self
            .snapshots
            .write()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;
        snapshots.insert(snapshot.aggregate_id, snapshot);
        Ok(())
    }

    async fn get_all_aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        Ok(streams
            .order
            .iter()
            .filter(|id| {
                streams
                    .by_id
                    .get(id)
                    .and_then(|s| s.first())
                    .is_some_and(|e| e.aggregate_type == aggregate_type)
            })
            .copied()
            .collect())
    }
}
