use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use bunkhouse_core::AggregateId;

use super::{ReadModel, ReadModelError, ReadModelRepository};

/// In-memory read model store for tests/dev.
#[derive(Debug)]
pub struct InMemoryReadModelRepository<M> {
    inner: RwLock<BTreeMap<AggregateId, M>>,
}

impl<M> InMemoryReadModelRepository<M> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<M> Default for InMemoryReadModelRepository<M> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> ReadModelError {
    ReadModelError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl<M: ReadModel> ReadModelRepository<M> for InMemoryReadModelRepository<M> {
    async fn get(&self, id: AggregateId) -> Result<Option<M>, ReadModelError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<M>, ReadModelError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.values().cloned().collect())
    }

    async fn upsert(&self, model: M) -> Result<(), ReadModelError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.insert(model.id(), model);
        Ok(())
    }

    async fn delete(&self, id: AggregateId) -> Result<bool, ReadModelError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        Ok(map.remove(&id).is_some())
    }

    async fn count(&self) -> Result<u64, ReadModelError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.len() as u64)
    }
}
