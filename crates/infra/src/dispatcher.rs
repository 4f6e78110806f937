//! Post-commit delivery of stored events to projection handlers.
//!
//! Handlers are looked up by event tag in a [`HandlerRegistry`]. In inline mode the
//! dispatcher awaits every handler before returning; in deferred mode it hands the
//! event to [`ProjectionLanes`] and returns immediately. Either way the log has
//! already been committed: a failing handler never undoes an append, and the
//! affected read model can always be rebuilt from the log.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error};

use bunkhouse_core::AggregateId;

use crate::config::EventSourcingConfig;
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::{ProjectedReadModel, ProjectionError, ProjectionService};
use crate::read_model::ReadModelRepository;
use crate::workers::ProjectionLanes;

/// Receives committed events for the tags it is registered under.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &StoredEvent) -> Result<(), ProjectionError>;
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("handler '{handler}' failed on {event_type} (version {version}) of {aggregate_id}: {source}")]
    Handler {
        handler: String,
        aggregate_id: AggregateId,
        event_type: String,
        version: u64,
        #[source]
        source: ProjectionError,
    },

    #[error("deferred projection queue is closed")]
    QueueClosed,

    #[error("deferred projections require a running tokio runtime")]
    NoRuntime,
}

/// Event tag → handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event_type: &str, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(event_type.to_string()).or_default().push(handler);
    }

    /// Register a projection under every tag its read model has an applier for.
    pub fn register_projection<M, S, R>(&mut self, projection: Arc<ProjectionService<M, S, R>>)
    where
        M: ProjectedReadModel,
        S: EventStore + 'static,
        R: ReadModelRepository<M> + 'static,
    {
        for event_type in M::handled_event_types() {
            self.register(event_type, projection.clone());
        }
    }

    pub fn handlers_for(&self, event_type: &str) -> &[Arc<dyn EventHandler>] {
        self.handlers.get(event_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (event_type, handlers) in &self.handlers {
            let names: Vec<_> = handlers.iter().map(|h| h.name().to_string()).collect();
            map.entry(event_type, &names);
        }
        map.finish()
    }
}

#[derive(Debug)]
enum Mode {
    Inline,
    Deferred(ProjectionLanes),
}

#[derive(Debug)]
pub struct EventDispatcher {
    registry: Arc<HandlerRegistry>,
    mode: Mode,
}

impl EventDispatcher {
    /// Handlers run before `publish` returns; their failures are returned to the caller.
    pub fn inline(registry: HandlerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            mode: Mode::Inline,
        }
    }

    /// Handlers run on background lanes with retry; must be called inside a tokio runtime.
    pub fn deferred(registry: HandlerRegistry, config: &EventSourcingConfig) -> Result<Self, DispatchError> {
        let registry = Arc::new(registry);
        let lanes = ProjectionLanes::spawn(registry.clone(), config.projection_workers, config.retry.clone())?;
        Ok(Self {
            registry,
            mode: Mode::Deferred(lanes),
        })
    }

    pub fn from_config(registry: HandlerRegistry, config: &EventSourcingConfig) -> Result<Self, DispatchError> {
        if config.use_async_projections {
            Self::deferred(registry, config)
        } else {
            Ok(Self::inline(registry))
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.mode, Mode::Deferred(_))
    }

    /// Deliver one committed event.
    pub async fn publish(&self, event: &StoredEvent) -> Result<(), DispatchError> {
        match &self.mode {
            Mode::Deferred(lanes) => lanes.enqueue(event.clone()),
            Mode::Inline => self.publish_inline(event).await,
        }
    }

    /// Deliver committed events in order, continuing past failures.
    ///
    /// Returns the first failure once every event has been offered to its handlers.
    pub async fn publish_all(&self, events: &[StoredEvent]) -> Result<(), DispatchError> {
        let mut first_error = None;
        for event in events {
            if let Err(err) = self.publish(event).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Resolves once deferred lanes have drained; immediate in inline mode.
    pub async fn wait_idle(&self) {
        if let Mode::Deferred(lanes) = &self.mode {
            lanes.wait_idle().await;
        }
    }

    pub async fn shutdown(self) {
        if let Mode::Deferred(lanes) = self.mode {
            lanes.shutdown().await;
        }
    }

    async fn publish_inline(&self, event: &StoredEvent) -> Result<(), DispatchError> {
        let handlers = self.registry.handlers_for(&event.event_type);
        if handlers.is_empty() {
            debug!(event_type = %event.event_type, "no handlers registered");
            return Ok(());
        }

        let mut first_error = None;
        for handler in handlers {
            if let Err(source) = handler.handle(event).await {
                error!(
                    handler = handler.name(),
                    aggregate_id = %event.aggregate_id,
                    event_type = %event.event_type,
                    version = event.version,
                    error = %source,
                    "projection handler failed; log entry stays committed"
                );
                first_error.get_or_insert(DispatchError::Handler {
                    handler: handler.name().to_string(),
                    aggregate_id: event.aggregate_id,
                    event_type: event.event_type.clone(),
                    version: event.version,
                    source,
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
