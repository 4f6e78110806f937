//! Deferred projection lanes.
//!
//! Committed events are queued on one of N unbounded lanes, chosen from the
//! aggregate id, and each lane has exactly one consumer task. Events of one
//! aggregate therefore reach the handlers in version order; lanes run
//! independently of each other.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use bunkhouse_core::AggregateId;

use crate::config::ProjectionRetryOptions;
use crate::dispatcher::{DispatchError, EventHandler, HandlerRegistry};
use crate::event_store::StoredEvent;

/// Counts queued-but-unfinished events so callers can wait for the lanes to drain.
#[derive(Debug, Default)]
struct IdleTracker {
    pending: AtomicUsize,
    notify: Notify,
}

impl IdleTracker {
    fn start_one(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    /// Marks one queued event as in flight until the returned guard drops.
    fn in_flight(self: &Arc<Self>) -> InFlight {
        InFlight(self.clone())
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Decrements the pending count on drop, including when delivery panics.
struct InFlight(Arc<IdleTracker>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.finish_one();
    }
}

/// Handle to the running lanes.
#[derive(Debug)]
pub struct ProjectionLanes {
    senders: Vec<mpsc::UnboundedSender<StoredEvent>>,
    workers: Vec<JoinHandle<()>>,
    idle: Arc<IdleTracker>,
}

impl ProjectionLanes {
    /// Spawn `lanes` consumer tasks on the current tokio runtime.
    pub fn spawn(
        registry: Arc<HandlerRegistry>,
        lanes: usize,
        retry: ProjectionRetryOptions,
    ) -> Result<Self, DispatchError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;
        let lanes = lanes.max(1);
        let idle = Arc::new(IdleTracker::default());

        let mut senders = Vec::with_capacity(lanes);
        let mut workers = Vec::with_capacity(lanes);
        for lane in 0..lanes {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            workers.push(runtime.spawn(run_lane(lane, rx, registry.clone(), retry.clone(), idle.clone())));
        }

        debug!(lanes, "deferred projection lanes started");
        Ok(Self { senders, workers, idle })
    }

    pub fn lane_count(&self) -> usize {
        self.senders.len()
    }

    /// Lane for an aggregate; stable for the lifetime of the process.
    pub fn lane_for(&self, aggregate_id: AggregateId) -> usize {
        (aggregate_id.as_uuid().as_u128() % self.senders.len() as u128) as usize
    }

    pub fn enqueue(&self, event: StoredEvent) -> Result<(), DispatchError> {
        let lane = self.lane_for(event.aggregate_id);
        self.idle.start_one();
        if self.senders[lane].send(event).is_err() {
            self.idle.finish_one();
            return Err(DispatchError::QueueClosed);
        }
        Ok(())
    }

    /// Resolves once every queued event has been handled (or dropped after its retries).
    pub async fn wait_idle(&self) {
        self.idle.wait().await;
    }

    /// Close the lanes and wait for the queued events to drain.
    pub async fn shutdown(self) {
        let Self { senders, workers, .. } = self;
        drop(senders);
        for worker in workers {
            if let Err(err) = worker.await {
                error!(error = %err, "projection lane terminated abnormally");
            }
        }
    }
}

async fn run_lane(
    lane: usize,
    mut rx: mpsc::UnboundedReceiver<StoredEvent>,
    registry: Arc<HandlerRegistry>,
    retry: ProjectionRetryOptions,
    idle: Arc<IdleTracker>,
) {
    while let Some(event) = rx.recv().await {
        let _in_flight = idle.in_flight();
        let handlers = registry.handlers_for(&event.event_type).to_vec();
        if handlers.is_empty() {
            continue;
        }

        let aggregate_id = event.aggregate_id;
        let version = event.version;
        let retry = retry.clone();
        // A panicking handler fails only its own task; the lane moves on to the next event.
        let delivery = tokio::spawn(async move {
            for handler in handlers {
                deliver_with_retry(lane, handler.as_ref(), &event, &retry).await;
            }
        });
        if let Err(err) = delivery.await {
            error!(lane, %aggregate_id, version, error = %err, "projection handler panicked; event dropped from queue");
        }
    }
    debug!(lane, "projection lane stopped");
}

/// Returns whether the handler eventually succeeded.
async fn deliver_with_retry(
    lane: usize,
    handler: &dyn EventHandler,
    event: &StoredEvent,
    retry: &ProjectionRetryOptions,
) -> bool {
    let mut retries = 0;
    loop {
        match handler.handle(event).await {
            Ok(()) => return true,
            Err(err) if retries < retry.max_retry_attempts => {
                retries += 1;
                let delay = retry.delay_for(retries);
                warn!(
                    lane,
                    handler = handler.name(),
                    aggregate_id = %event.aggregate_id,
                    event_type = %event.event_type,
                    version = event.version,
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "projection failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                error!(
                    lane,
                    handler = handler.name(),
                    aggregate_id = %event.aggregate_id,
                    event_type = %event.event_type,
                    version = event.version,
                    attempts = retries + 1,
                    error = %err,
                    "projection failed after retries; event dropped from queue"
                );
                return false;
            }
        }
    }
}
