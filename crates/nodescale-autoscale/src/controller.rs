//! Reconcile controller — worker pool over the work queue.
//!
//! A fixed number of workers pull spec names from the [`WorkQueue`] and run
//! one tick each. Specs are queued by API writes, by size changes of their
//! node group made outside nodescale, and by a resync loop that re-adds
//! every stored spec on an interval.

use std::sync::Arc;
use std::time::Duration;

use nodescale_cloud::NodeGroupChange;
use nodescale_core::config::ControllerSettings;
use nodescale_state::{ScalingSpec, ScalingStatus, StateStore};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;

pub struct Controller {
    reconciler: Arc<Reconciler>,
    store: StateStore,
    queue: Arc<WorkQueue>,
    workers: usize,
    resync_interval: Duration,
    node_group_events: Option<broadcast::Receiver<NodeGroupChange>>,
}

impl Controller {
    pub fn new(reconciler: Reconciler, store: StateStore, settings: &ControllerSettings) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            store,
            queue: WorkQueue::new(settings.base_backoff, settings.max_backoff),
            workers: settings.workers.max(1),
            resync_interval: settings.resync_interval,
            node_group_events: None,
        }
    }

    /// Tick the specs of a node group whenever its size changes.
    pub fn with_node_group_events(mut self, events: broadcast::Receiver<NodeGroupChange>) -> Self {
        self.node_group_events = Some(events);
        self
    }

    /// Handle for event sources (the API) to trigger ticks.
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Run until `cancel` fires, then stop the queue and wait for workers.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            workers = self.workers,
            resync_secs = self.resync_interval.as_secs(),
            "controller started"
        );

        // Initial resync, before any worker can pick a key up.
        self.enqueue_all();

        let mut tasks = JoinSet::new();
        for id in 0..self.workers {
            tasks.spawn(worker(
                id,
                Arc::clone(&self.reconciler),
                Arc::clone(&self.queue),
                cancel.clone(),
            ));
        }

        let start = tokio::time::Instant::now() + self.resync_interval;
        let mut resync = tokio::time::interval_at(start, self.resync_interval);
        let mut events = self.node_group_events.take();
        loop {
            tokio::select! {
                _ = resync.tick() => self.enqueue_all(),
                received = next_change(&mut events) => match received {
                    Ok(change) => self.enqueue_node_group(&change),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "node group events dropped, resyncing");
                        self.enqueue_all();
                    }
                    Err(RecvError::Closed) => {
                        debug!("node group event source closed");
                        events = None;
                    }
                },
                _ = cancel.cancelled() => break,
            }
        }

        self.queue.shutdown();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "reconcile worker panicked");
            }
        }
        info!("controller stopped");
    }

    fn enqueue_all(&self) {
        let queued = self.enqueue_matching(|_, _| true);
        debug!(queued, "resync");
    }

    /// Queue the specs of a resized group, unless their last tick already
    /// saw that size.
    fn enqueue_node_group(&self, change: &NodeGroupChange) {
        let queued = self.enqueue_matching(|spec, status| {
            spec.node_group == change.node_group
                && status.and_then(|s| s.current_replicas) != Some(change.replicas)
        });
        debug!(
            node_group = %change.node_group,
            replicas = change.replicas,
            queued,
            "node group size changed"
        );
    }

    /// Queue stored specs accepted by `wanted`. Versions already rejected
    /// as misconfigured are skipped; they wait for an update.
    fn enqueue_matching<F>(&self, wanted: F) -> usize
    where
        F: Fn(&ScalingSpec, Option<&ScalingStatus>) -> bool,
    {
        let specs = match self.store.list_autoscalers() {
            Ok(specs) => specs,
            Err(e) => {
                warn!(error = %e, "could not list autoscalers");
                return 0;
            }
        };
        let mut queued = 0;
        for spec in specs {
            let status = match self.store.get_status(&spec.name) {
                Ok(status) => status,
                Err(e) => {
                    warn!(autoscaler = %spec.name, error = %e, "status unreadable");
                    None
                }
            };
            if status.as_ref().is_some_and(|s| s.rejects(spec.updated_at)) {
                debug!(autoscaler = %spec.name, "misconfigured spec skipped until updated");
                continue;
            }
            if wanted(&spec, status.as_ref()) {
                self.queue.add(&spec.name);
                queued += 1;
            }
        }
        queued
    }
}

async fn next_change(
    events: &mut Option<broadcast::Receiver<NodeGroupChange>>,
) -> Result<NodeGroupChange, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn worker(
    id: usize,
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
    cancel: CancellationToken,
) {
    debug!(worker = id, "reconcile worker started");
    while let Some(key) = queue.get().await {
        match reconciler.reconcile(&key, &cancel).await {
            Ok(_) => queue.forget(&key),
            Err(e) if e.is_retryable() => {
                let delay = queue.add_rate_limited(&key);
                debug!(autoscaler = %key, retry_in = ?delay, "requeued with backoff");
            }
            Err(e) => {
                queue.forget(&key);
                debug!(autoscaler = %key, reason = e.reason(), "not retried");
            }
        }
        queue.done(&key);
    }
    debug!(worker = id, "reconcile worker stopped");
}
