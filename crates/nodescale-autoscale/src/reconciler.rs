//! Per-spec reconciliation tick.
//!
//! A tick moves a spec's status through `Pending` → `Healthy` ⇄ `Degraded`:
//!
//! 1. query the metric; failure or no data keeps the previous desired size
//! 2. read the node group's current size
//! 3. compute the desired size, then apply the replica bounds
//! 4. if it differs from current, request it; the desired size is published
//!    even when the request fails
//! 5. publish `Healthy` with current, desired and a timestamp
//!
//! Every failure lands in the `Ready` condition. The returned error only
//! tells the controller whether to retry with backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nodescale_cloud::{NodeGroupCapability, NodeGroupError};
use nodescale_core::{Interrupted, bounded};
use nodescale_metrics::{MetricError, MetricSource};
use nodescale_state::{
    CONDITION_READY, ConditionStatus, ScalingPhase, ScalingSpec, ScalingStatus, StateError,
    StateStore,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::decision::{InvalidBoundsError, InvalidTargetError, ReplicaBounds, compute_desired};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("metric query failed: {0}")]
    MetricQuery(MetricError),

    #[error("metric query returned no data")]
    MetricUnavailable,

    #[error("reading node group size failed: {0}")]
    NodeGroupUnavailable(NodeGroupError),

    #[error(transparent)]
    InvalidTarget(#[from] InvalidTargetError),

    #[error(transparent)]
    InvalidBounds(#[from] InvalidBoundsError),

    #[error("scaling to {desired} replicas failed: {source}")]
    ScaleFailed {
        desired: u32,
        #[source]
        source: NodeGroupError,
    },

    #[error("tick cancelled")]
    Cancelled,

    #[error("state store: {0}")]
    State(#[from] StateError),
}

impl ReconcileError {
    /// Configuration problems and shutdown are not retried; a spec update
    /// re-triggers the former.
    pub fn is_retryable(&self) -> bool {
        !self.is_configuration_error() && !matches!(self, ReconcileError::Cancelled)
    }

    /// The spec itself is unusable until it is changed.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ReconcileError::InvalidTarget(_) | ReconcileError::InvalidBounds(_)
        )
    }

    /// Condition reason published for this failure.
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::MetricQuery(_) => "MetricQueryFailed",
            ReconcileError::MetricUnavailable => "MetricUnavailable",
            ReconcileError::NodeGroupUnavailable(_) => "NodeGroupUnavailable",
            ReconcileError::InvalidTarget(_) => "InvalidTarget",
            ReconcileError::InvalidBounds(_) => "InvalidBounds",
            ReconcileError::ScaleFailed { .. } => "ScaleFailed",
            ReconcileError::Cancelled => "Cancelled",
            ReconcileError::State(_) => "StateUnavailable",
        }
    }

    fn metric(err: MetricError) -> Self {
        match err {
            MetricError::Interrupted(Interrupted::Cancelled) => ReconcileError::Cancelled,
            other => ReconcileError::MetricQuery(other),
        }
    }

    fn node_group(err: NodeGroupError) -> Self {
        match err {
            NodeGroupError::Interrupted(Interrupted::Cancelled) => ReconcileError::Cancelled,
            other => ReconcileError::NodeGroupUnavailable(other),
        }
    }

    fn scale(desired: u32, err: NodeGroupError) -> Self {
        match err {
            NodeGroupError::Interrupted(Interrupted::Cancelled) => ReconcileError::Cancelled,
            source => ReconcileError::ScaleFailed { desired, source },
        }
    }
}

/// What a successful tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Scaled { from: u32, to: u32 },
    InSync { replicas: u32 },
    /// The spec no longer exists; its status was removed.
    Deleted,
}

pub struct Reconciler {
    store: StateStore,
    metrics: Arc<dyn MetricSource>,
    node_groups: Arc<dyn NodeGroupCapability>,
    call_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        store: StateStore,
        metrics: Arc<dyn MetricSource>,
        node_groups: Arc<dyn NodeGroupCapability>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            metrics,
            node_groups,
            call_timeout,
        }
    }

    async fn call<T, E, F>(&self, cancel: &CancellationToken, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<Interrupted>,
    {
        bounded(cancel, self.call_timeout, fut).await?
    }

    /// Run one tick for the spec called `name` and persist its status.
    pub async fn reconcile(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<TickOutcome, ReconcileError> {
        let Some(spec) = self.store.get_autoscaler(name)? else {
            self.store.delete_status(name)?;
            debug!(autoscaler = %name, "spec gone, status removed");
            return Ok(TickOutcome::Deleted);
        };

        let mut status = self.store.get_status(name)?.unwrap_or_default();
        let previous_phase = status.phase;
        let result = self.tick(&spec, &mut status, cancel).await;

        let now = Utc::now();
        status.last_tick_time = Some(now);
        status.rejected_spec_version = match &result {
            Err(e) if e.is_configuration_error() => Some(spec.updated_at),
            _ => None,
        };
        match &result {
            Ok(outcome) => {
                status.phase = ScalingPhase::Healthy;
                let (reason, message) = match outcome {
                    TickOutcome::Scaled { from, to } => {
                        status.last_scale_time = Some(now);
                        ("Scaled", format!("scaled from {from} to {to} replicas"))
                    }
                    _ => ("ReplicasInSync", String::new()),
                };
                status.set_condition(CONDITION_READY, ConditionStatus::True, reason, &message, now);
            }
            Err(e) => {
                status.phase = ScalingPhase::Degraded;
                status.set_condition(
                    CONDITION_READY,
                    ConditionStatus::False,
                    e.reason(),
                    &e.to_string(),
                    now,
                );
            }
        }

        if previous_phase != status.phase {
            info!(autoscaler = %name, from = ?previous_phase, to = ?status.phase, "phase changed");
        }

        // A delete racing this tick must not leave an orphaned status behind.
        if self.store.get_autoscaler(name)?.is_none() {
            self.store.delete_status(name)?;
            return Ok(TickOutcome::Deleted);
        }
        self.store.put_status(name, &status)?;

        match &result {
            Ok(outcome) => debug!(autoscaler = %name, ?outcome, "tick complete"),
            Err(e) => warn!(autoscaler = %name, reason = e.reason(), error = %e, "tick degraded"),
        }
        result
    }

    async fn tick(
        &self,
        spec: &ScalingSpec,
        status: &mut ScalingStatus,
        cancel: &CancellationToken,
    ) -> Result<TickOutcome, ReconcileError> {
        let raw = self
            .call(cancel, self.metrics.query(&spec.metric.query))
            .await
            .map_err(|e| {
                status.metric_value = None;
                ReconcileError::metric(e)
            })?;
        let Some(raw) = raw else {
            status.metric_value = None;
            return Err(ReconcileError::MetricUnavailable);
        };
        let metric = spec.metric.semantics.normalize(raw);
        status.metric_value = Some(metric);

        let current = self
            .call(cancel, self.node_groups.get_replicas(&spec.node_group))
            .await
            .map_err(ReconcileError::node_group)?;
        status.current_replicas = Some(current);

        let bounds = ReplicaBounds::new(spec.min_replicas, spec.max_replicas)?;
        let desired = bounds.apply(compute_desired(
            current,
            raw,
            spec.metric.target,
            spec.metric.semantics,
        )?);
        status.desired_replicas = Some(desired);
        debug!(
            autoscaler = %spec.name,
            node_group = %spec.node_group,
            metric,
            target = spec.metric.target,
            current,
            desired,
            "desired size computed"
        );

        if desired == current {
            return Ok(TickOutcome::InSync { replicas: current });
        }

        self.call(cancel, self.node_groups.set_replicas(&spec.node_group, desired))
            .await
            .map_err(|e| ReconcileError::scale(desired, e))?;
        status.current_replicas = Some(desired);
        info!(node_group = %spec.node_group, from = current, to = desired, "node group scaled");
        Ok(TickOutcome::Scaled {
            from: current,
            to: desired,
        })
    }
}
