//! nodescale-autoscale — metric-driven node group sizing.
//!
//! Each `ScalingSpec` in the state store is reconciled on its own: query
//! the metric, read the group size, compute the desired size, apply it,
//! publish status. Ticks are triggered through a per-key deduplicating
//! work queue fed by API events, node group size changes and a periodic
//! resync.
//!
//! # Scaling Algorithm
//!
//! ```text
//! raw     = query(spec.metric.query)
//! desired = ceil(current * normalize(raw, semantics) / target)   // clamped at 0
//! desired = clamp(desired, min_replicas, max_replicas)
//! ```
//!
//! A failed or empty metric query never changes the group size.

pub mod controller;
pub mod decision;
pub mod queue;
pub mod reconciler;

pub use controller::Controller;
pub use decision::{InvalidBoundsError, InvalidTargetError, ReplicaBounds, compute_desired};
pub use queue::WorkQueue;
pub use reconciler::{ReconcileError, Reconciler, TickOutcome};
