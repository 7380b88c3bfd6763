//! Seeding `[[autoscalers]]` from the config file into the store.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use nodescale_autoscale::ReplicaBounds;
use nodescale_core::config::AutoscalerConfig;
use nodescale_state::{MetricTarget, ScalingSpec, StateStore};
use tracing::info;

/// Build a spec from its config entry, validating what the store would
/// otherwise accept blindly.
pub fn spec_from_config(entry: &AutoscalerConfig, now: u64) -> anyhow::Result<ScalingSpec> {
    ReplicaBounds::new(entry.min_replicas, entry.max_replicas)
        .with_context(|| format!("autoscaler {:?}", entry.name))?;

    Ok(ScalingSpec {
        name: entry.name.clone(),
        node_group: entry.node_group.clone(),
        metric: MetricTarget {
            query: entry.query.clone(),
            semantics: entry.semantics,
            target: entry.target,
        },
        min_replicas: entry.min_replicas,
        max_replicas: entry.max_replicas,
        created_at: now,
        updated_at: now,
    })
}

/// Write every configured autoscaler, keeping `created_at` of specs that
/// already exist. Specs created through the API are left untouched.
pub fn seed_autoscalers(store: &StateStore, entries: &[AutoscalerConfig]) -> anyhow::Result<usize> {
    let now = epoch_secs();
    for entry in entries {
        let mut spec = spec_from_config(entry, now)?;
        if let Some(existing) = store.get_autoscaler(&spec.name)? {
            spec.created_at = existing.created_at;
        }
        store.put_autoscaler(&spec)?;
        info!(autoscaler = %spec.name, node_group = %spec.node_group, "autoscaler seeded");
    }
    Ok(entries.len())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
