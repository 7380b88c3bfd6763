//! Domain types for nodescale.
//!
//! Scaling specs and their published status drive the reconciler; the
//! bootstrap types describe the cloud resources a node group needs before
//! it can accept capacity changes. All types are serializable to/from JSON
//! for storage in redb tables and for the HTTP API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque key of a scalable group of nodes. Immutable once assigned.
pub type NodeGroupId = String;

// ── Scaling ───────────────────────────────────────────────────────

/// How the metric behind a [`MetricTarget`] was sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSemantics {
    /// Per-node utilization reported as a ratio (0.85) against a
    /// percentage target (60).
    AverageUtilization,
    /// Aggregate value divided across nodes, e.g. queue depth per node.
    AverageValue,
    /// Raw value compared directly against the target.
    Value,
}

impl MetricSemantics {
    /// Convert a raw sample into the unit the target is expressed in.
    pub fn normalize(self, raw: f64) -> f64 {
        match self {
            MetricSemantics::AverageUtilization => raw * 100.0,
            MetricSemantics::AverageValue | MetricSemantics::Value => raw,
        }
    }
}

/// Metric query plus the value it should be held at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricTarget {
    /// Handed verbatim to the metric source.
    pub query: String,
    pub semantics: MetricSemantics,
    /// Must be positive; checked when the tick computes a size.
    pub target: f64,
}

/// Declares how one node group is sized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingSpec {
    pub name: String,
    pub node_group: NodeGroupId,
    pub metric: MetricTarget,
    /// Floor applied after the target-tracking computation.
    #[serde(default)]
    pub min_replicas: Option<u32>,
    /// Ceiling applied after the target-tracking computation.
    #[serde(default)]
    pub max_replicas: Option<u32>,
    /// Unix timestamp (seconds) when this spec was created.
    #[serde(default)]
    pub created_at: u64,
    /// Unix timestamp (seconds) when this spec was last updated.
    #[serde(default)]
    pub updated_at: u64,
}

/// Lifecycle of a spec as seen by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScalingPhase {
    /// No tick has completed yet.
    #[default]
    Pending,
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Condition type published on every status.
pub const CONDITION_READY: &str = "Ready";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Observed state of a spec, written only by its reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScalingStatus {
    pub phase: ScalingPhase,
    pub current_replicas: Option<u32>,
    pub desired_replicas: Option<u32>,
    /// Normalized metric value used for the last computation.
    pub metric_value: Option<f64>,
    pub last_scale_time: Option<DateTime<Utc>>,
    pub last_tick_time: Option<DateTime<Utc>>,
    /// `updated_at` of a spec version rejected as misconfigured. Periodic
    /// resyncs leave the spec alone until it changes.
    #[serde(default)]
    pub rejected_spec_version: Option<u64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ScalingStatus {
    /// Upsert a condition. The transition time only moves when `status`
    /// changes.
    pub fn set_condition(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        now: DateTime<Utc>,
    ) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason.to_string();
                existing.message = message.to_string();
            }
            None => self.conditions.push(Condition {
                condition_type: condition_type.to_string(),
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
            }),
        }
    }

    /// Whether `spec_version` is the version last rejected as misconfigured.
    pub fn rejects(&self, spec_version: u64) -> bool {
        self.rejected_spec_version == Some(spec_version)
    }

    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

// ── Bootstrap ─────────────────────────────────────────────────────

/// What the cluster descriptor lookup returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterDescriptor {
    pub name: String,
    /// API server endpoint nodes join through.
    pub endpoint: String,
    /// Base64 certificate authority bundle.
    pub certificate_authority: String,
    pub security_group_ids: Vec<String>,
    pub cluster_security_group_id: Option<String>,
    pub subnet_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Role {
    pub name: String,
    pub arn: String,
    /// JSON trust policy document.
    pub assume_role_policy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceProfile {
    pub name: String,
    pub arn: String,
    /// Role names bound to the profile; at most one.
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchTemplateData {
    pub image_id: String,
    pub instance_profile_name: String,
    pub security_group_ids: Vec<String>,
    /// Base64-encoded boot script.
    pub user_data: String,
    /// Tags applied to instances launched from the template.
    pub instance_tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchTemplate {
    pub id: String,
    pub name: String,
    pub data: LaunchTemplateData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Subnet {
    pub id: String,
    pub zone: String,
}

/// The entry the auth registration holds for the node role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthRegistration {
    pub role_arn: String,
    pub username: String,
    pub groups: Vec<String>,
}

/// Everything a node group needs before it can accept capacity changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BootstrapState {
    pub cluster: ClusterDescriptor,
    pub role: Role,
    pub attached_policies: Vec<String>,
    pub instance_profile: InstanceProfile,
    pub launch_template: LaunchTemplate,
    /// Zone → the one subnet nodes in that zone launch into.
    pub zonal_subnets: BTreeMap<String, Subnet>,
    pub auth: AuthRegistration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn utilization_is_scaled_to_percent() {
        assert!((MetricSemantics::AverageUtilization.normalize(0.85) - 85.0).abs() < 1e-9);
        assert_eq!(MetricSemantics::AverageValue.normalize(41.0), 41.0);
        assert_eq!(MetricSemantics::Value.normalize(3.5), 3.5);
    }

    #[test]
    fn condition_transition_time_moves_only_on_status_change() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 2, 0).unwrap();

        let mut status = ScalingStatus::default();
        status.set_condition(CONDITION_READY, ConditionStatus::False, "MetricUnavailable", "", t0);
        status.set_condition(CONDITION_READY, ConditionStatus::False, "ScaleFailed", "", t1);

        let ready = status.condition(CONDITION_READY).unwrap();
        assert_eq!(ready.reason, "ScaleFailed");
        assert_eq!(ready.last_transition_time, t0);

        status.set_condition(CONDITION_READY, ConditionStatus::True, "ReplicasInSync", "", t2);
        let ready = status.condition(CONDITION_READY).unwrap();
        assert_eq!(ready.last_transition_time, t2);
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn spec_deserializes_without_optional_fields() {
        let json = r#"{
            "name": "queue",
            "node_group": "workers",
            "metric": {"query": "sum(queue_depth)", "semantics": "average_value", "target": 4.0}
        }"#;
        let spec: ScalingSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.metric.semantics, MetricSemantics::AverageValue);
        assert_eq!(spec.min_replicas, None);
        assert_eq!(spec.created_at, 0);
    }
}
