//! Simulated control plane.
//!
//! An in-memory implementation of every control-plane trait, with one-shot
//! fault injection, artificial latency and per-operation call counters.
//! `nodescaled` runs against it when `provider.kind = "simulated"`, and the
//! test suites use it to assert exactly which calls a run made.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use nodescale_core::config::SimulatedProviderConfig;
use nodescale_state::{
    ClusterDescriptor, InstanceProfile, LaunchTemplate, LaunchTemplateData, Role, Subnet,
};
use tokio::sync::broadcast;
use tracing::debug;

use crate::api::{
    AuthDocument, AuthStore, AutoScalingApi, ClusterApi, IdentityApi, LaunchTemplateApi,
    NetworkApi,
};
use crate::capability::NodeGroupChange;
use crate::error::CloudError;

/// Account id used in simulated ARNs.
pub const SIMULATED_ACCOUNT_ID: &str = "000000000000";

/// Every call the simulated control plane serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    DescribeCluster,
    GetRole,
    CreateRole,
    AttachRolePolicy,
    ListAttachedRolePolicies,
    GetInstanceProfile,
    CreateInstanceProfile,
    AddRoleToInstanceProfile,
    GetLaunchTemplate,
    CreateLaunchTemplate,
    DescribeSubnets,
    GetAuth,
    UpdateAuth,
    DescribeDesiredCapacity,
    SetDesiredCapacity,
}

impl Op {
    /// Whether the operation changes control-plane state.
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            Op::CreateRole
                | Op::AttachRolePolicy
                | Op::CreateInstanceProfile
                | Op::AddRoleToInstanceProfile
                | Op::CreateLaunchTemplate
                | Op::UpdateAuth
                | Op::SetDesiredCapacity
        )
    }
}

#[derive(Default)]
struct Inner {
    clusters: HashMap<String, ClusterDescriptor>,
    roles: BTreeMap<String, Role>,
    role_policies: HashMap<String, Vec<String>>,
    profiles: BTreeMap<String, InstanceProfile>,
    templates: BTreeMap<String, LaunchTemplate>,
    subnets: HashMap<String, Subnet>,
    auth: AuthDocument,
    node_groups: HashMap<String, u32>,
    faults: HashMap<Op, VecDeque<CloudError>>,
    calls: HashMap<Op, u32>,
    latency: Duration,
    next_id: u64,
}

/// Cheaply cloneable handle; clones share state.
#[derive(Clone)]
pub struct SimulatedCloud {
    inner: Arc<Mutex<Inner>>,
    node_group_events: broadcast::Sender<NodeGroupChange>,
}

impl Default for SimulatedCloud {
    fn default() -> Self {
        let (node_group_events, _) = broadcast::channel(64);
        Self {
            inner: Arc::default(),
            node_group_events,
        }
    }
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a control plane from the daemon's provider config.
    pub fn from_config(cluster_name: &str, config: &SimulatedProviderConfig) -> Self {
        let cloud = Self::new();
        for subnet in &config.subnets {
            cloud.add_subnet(&subnet.id, &subnet.zone);
        }
        cloud.add_cluster(ClusterDescriptor {
            name: cluster_name.to_string(),
            endpoint: config.endpoint.clone(),
            certificate_authority: config.certificate_authority.clone(),
            security_group_ids: config.security_group_ids.clone(),
            cluster_security_group_id: config.cluster_security_group_id.clone(),
            subnet_ids: config.subnets.iter().map(|s| s.id.clone()).collect(),
        });
        for group in &config.node_groups {
            cloud.add_node_group(&group.id, group.replicas);
        }
        cloud
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Seeding and inspection ─────────────────────────────────────

    pub fn add_cluster(&self, cluster: ClusterDescriptor) {
        self.state().clusters.insert(cluster.name.clone(), cluster);
    }

    pub fn add_subnet(&self, id: &str, zone: &str) {
        self.state().subnets.insert(
            id.to_string(),
            Subnet {
                id: id.to_string(),
                zone: zone.to_string(),
            },
        );
    }

    pub fn add_node_group(&self, id: &str, replicas: u32) {
        self.state().node_groups.insert(id.to_string(), replicas);
    }

    /// Resize a group as another actor would (a console edit, a scheduled
    /// action). Subscribers to [`Self::node_group_events`] are told; callers
    /// of `set_desired_capacity` are not, since they made the change.
    pub fn resize_node_group(&self, id: &str, replicas: u32) {
        self.state().node_groups.insert(id.to_string(), replicas);
        // No subscribers is fine.
        let _ = self.node_group_events.send(NodeGroupChange {
            node_group: id.to_string(),
            replicas,
        });
    }

    /// Out-of-band node group size changes.
    pub fn node_group_events(&self) -> broadcast::Receiver<NodeGroupChange> {
        self.node_group_events.subscribe()
    }

    pub fn node_group_replicas(&self, id: &str) -> Option<u32> {
        self.state().node_groups.get(id).copied()
    }

    /// Set a key of the auth document directly, as another actor would.
    pub fn set_auth_data(&self, key: &str, value: &str) {
        let mut state = self.state();
        state.auth.data.insert(key.to_string(), value.to_string());
        state.auth.resource_version += 1;
    }

    pub fn auth_document(&self) -> AuthDocument {
        self.state().auth.clone()
    }

    pub fn role_policies(&self, role: &str) -> Vec<String> {
        self.state()
            .role_policies
            .get(role)
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next call of `op` fail with `err`. Queued faults fire in order.
    pub fn fail_next(&self, op: Op, err: CloudError) {
        self.state().faults.entry(op).or_default().push_back(err);
    }

    /// Delay every subsequent call.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// How many times `op` was invoked, including failed attempts.
    pub fn calls(&self, op: Op) -> u32 {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// Total number of mutating calls served.
    pub fn mutation_count(&self) -> u32 {
        self.state()
            .calls
            .iter()
            .filter(|(op, _)| op.is_mutation())
            .map(|(_, n)| n)
            .sum()
    }

    /// Record the call, apply latency, and pop an injected fault.
    async fn begin(&self, op: Op) -> Result<(), CloudError> {
        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state();
        *state.calls.entry(op).or_insert(0) += 1;
        if let Some(err) = state.faults.get_mut(&op).and_then(|q| q.pop_front()) {
            debug!(?op, error = %err, "injected fault");
            return Err(err);
        }
        Ok(())
    }
}

fn arn(kind: &str, name: &str) -> String {
    format!("arn:aws:iam::{SIMULATED_ACCOUNT_ID}:{kind}/{name}")
}

#[async_trait]
impl ClusterApi for SimulatedCloud {
    async fn describe_cluster(&self, name: &str) -> Result<ClusterDescriptor, CloudError> {
        self.begin(Op::DescribeCluster).await?;
        self.state()
            .clusters
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::not_found("cluster", name))
    }
}

#[async_trait]
impl IdentityApi for SimulatedCloud {
    async fn get_role(&self, name: &str) -> Result<Role, CloudError> {
        self.begin(Op::GetRole).await?;
        self.state()
            .roles
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::not_found("role", name))
    }

    async fn create_role(&self, name: &str, assume_role_policy: &str) -> Result<Role, CloudError> {
        self.begin(Op::CreateRole).await?;
        let mut state = self.state();
        if state.roles.contains_key(name) {
            return Err(CloudError::AlreadyExists {
                kind: "role",
                name: name.to_string(),
            });
        }
        let role = Role {
            name: name.to_string(),
            arn: arn("role", name),
            assume_role_policy: assume_role_policy.to_string(),
        };
        state.roles.insert(name.to_string(), role.clone());
        Ok(role)
    }

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<(), CloudError> {
        self.begin(Op::AttachRolePolicy).await?;
        let mut state = self.state();
        if !state.roles.contains_key(role) {
            return Err(CloudError::not_found("role", role));
        }
        let policies = state.role_policies.entry(role.to_string()).or_default();
        if !policies.iter().any(|p| p == policy_arn) {
            policies.push(policy_arn.to_string());
        }
        Ok(())
    }

    async fn list_attached_role_policies(&self, role: &str) -> Result<Vec<String>, CloudError> {
        self.begin(Op::ListAttachedRolePolicies).await?;
        let state = self.state();
        if !state.roles.contains_key(role) {
            return Err(CloudError::not_found("role", role));
        }
        Ok(state.role_policies.get(role).cloned().unwrap_or_default())
    }

    async fn get_instance_profile(&self, name: &str) -> Result<InstanceProfile, CloudError> {
        self.begin(Op::GetInstanceProfile).await?;
        self.state()
            .profiles
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::not_found("instance profile", name))
    }

    async fn create_instance_profile(&self, name: &str) -> Result<InstanceProfile, CloudError> {
        self.begin(Op::CreateInstanceProfile).await?;
        let mut state = self.state();
        if state.profiles.contains_key(name) {
            return Err(CloudError::AlreadyExists {
                kind: "instance profile",
                name: name.to_string(),
            });
        }
        let profile = InstanceProfile {
            name: name.to_string(),
            arn: arn("instance-profile", name),
            roles: Vec::new(),
        };
        state.profiles.insert(name.to_string(), profile.clone());
        Ok(profile)
    }

    async fn add_role_to_instance_profile(
        &self,
        profile: &str,
        role: &str,
    ) -> Result<(), CloudError> {
        self.begin(Op::AddRoleToInstanceProfile).await?;
        let mut state = self.state();
        if !state.roles.contains_key(role) {
            return Err(CloudError::not_found("role", role));
        }
        let entry = state
            .profiles
            .get_mut(profile)
            .ok_or_else(|| CloudError::not_found("instance profile", profile))?;
        if !entry.roles.is_empty() {
            return Err(CloudError::Conflict(format!(
                "instance profile {profile} already holds a role"
            )));
        }
        entry.roles.push(role.to_string());
        Ok(())
    }
}

#[async_trait]
impl LaunchTemplateApi for SimulatedCloud {
    async fn get_launch_template(&self, name: &str) -> Result<LaunchTemplate, CloudError> {
        self.begin(Op::GetLaunchTemplate).await?;
        self.state()
            .templates
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::not_found("launch template", name))
    }

    async fn create_launch_template(
        &self,
        name: &str,
        data: &LaunchTemplateData,
    ) -> Result<LaunchTemplate, CloudError> {
        self.begin(Op::CreateLaunchTemplate).await?;
        let mut state = self.state();
        if state.templates.contains_key(name) {
            return Err(CloudError::AlreadyExists {
                kind: "launch template",
                name: name.to_string(),
            });
        }
        state.next_id += 1;
        let template = LaunchTemplate {
            id: format!("lt-{:017x}", state.next_id),
            name: name.to_string(),
            data: data.clone(),
        };
        state.templates.insert(name.to_string(), template.clone());
        Ok(template)
    }
}

#[async_trait]
impl NetworkApi for SimulatedCloud {
    async fn describe_subnets(&self, ids: &[String]) -> Result<Vec<Subnet>, CloudError> {
        self.begin(Op::DescribeSubnets).await?;
        let state = self.state();
        ids.iter()
            .map(|id| {
                state
                    .subnets
                    .get(id)
                    .cloned()
                    .ok_or_else(|| CloudError::not_found("subnet", id))
            })
            .collect()
    }
}

#[async_trait]
impl AuthStore for SimulatedCloud {
    async fn get_auth(&self) -> Result<AuthDocument, CloudError> {
        self.begin(Op::GetAuth).await?;
        Ok(self.state().auth.clone())
    }

    async fn update_auth(&self, doc: &AuthDocument) -> Result<AuthDocument, CloudError> {
        self.begin(Op::UpdateAuth).await?;
        let mut state = self.state();
        if doc.resource_version != state.auth.resource_version {
            return Err(CloudError::Conflict(format!(
                "auth document at version {}, update based on {}",
                state.auth.resource_version, doc.resource_version
            )));
        }
        state.auth = AuthDocument {
            data: doc.data.clone(),
            resource_version: doc.resource_version + 1,
        };
        Ok(state.auth.clone())
    }
}

#[async_trait]
impl AutoScalingApi for SimulatedCloud {
    async fn describe_desired_capacity(&self, group: &str) -> Result<u32, CloudError> {
        self.begin(Op::DescribeDesiredCapacity).await?;
        self.state()
            .node_groups
            .get(group)
            .copied()
            .ok_or_else(|| CloudError::not_found("auto scaling group", group))
    }

    async fn set_desired_capacity(&self, group: &str, capacity: u32) -> Result<(), CloudError> {
        self.begin(Op::SetDesiredCapacity).await?;
        let mut state = self.state();
        let current = state
            .node_groups
            .get_mut(group)
            .ok_or_else(|| CloudError::not_found("auto scaling group", group))?;
        *current = capacity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auth_update_requires_current_version() {
        let cloud = SimulatedCloud::new();
        let mut doc = cloud.get_auth().await.unwrap();
        doc.data.insert("mapRoles".into(), "- rolearn: a".into());

        let stored = cloud.update_auth(&doc).await.unwrap();
        assert_eq!(stored.resource_version, doc.resource_version + 1);

        // Same base version again is stale.
        let err = cloud.update_auth(&doc).await.unwrap_err();
        assert!(matches!(err, CloudError::Conflict(_)));
    }

    #[tokio::test]
    async fn injected_faults_fire_once() {
        let cloud = SimulatedCloud::new();
        cloud.fail_next(Op::GetRole, CloudError::AccessDenied("nope".into()));

        let first = cloud.get_role("r").await.unwrap_err();
        assert!(matches!(first, CloudError::AccessDenied(_)));
        let second = cloud.get_role("r").await.unwrap_err();
        assert!(second.is_not_found());
        assert_eq!(cloud.calls(Op::GetRole), 2);
    }

    #[tokio::test]
    async fn counts_only_mutations() {
        let cloud = SimulatedCloud::new();
        cloud.create_role("r", "{}").await.unwrap();
        cloud.get_role("r").await.unwrap();
        cloud.attach_role_policy("r", "p").await.unwrap();
        cloud.attach_role_policy("r", "p").await.unwrap();

        assert_eq!(cloud.mutation_count(), 3);
        assert_eq!(cloud.role_policies("r"), vec!["p".to_string()]);
    }

    #[tokio::test]
    async fn only_out_of_band_resizes_are_announced() {
        let cloud = SimulatedCloud::new();
        cloud.add_node_group("workers", 1);
        let mut events = cloud.node_group_events();

        cloud.set_desired_capacity("workers", 4).await.unwrap();
        cloud.resize_node_group("workers", 7);

        let change = events.recv().await.unwrap();
        assert_eq!(
            change,
            NodeGroupChange {
                node_group: "workers".into(),
                replicas: 7
            }
        );
        assert!(events.try_recv().is_err());
        assert_eq!(cloud.node_group_replicas("workers"), Some(7));
    }

    #[tokio::test]
    async fn unknown_subnet_is_not_found() {
        let cloud = SimulatedCloud::new();
        cloud.add_subnet("subnet-1", "us-west-2a");
        let err = cloud
            .describe_subnets(&["subnet-1".to_string(), "subnet-9".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
