//! Bootstrap provisioner.
//!
//! Ensures the cloud-side prerequisites of a node group exist: node role
//! with its policies, instance profile, launch template, zonal subnet map
//! and the cluster auth registration. Every step is detect-or-create, so a
//! run that stopped halfway resumes where it left off and a run after
//! success makes only read calls.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use nodescale_core::bounded;
use nodescale_state::{
    AuthRegistration, BootstrapState, ClusterDescriptor, InstanceProfile, LaunchTemplate,
    LaunchTemplateData, Role, Subnet,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{AuthDocument, ControlPlane, MAP_ROLES_KEY};
use crate::error::CloudError;

/// Managed policies attached to the node role, in attachment order.
pub const DEFAULT_NODE_POLICIES: [&str; 4] = [
    "arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore",
    "arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy",
    "arn:aws:iam::aws:policy/AmazonEKS_CNI_Policy",
    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly",
];

/// Node label applied by the boot script.
pub const PROVISIONED_LABEL: &str = "nodescale.dev/provisioned=true";

const NODE_USERNAME: &str = "system:node:{{EC2PrivateDNSName}}";
const NODE_GROUPS: [&str; 2] = ["system:bootstrappers", "system:nodes"];

/// The step a provisioning run failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DescribeCluster,
    GetRole,
    CreateRole,
    ListRolePolicies,
    AttachRolePolicy,
    GetInstanceProfile,
    CreateInstanceProfile,
    AddRoleToInstanceProfile,
    GetLaunchTemplate,
    CreateLaunchTemplate,
    DescribeSubnets,
    ReadAuthRegistration,
    UpdateAuthRegistration,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::DescribeCluster => "describe-cluster",
            Stage::GetRole => "get-role",
            Stage::CreateRole => "create-role",
            Stage::ListRolePolicies => "list-role-policies",
            Stage::AttachRolePolicy => "attach-role-policy",
            Stage::GetInstanceProfile => "get-instance-profile",
            Stage::CreateInstanceProfile => "create-instance-profile",
            Stage::AddRoleToInstanceProfile => "add-role-to-instance-profile",
            Stage::GetLaunchTemplate => "get-launch-template",
            Stage::CreateLaunchTemplate => "create-launch-template",
            Stage::DescribeSubnets => "describe-subnets",
            Stage::ReadAuthRegistration => "read-auth-registration",
            Stage::UpdateAuthRegistration => "update-auth-registration",
        };
        f.write_str(s)
    }
}

/// First fatal error of a run.
#[derive(Debug, Error)]
#[error("bootstrap failed at {stage}: {source}")]
pub struct ProvisionError {
    pub stage: Stage,
    #[source]
    pub source: CloudError,
}

fn at(stage: Stage) -> impl FnOnce(CloudError) -> ProvisionError {
    move |source| ProvisionError { stage, source }
}

#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Name of the node role and of its instance profile.
    pub role_name: String,
    /// Boot image for the launch template.
    pub image_id: String,
    pub policies: Vec<String>,
    /// Deadline for each control-plane call.
    pub call_timeout: Duration,
    /// Extra attempts after a conflicting auth update.
    pub auth_conflict_retries: u32,
}

impl ProvisionerConfig {
    pub fn new(role_name: impl Into<String>, image_id: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            image_id: image_id.into(),
            policies: DEFAULT_NODE_POLICIES.iter().map(|p| p.to_string()).collect(),
            call_timeout: Duration::from_secs(10),
            auth_conflict_retries: 5,
        }
    }
}

pub struct Provisioner {
    plane: ControlPlane,
    config: ProvisionerConfig,
    cancel: CancellationToken,
}

impl Provisioner {
    pub fn new(plane: ControlPlane, config: ProvisionerConfig) -> Self {
        Self {
            plane,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort in-flight calls when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Launch template name for a cluster.
    pub fn launch_template_name(cluster: &str) -> String {
        format!("NodescaleLaunchTemplate-{cluster}")
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, CloudError>
    where
        F: Future<Output = Result<T, CloudError>>,
    {
        bounded(&self.cancel, self.config.call_timeout, fut).await?
    }

    /// Detect or create every prerequisite of `cluster_name`, in order.
    pub async fn ensure(&self, cluster_name: &str) -> Result<BootstrapState, ProvisionError> {
        let cluster = self
            .call(self.plane.clusters.describe_cluster(cluster_name))
            .await
            .map_err(at(Stage::DescribeCluster))?;
        debug!(cluster = %cluster.name, endpoint = %cluster.endpoint, "cluster resolved");

        let (role, attached_policies) = self.ensure_role().await?;
        let instance_profile = self.ensure_instance_profile(&role).await?;
        let launch_template = self
            .ensure_launch_template(&cluster, &instance_profile)
            .await?;
        let zonal_subnets = self.zonal_subnets(&cluster).await?;
        let auth = self.ensure_auth(&role).await?;

        info!(cluster = %cluster.name, role = %role.arn, "bootstrap complete");
        Ok(BootstrapState {
            cluster,
            role,
            attached_policies,
            instance_profile,
            launch_template,
            zonal_subnets,
            auth,
        })
    }

    async fn ensure_role(&self) -> Result<(Role, Vec<String>), ProvisionError> {
        let name = &self.config.role_name;
        let identity = &self.plane.identity;

        let (role, mut attached) = match self.call(identity.get_role(name)).await {
            Ok(role) => {
                info!(role = %role.arn, "role detected");
                let attached = self
                    .call(identity.list_attached_role_policies(name))
                    .await
                    .map_err(at(Stage::ListRolePolicies))?;
                (role, attached)
            }
            Err(e) if e.is_not_found() => {
                match self.call(identity.create_role(name, &trust_policy())).await {
                    Ok(role) => {
                        info!(role = %role.arn, "role created");
                        (role, Vec::new())
                    }
                    Err(e) if e.is_already_exists() => {
                        // Another run created it between our lookup and create.
                        let role = self
                            .call(identity.get_role(name))
                            .await
                            .map_err(at(Stage::GetRole))?;
                        info!(role = %role.arn, "role detected after concurrent create");
                        let attached = self
                            .call(identity.list_attached_role_policies(name))
                            .await
                            .map_err(at(Stage::ListRolePolicies))?;
                        (role, attached)
                    }
                    Err(e) => return Err(at(Stage::CreateRole)(e)),
                }
            }
            Err(e) => return Err(at(Stage::GetRole)(e)),
        };

        for policy in &self.config.policies {
            if attached.contains(policy) {
                continue;
            }
            self.call(identity.attach_role_policy(name, policy))
                .await
                .map_err(at(Stage::AttachRolePolicy))?;
            info!(role = %name, %policy, "policy attached");
            attached.push(policy.clone());
        }

        Ok((role, attached))
    }

    async fn ensure_instance_profile(&self, role: &Role) -> Result<InstanceProfile, ProvisionError> {
        let identity = &self.plane.identity;

        let mut profile = match self.call(identity.get_instance_profile(&role.name)).await {
            Ok(profile) => {
                info!(profile = %profile.arn, "instance profile detected");
                profile
            }
            Err(e) if e.is_not_found() => {
                match self.call(identity.create_instance_profile(&role.name)).await {
                    Ok(profile) => {
                        info!(profile = %profile.arn, "instance profile created");
                        profile
                    }
                    Err(e) if e.is_already_exists() => {
                        let profile = self
                            .call(identity.get_instance_profile(&role.name))
                            .await
                            .map_err(at(Stage::GetInstanceProfile))?;
                        info!(profile = %profile.arn, "instance profile detected after concurrent create");
                        profile
                    }
                    Err(e) => return Err(at(Stage::CreateInstanceProfile)(e)),
                }
            }
            Err(e) => return Err(at(Stage::GetInstanceProfile)(e)),
        };

        if profile.roles.is_empty() {
            match self
                .call(identity.add_role_to_instance_profile(&profile.name, &role.name))
                .await
            {
                Ok(()) => {
                    info!(profile = %profile.name, role = %role.name, "role added to instance profile");
                    profile.roles.push(role.name.clone());
                }
                Err(CloudError::Conflict(reason)) => {
                    // Bound meanwhile; fine if it was bound to our role.
                    debug!(profile = %profile.name, %reason, "instance profile bound concurrently");
                    profile = self
                        .call(identity.get_instance_profile(&role.name))
                        .await
                        .map_err(at(Stage::GetInstanceProfile))?;
                }
                Err(e) => return Err(at(Stage::AddRoleToInstanceProfile)(e)),
            }
        }

        match profile.roles.as_slice() {
            [bound] if *bound == role.name => Ok(profile),
            other => Err(at(Stage::AddRoleToInstanceProfile)(CloudError::Conflict(
                format!(
                    "instance profile {} is bound to {:?}, expected {}",
                    profile.name, other, role.name
                ),
            ))),
        }
    }

    async fn ensure_launch_template(
        &self,
        cluster: &ClusterDescriptor,
        profile: &InstanceProfile,
    ) -> Result<LaunchTemplate, ProvisionError> {
        let name = Self::launch_template_name(&cluster.name);
        let api = &self.plane.launch_templates;

        match self.call(api.get_launch_template(&name)).await {
            Ok(template) => {
                info!(template = %template.name, id = %template.id, "launch template detected");
                Ok(template)
            }
            Err(e) if e.is_not_found() => {
                let data = self.launch_template_data(cluster, profile);
                match self.call(api.create_launch_template(&name, &data)).await {
                    Ok(template) => {
                        info!(template = %template.name, id = %template.id, "launch template created");
                        Ok(template)
                    }
                    Err(e) if e.is_already_exists() => {
                        let template = self
                            .call(api.get_launch_template(&name))
                            .await
                            .map_err(at(Stage::GetLaunchTemplate))?;
                        info!(template = %template.name, id = %template.id, "launch template detected after concurrent create");
                        Ok(template)
                    }
                    Err(e) => Err(at(Stage::CreateLaunchTemplate)(e)),
                }
            }
            Err(e) => Err(at(Stage::GetLaunchTemplate)(e)),
        }
    }

    fn launch_template_data(
        &self,
        cluster: &ClusterDescriptor,
        profile: &InstanceProfile,
    ) -> LaunchTemplateData {
        let mut security_group_ids = cluster.security_group_ids.clone();
        if let Some(id) = &cluster.cluster_security_group_id {
            if !security_group_ids.contains(id) {
                security_group_ids.push(id.clone());
            }
        }

        let mut instance_tags = BTreeMap::new();
        instance_tags.insert(
            format!("kubernetes.io/cluster/{}", cluster.name),
            "owned".to_string(),
        );

        LaunchTemplateData {
            image_id: self.config.image_id.clone(),
            instance_profile_name: profile.name.clone(),
            security_group_ids,
            user_data: STANDARD.encode(boot_script(cluster)),
            instance_tags,
        }
    }

    async fn zonal_subnets(
        &self,
        cluster: &ClusterDescriptor,
    ) -> Result<BTreeMap<String, Subnet>, ProvisionError> {
        if cluster.subnet_ids.is_empty() {
            debug!(cluster = %cluster.name, "cluster declares no subnets");
            return Ok(BTreeMap::new());
        }
        let subnets = self
            .call(self.plane.network.describe_subnets(&cluster.subnet_ids))
            .await
            .map_err(at(Stage::DescribeSubnets))?;
        let zonal = group_by_zone(subnets);
        debug!(zones = zonal.len(), "zonal subnets discovered");
        Ok(zonal)
    }

    async fn ensure_auth(&self, role: &Role) -> Result<AuthRegistration, ProvisionError> {
        let registration = AuthRegistration {
            role_arn: role.arn.clone(),
            username: NODE_USERNAME.to_string(),
            groups: NODE_GROUPS.iter().map(|g| g.to_string()).collect(),
        };
        let store = &self.plane.auth;

        let mut attempt = 0;
        loop {
            let doc = self
                .call(store.get_auth())
                .await
                .map_err(at(Stage::ReadAuthRegistration))?;
            let current = doc.data.get(MAP_ROLES_KEY).map(String::as_str).unwrap_or("");
            if current.contains(&role.arn) {
                info!(role = %role.arn, "auth registration detected");
                return Ok(registration);
            }

            let mut data = doc.data.clone();
            data.insert(
                MAP_ROLES_KEY.to_string(),
                format!("{current}{}", map_roles_entry(&role.arn)),
            );
            let updated = AuthDocument {
                data,
                resource_version: doc.resource_version,
            };

            match self.call(store.update_auth(&updated)).await {
                Ok(_) => {
                    info!(role = %role.arn, "auth registration created");
                    return Ok(registration);
                }
                Err(CloudError::Conflict(reason)) if attempt < self.config.auth_conflict_retries => {
                    attempt += 1;
                    debug!(attempt, %reason, "auth registration changed underneath, retrying");
                }
                Err(e) => return Err(at(Stage::UpdateAuthRegistration)(e)),
            }
        }
    }
}

/// Trust policy letting EC2 instances assume the node role.
fn trust_policy() -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "ec2.amazonaws.com" },
            "Action": "sts:AssumeRole",
        }],
    })
    .to_string()
}

fn boot_script(cluster: &ClusterDescriptor) -> String {
    format!(
        "#!/bin/bash\n\
         yum install -y https://s3.amazonaws.com/ec2-downloads-windows/SSMAgent/latest/linux_amd64/amazon-ssm-agent.rpm\n\
         /etc/eks/bootstrap.sh {name} \\\n  \
         --kubelet-extra-args '--node-labels={label}' \\\n  \
         --b64-cluster-ca {ca} \\\n  \
         --apiserver-endpoint {endpoint}\n",
        name = cluster.name,
        label = PROVISIONED_LABEL,
        ca = cluster.certificate_authority,
        endpoint = cluster.endpoint,
    )
}

// The authenticator parses mapRoles as YAML; the indentation is load-bearing.
fn map_roles_entry(role_arn: &str) -> String {
    format!(
        "\n- groups:\n  - system:bootstrappers\n  - system:nodes\n  rolearn: {role_arn}\n  username: {NODE_USERNAME}"
    )
}

/// One subnet per zone, the lowest id winning.
fn group_by_zone(subnets: Vec<Subnet>) -> BTreeMap<String, Subnet> {
    let mut zonal: BTreeMap<String, Subnet> = BTreeMap::new();
    for subnet in subnets {
        match zonal.get(&subnet.zone) {
            Some(kept) if kept.id <= subnet.id => {}
            _ => {
                zonal.insert(subnet.zone.clone(), subnet);
            }
        }
    }
    zonal
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::simulated::{Op, SimulatedCloud};

    const CLUSTER: &str = "prod";

    fn seeded() -> SimulatedCloud {
        let cloud = SimulatedCloud::new();
        cloud.add_subnet("subnet-b", "us-west-2a");
        cloud.add_subnet("subnet-a", "us-west-2a");
        cloud.add_subnet("subnet-c", "us-west-2b");
        cloud.add_cluster(ClusterDescriptor {
            name: CLUSTER.into(),
            endpoint: "https://api.prod.example".into(),
            certificate_authority: "Q0FEQVRB".into(),
            security_group_ids: vec!["sg-1".into()],
            cluster_security_group_id: Some("sg-cluster".into()),
            subnet_ids: vec!["subnet-b".into(), "subnet-a".into(), "subnet-c".into()],
        });
        cloud
    }

    fn provisioner(cloud: &SimulatedCloud) -> Provisioner {
        Provisioner::new(
            ControlPlane::from_single(Arc::new(cloud.clone())),
            ProvisionerConfig::new("NodescaleNodeRole", "ami-123"),
        )
    }

    #[tokio::test]
    async fn first_run_creates_everything() {
        let cloud = seeded();
        let state = provisioner(&cloud).ensure(CLUSTER).await.unwrap();

        assert_eq!(state.role.name, "NodescaleNodeRole");
        assert_eq!(state.attached_policies.len(), 4);
        assert_eq!(state.instance_profile.roles, vec!["NodescaleNodeRole".to_string()]);
        assert_eq!(state.launch_template.name, "NodescaleLaunchTemplate-prod");
        assert_eq!(
            state.launch_template.data.security_group_ids,
            vec!["sg-1".to_string(), "sg-cluster".to_string()]
        );
        assert_eq!(
            state.launch_template.data.instance_tags.get("kubernetes.io/cluster/prod"),
            Some(&"owned".to_string())
        );

        let script = STANDARD.decode(&state.launch_template.data.user_data).unwrap();
        let script = String::from_utf8(script).unwrap();
        assert!(script.contains("/etc/eks/bootstrap.sh prod"));
        assert!(script.contains("--b64-cluster-ca Q0FEQVRB"));
        assert!(script.contains("--apiserver-endpoint https://api.prod.example"));
        assert!(script.contains(PROVISIONED_LABEL));

        let map_roles = cloud.auth_document().data[MAP_ROLES_KEY].clone();
        assert!(map_roles.contains(&format!("  rolearn: {}\n", state.role.arn)));
        assert!(map_roles.ends_with("  username: system:node:{{EC2PrivateDNSName}}"));
    }

    #[tokio::test]
    async fn rerun_is_read_only_and_equal() {
        let cloud = seeded();
        let prov = provisioner(&cloud);
        let first = prov.ensure(CLUSTER).await.unwrap();
        let mutations = cloud.mutation_count();

        let second = prov.ensure(CLUSTER).await.unwrap();
        assert_eq!(cloud.mutation_count(), mutations);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn lowest_subnet_id_wins_per_zone() {
        let cloud = seeded();
        let state = provisioner(&cloud).ensure(CLUSTER).await.unwrap();
        assert_eq!(state.zonal_subnets.len(), 2);
        assert_eq!(state.zonal_subnets["us-west-2a"].id, "subnet-a");
        assert_eq!(state.zonal_subnets["us-west-2b"].id, "subnet-c");
    }

    #[tokio::test]
    async fn missing_cluster_is_fatal() {
        let cloud = SimulatedCloud::new();
        let err = provisioner(&cloud).ensure("ghost").await.unwrap_err();
        assert_eq!(err.stage, Stage::DescribeCluster);
        assert!(err.source.is_not_found());
        assert_eq!(cloud.mutation_count(), 0);
    }

    #[tokio::test]
    async fn lookup_errors_are_not_mistaken_for_absence() {
        let cloud = seeded();
        cloud.fail_next(Op::GetRole, CloudError::AccessDenied("iam:GetRole".into()));

        let err = provisioner(&cloud).ensure(CLUSTER).await.unwrap_err();
        assert_eq!(err.stage, Stage::GetRole);
        assert_eq!(cloud.calls(Op::CreateRole), 0);
    }

    #[tokio::test]
    async fn failed_profile_attach_resumes_on_rerun() {
        let cloud = seeded();
        cloud.fail_next(
            Op::AddRoleToInstanceProfile,
            CloudError::Throttled("slow down".into()),
        );
        let prov = provisioner(&cloud);

        let err = prov.ensure(CLUSTER).await.unwrap_err();
        assert_eq!(err.stage, Stage::AddRoleToInstanceProfile);
        assert_eq!(cloud.calls(Op::CreateLaunchTemplate), 0);

        let state = prov.ensure(CLUSTER).await.unwrap();
        assert_eq!(cloud.calls(Op::CreateRole), 1);
        assert_eq!(cloud.calls(Op::CreateInstanceProfile), 1);
        assert_eq!(cloud.calls(Op::AddRoleToInstanceProfile), 2);
        assert_eq!(state.instance_profile.roles.len(), 1);
    }

    #[tokio::test]
    async fn missing_policies_are_attached_on_rerun() {
        let cloud = seeded();
        // Role created, then the second attachment fails.
        cloud.fail_next(Op::AttachRolePolicy, CloudError::Transport("connection reset".into()));
        let prov = provisioner(&cloud);
        let _ = prov.ensure(CLUSTER).await;
        // First fault is consumed by the first attach; nothing was attached.
        assert!(cloud.role_policies("NodescaleNodeRole").is_empty());

        let state = prov.ensure(CLUSTER).await.unwrap();
        assert_eq!(cloud.calls(Op::CreateRole), 1);
        assert_eq!(state.attached_policies, ProvisionerConfig::new("", "").policies);
    }

    #[tokio::test]
    async fn auth_registration_is_additive() {
        let cloud = seeded();
        let other = "\n- rolearn: arn:aws:iam::111111111111:role/admins\n  username: admin";
        cloud.set_auth_data(MAP_ROLES_KEY, other);
        cloud.set_auth_data("mapUsers", "[]");
        let prov = provisioner(&cloud);

        let state = prov.ensure(CLUSTER).await.unwrap();
        prov.ensure(CLUSTER).await.unwrap();

        let doc = cloud.auth_document();
        let map_roles = &doc.data[MAP_ROLES_KEY];
        assert!(map_roles.starts_with(other));
        assert_eq!(map_roles.matches(&state.role.arn).count(), 1);
        assert_eq!(doc.data["mapUsers"], "[]");
        assert_eq!(cloud.calls(Op::UpdateAuth), 1);
    }

    #[tokio::test]
    async fn auth_conflict_is_retried() {
        let cloud = seeded();
        cloud.fail_next(Op::UpdateAuth, CloudError::Conflict("stale".into()));
        let state = provisioner(&cloud).ensure(CLUSTER).await.unwrap();

        assert_eq!(cloud.calls(Op::UpdateAuth), 2);
        assert!(cloud.auth_document().data[MAP_ROLES_KEY].contains(&state.role.arn));
    }

    #[tokio::test]
    async fn auth_conflicts_give_up_after_budget() {
        let cloud = seeded();
        let mut config = ProvisionerConfig::new("NodescaleNodeRole", "ami-123");
        config.auth_conflict_retries = 1;
        for _ in 0..2 {
            cloud.fail_next(Op::UpdateAuth, CloudError::Conflict("stale".into()));
        }
        let prov = Provisioner::new(ControlPlane::from_single(Arc::new(cloud.clone())), config);

        let err = prov.ensure(CLUSTER).await.unwrap_err();
        assert_eq!(err.stage, Stage::UpdateAuthRegistration);
        assert!(matches!(err.source, CloudError::Conflict(_)));
    }

    #[tokio::test]
    async fn profile_bound_to_other_role_is_rejected() {
        let cloud = seeded();
        let prov = provisioner(&cloud);
        {
            use crate::api::IdentityApi;
            cloud.create_role("intruder", "{}").await.unwrap();
            cloud.create_instance_profile("NodescaleNodeRole").await.unwrap();
            cloud
                .add_role_to_instance_profile("NodescaleNodeRole", "intruder")
                .await
                .unwrap();
        }
        let err = prov.ensure(CLUSTER).await.unwrap_err();
        assert_eq!(err.stage, Stage::AddRoleToInstanceProfile);
    }

    #[tokio::test]
    async fn concurrent_runs_both_succeed() {
        let cloud = seeded();
        cloud.set_latency(Duration::from_millis(5));
        let a = provisioner(&cloud);
        let b = provisioner(&cloud);

        let (first, second) = tokio::join!(a.ensure(CLUSTER), b.ensure(CLUSTER));
        let first = first.unwrap();
        let second = second.unwrap();

        assert_eq!(first.role, second.role);
        assert_eq!(first.launch_template, second.launch_template);
        assert_eq!(first.instance_profile.roles, vec!["NodescaleNodeRole".to_string()]);
        assert_eq!(second.instance_profile.roles, vec!["NodescaleNodeRole".to_string()]);
        assert_eq!(cloud.role_policies("NodescaleNodeRole").len(), 4);
        // Both lookups missed, so both tried to create.
        assert_eq!(cloud.calls(Op::CreateRole), 2);

        let map_roles = &cloud.auth_document().data[MAP_ROLES_KEY];
        assert_eq!(map_roles.matches(&first.role.arn).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let cloud = seeded();
        cloud.set_latency(Duration::from_secs(60));
        let err = provisioner(&cloud).ensure(CLUSTER).await.unwrap_err();
        assert_eq!(err.stage, Stage::DescribeCluster);
        assert!(matches!(err.source, CloudError::Interrupted(_)));
    }

    #[tokio::test]
    async fn cancelled_run_stops() {
        let cloud = seeded();
        let token = CancellationToken::new();
        token.cancel();
        let prov = provisioner(&cloud).with_cancellation(token);
        let err = prov.ensure(CLUSTER).await.unwrap_err();
        assert!(matches!(
            err.source,
            CloudError::Interrupted(nodescale_core::Interrupted::Cancelled)
        ));
    }
}
