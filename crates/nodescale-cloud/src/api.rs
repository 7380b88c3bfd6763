//! Control-plane service traits.
//!
//! One trait per external service the provisioner and the capability
//! adapters consume. Implementations must return `CloudError::NotFound`
//! for a missing resource and nothing else, since detect-or-create hinges
//! on telling that answer apart from real failures.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use nodescale_state::{
    ClusterDescriptor, InstanceProfile, LaunchTemplate, LaunchTemplateData, Role, Subnet,
};

use crate::error::CloudError;

/// Cluster descriptor lookup.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn describe_cluster(&self, name: &str) -> Result<ClusterDescriptor, CloudError>;
}

/// Roles and instance profiles.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn get_role(&self, name: &str) -> Result<Role, CloudError>;

    async fn create_role(&self, name: &str, assume_role_policy: &str) -> Result<Role, CloudError>;

    async fn attach_role_policy(&self, role: &str, policy_arn: &str) -> Result<(), CloudError>;

    /// Policy ARNs attached to `role`, in attachment order.
    async fn list_attached_role_policies(&self, role: &str) -> Result<Vec<String>, CloudError>;

    async fn get_instance_profile(&self, name: &str) -> Result<InstanceProfile, CloudError>;

    async fn create_instance_profile(&self, name: &str) -> Result<InstanceProfile, CloudError>;

    async fn add_role_to_instance_profile(&self, profile: &str, role: &str)
        -> Result<(), CloudError>;
}

/// Launch templates.
#[async_trait]
pub trait LaunchTemplateApi: Send + Sync {
    async fn get_launch_template(&self, name: &str) -> Result<LaunchTemplate, CloudError>;

    async fn create_launch_template(
        &self,
        name: &str,
        data: &LaunchTemplateData,
    ) -> Result<LaunchTemplate, CloudError>;
}

/// Subnet discovery.
#[async_trait]
pub trait NetworkApi: Send + Sync {
    /// Describe exactly the given subnet ids.
    async fn describe_subnets(&self, ids: &[String]) -> Result<Vec<Subnet>, CloudError>;
}

/// The cluster-wide authentication mapping, stored as a string map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthDocument {
    pub data: BTreeMap<String, String>,
    /// Opaque version for optimistic concurrency.
    pub resource_version: u64,
}

/// Key of the role mapping inside [`AuthDocument::data`].
pub const MAP_ROLES_KEY: &str = "mapRoles";

/// Shared auth store with compare-and-swap updates.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn get_auth(&self) -> Result<AuthDocument, CloudError>;

    /// Write `doc` if its `resource_version` is still current, returning
    /// the stored document. A stale version yields `CloudError::Conflict`.
    async fn update_auth(&self, doc: &AuthDocument) -> Result<AuthDocument, CloudError>;
}

/// EC2 Auto Scaling groups.
#[async_trait]
pub trait AutoScalingApi: Send + Sync {
    async fn describe_desired_capacity(&self, group: &str) -> Result<u32, CloudError>;

    async fn set_desired_capacity(&self, group: &str, capacity: u32) -> Result<(), CloudError>;
}

/// The set of clients the provisioner needs.
#[derive(Clone)]
pub struct ControlPlane {
    pub clusters: Arc<dyn ClusterApi>,
    pub identity: Arc<dyn IdentityApi>,
    pub launch_templates: Arc<dyn LaunchTemplateApi>,
    pub network: Arc<dyn NetworkApi>,
    pub auth: Arc<dyn AuthStore>,
}

impl ControlPlane {
    /// Use one object for every service.
    pub fn from_single<T>(backend: Arc<T>) -> Self
    where
        T: ClusterApi + IdentityApi + LaunchTemplateApi + NetworkApi + AuthStore + 'static,
    {
        Self {
            clusters: backend.clone(),
            identity: backend.clone(),
            launch_templates: backend.clone(),
            network: backend.clone(),
            auth: backend,
        }
    }
}
