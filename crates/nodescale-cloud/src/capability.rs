//! Node group capability.
//!
//! The only surface the reconciler scales through. Implementations are
//! cloud specific; the reconciler never learns which one it holds.

use std::sync::Arc;

use async_trait::async_trait;
use nodescale_state::NodeGroupId;
use tracing::debug;

use crate::api::AutoScalingApi;
use crate::error::NodeGroupError;

/// A node group's size changed outside of this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeGroupChange {
    pub node_group: NodeGroupId,
    pub replicas: u32,
}

/// Read and write the size of a node group.
#[async_trait]
pub trait NodeGroupCapability: Send + Sync {
    /// Current requested size of the group.
    async fn get_replicas(&self, id: &NodeGroupId) -> Result<u32, NodeGroupError>;

    /// Request a new size.
    async fn set_replicas(&self, id: &NodeGroupId, replicas: u32) -> Result<(), NodeGroupError>;
}

/// Node groups backed by EC2 Auto Scaling groups. The node group id is the
/// Auto Scaling group name.
#[derive(Clone)]
pub struct AutoScalingGroupCapability {
    api: Arc<dyn AutoScalingApi>,
}

impl AutoScalingGroupCapability {
    pub fn new(api: Arc<dyn AutoScalingApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl NodeGroupCapability for AutoScalingGroupCapability {
    async fn get_replicas(&self, id: &NodeGroupId) -> Result<u32, NodeGroupError> {
        self.api
            .describe_desired_capacity(id)
            .await
            .map_err(|e| NodeGroupError::from_cloud(id, e))
    }

    async fn set_replicas(&self, id: &NodeGroupId, replicas: u32) -> Result<(), NodeGroupError> {
        self.api
            .set_desired_capacity(id, replicas)
            .await
            .map_err(|e| NodeGroupError::from_cloud(id, e))?;
        debug!(node_group = %id, replicas, "desired capacity updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;
    use crate::simulated::{Op, SimulatedCloud};

    #[tokio::test]
    async fn reads_and_writes_desired_capacity() {
        let cloud = SimulatedCloud::new();
        cloud.add_node_group("workers", 3);
        let cap = AutoScalingGroupCapability::new(Arc::new(cloud.clone()));

        let id = "workers".to_string();
        assert_eq!(cap.get_replicas(&id).await.unwrap(), 3);
        cap.set_replicas(&id, 8).await.unwrap();
        assert_eq!(cloud.node_group_replicas("workers"), Some(8));
    }

    #[tokio::test]
    async fn missing_group_maps_to_not_found() {
        let cap = AutoScalingGroupCapability::new(Arc::new(SimulatedCloud::new()));
        let err = cap.get_replicas(&"ghost".to_string()).await.unwrap_err();
        assert!(matches!(err, NodeGroupError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn transport_failures_are_not_masked() {
        let cloud = SimulatedCloud::new();
        cloud.add_node_group("workers", 3);
        cloud.fail_next(Op::SetDesiredCapacity, CloudError::Throttled("rate".into()));
        let cap = AutoScalingGroupCapability::new(Arc::new(cloud.clone()));

        let err = cap.set_replicas(&"workers".to_string(), 5).await.unwrap_err();
        assert!(matches!(err, NodeGroupError::Transport(_)));
        assert_eq!(cloud.node_group_replicas("workers"), Some(3));
    }
}
