//! Cloud error types.

use nodescale_core::Interrupted;
use nodescale_state::NodeGroupId;
use thiserror::Error;

/// Errors returned by control-plane APIs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CloudError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("conflicting update: {0}")]
    Conflict(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("control plane request failed: {0}")]
    Transport(String),

    #[error("control plane call interrupted: {0}")]
    Interrupted(#[from] Interrupted),
}

impl CloudError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        CloudError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// True only for the "does not exist" answer; every other failure must
    /// not be mistaken for it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }

    /// A create lost the race against another writer of the same resource.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, CloudError::AlreadyExists { .. })
    }
}

/// Errors from a node group capability.
#[derive(Debug, Error)]
pub enum NodeGroupError {
    #[error("node group not found: {0}")]
    NotFound(NodeGroupId),

    #[error("node group request failed: {0}")]
    Transport(String),

    #[error("node group call interrupted: {0}")]
    Interrupted(#[from] Interrupted),
}

impl NodeGroupError {
    pub(crate) fn from_cloud(id: &str, err: CloudError) -> Self {
        match err {
            CloudError::NotFound { .. } => NodeGroupError::NotFound(id.to_string()),
            CloudError::Interrupted(i) => NodeGroupError::Interrupted(i),
            other => NodeGroupError::Transport(other.to_string()),
        }
    }
}
