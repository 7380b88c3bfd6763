//! nodescale-cloud — everything that talks to the cloud control plane.
//!
//! # Components
//!
//! - **`capability`** — the `NodeGroupCapability` boundary the reconciler
//!   scales through, and its EC2 Auto Scaling implementation
//! - **`api`** — traits for the control-plane services the provisioner
//!   consumes (cluster lookup, identity, launch templates, network, auth store)
//! - **`bootstrap`** — idempotent detect-or-create provisioning of a node
//!   group's prerequisites
//! - **`simulated`** — in-memory control plane implementing every trait,
//!   used for local runs and tests
//!
//! Every client is injected as a trait object; nothing in this crate
//! reaches for a global.

pub mod api;
pub mod bootstrap;
pub mod capability;
pub mod error;
pub mod simulated;

pub use api::{
    AuthDocument, AuthStore, AutoScalingApi, ClusterApi, ControlPlane, IdentityApi,
    LaunchTemplateApi, NetworkApi,
};
pub use bootstrap::{ProvisionError, Provisioner, ProvisionerConfig, Stage};
pub use capability::{AutoScalingGroupCapability, NodeGroupCapability, NodeGroupChange};
pub use error::{CloudError, NodeGroupError};
pub use simulated::{Op, SimulatedCloud};
