//! nodescale-core — pieces shared by every nodescale crate.
//!
//! - [`config`]: the `nodescale.toml` daemon configuration.
//! - [`call`]: timeout + cancellation wrapper used around every call that
//!   leaves the process (cloud control plane, metrics backend).

pub mod call;
pub mod config;

pub use call::{bounded, Interrupted};
pub use config::{parse_duration, DaemonConfig};
