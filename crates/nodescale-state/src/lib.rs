//! nodescale-state — domain types and embedded state store.
//!
//! Backed by [redb](https://docs.rs/redb), persists scaling specs, the
//! status the reconciler publishes for each of them, and the last
//! bootstrap result per cluster.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns
//! and keyed by spec name or cluster name.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
