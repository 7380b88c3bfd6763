//! Metric source abstraction.

use async_trait::async_trait;
use nodescale_core::Interrupted;
use thiserror::Error;

/// Errors a metric query can fail with. All of them are transient from
/// the reconciler's point of view.
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("invalid metrics endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("metrics backend unreachable: {0}")]
    Transport(String),

    #[error("metrics backend returned HTTP {0}")]
    Status(u16),

    #[error("query rejected by backend: {0}")]
    Query(String),

    #[error("malformed query response: {0}")]
    Malformed(String),

    #[error("query returned {0} series, expected exactly one")]
    Ambiguous(usize),

    #[error("unsupported result type: {0}")]
    UnsupportedResult(String),

    #[error("metric query interrupted: {0}")]
    Interrupted(#[from] Interrupted),
}

/// A backend that can evaluate an opaque query at "now".
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Evaluate `query`. `Ok(None)` means the backend answered but had no
    /// sample.
    async fn query(&self, query: &str) -> Result<Option<f64>, MetricError>;
}
