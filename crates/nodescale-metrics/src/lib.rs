//! nodescale-metrics — the metric source client.
//!
//! Issues a point-in-time query against a metrics backend and returns a
//! single scalar, or `None` when the backend has no data for the query.
//!
//! # Architecture
//!
//! ```text
//! MetricSource (trait)
//!   └── PrometheusClient
//!         ├── POST {base}/api/v1/query  (query=…&time=now)
//!         └── parse_query_response() → Option<f64>
//! ```

pub mod prometheus;
pub mod source;

pub use prometheus::{parse_query_response, PrometheusClient};
pub use source::{MetricError, MetricSource};
