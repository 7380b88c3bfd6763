//! Prometheus instant-query client.
//!
//! Speaks the `/api/v1/query` HTTP API over a plain HTTP/1 connection and
//! reduces the result to a single scalar.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use nodescale_core::Interrupted;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::source::{MetricError, MetricSource};

/// Client for a Prometheus-compatible query endpoint.
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    endpoint: Url,
    timeout: Duration,
}

impl PrometheusClient {
    /// `base_url` is the server root, e.g. `http://prometheus:9090`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MetricError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| MetricError::InvalidEndpoint(format!("{base_url}: {e}")))?;
        if base.scheme() != "http" {
            return Err(MetricError::InvalidEndpoint(format!(
                "{base_url}: only http:// endpoints are supported"
            )));
        }
        if base.host_str().is_none() {
            return Err(MetricError::InvalidEndpoint(format!("{base_url}: missing host")));
        }
        // Url::join drops the last path segment unless it ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("api/v1/query")
            .map_err(|e| MetricError::InvalidEndpoint(e.to_string()))?;
        Ok(Self { endpoint, timeout })
    }

    /// The fully-resolved query URL.
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    async fn post_form(&self, form: String) -> Result<(u16, Bytes), MetricError> {
        let host = self.endpoint.host_str().unwrap_or_default();
        let port = self.endpoint.port_or_known_default().unwrap_or(80);
        let address = format!("{host}:{port}");

        let stream = tokio::net::TcpStream::connect(&address)
            .await
            .map_err(|e| MetricError::Transport(format!("connect {address}: {e}")))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| MetricError::Transport(format!("handshake {address}: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(self.endpoint.path())
            .header("host", &address)
            .header("user-agent", "nodescale-metrics/0.1")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Full::new(Bytes::from(form)))
            .map_err(|e| MetricError::Transport(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| MetricError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| MetricError::Transport(e.to_string()))?
            .to_bytes();
        Ok((status, body))
    }
}

#[async_trait]
impl MetricSource for PrometheusClient {
    async fn query(&self, query: &str) -> Result<Option<f64>, MetricError> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("query", query)
            .append_pair("time", &format!("{:.3}", epoch_secs_f64()))
            .finish();

        let (status, body) = tokio::time::timeout(self.timeout, self.post_form(form))
            .await
            .map_err(|_| Interrupted::Timeout(self.timeout))??;

        debug!(%query, status, bytes = body.len(), "metric query answered");

        // Prometheus reports query errors as JSON with a 4xx status, so try
        // the body before falling back to the bare status code.
        match parse_query_response(&body) {
            Err(MetricError::Malformed(_)) if !(200..300).contains(&status) => {
                Err(MetricError::Status(status))
            }
            other => other,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<VectorSample>),
    Scalar(SampleValue),
    Matrix(serde_json::Value),
    String(serde_json::Value),
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    #[allow(dead_code)]
    metric: BTreeMap<String, String>,
    value: SampleValue,
}

/// `[unix_time, "value"]`
#[derive(Debug, Deserialize)]
struct SampleValue(f64, String);

impl SampleValue {
    fn parse(&self) -> Result<Option<f64>, MetricError> {
        let value: f64 = self
            .1
            .parse()
            .map_err(|_| MetricError::Malformed(format!("sample value {:?}", self.1)))?;
        // NaN and infinities are what Prometheus returns for 0/0 and x/0;
        // neither is a usable reading.
        Ok(value.is_finite().then_some(value))
    }
}

/// Reduce an instant-query response body to a single value.
///
/// An empty vector is "no data"; more than one series is rejected rather
/// than picking one arbitrarily.
pub fn parse_query_response(body: &[u8]) -> Result<Option<f64>, MetricError> {
    let resp: QueryResponse =
        serde_json::from_slice(body).map_err(|e| MetricError::Malformed(e.to_string()))?;

    if resp.status != "success" {
        let kind = resp.error_type.unwrap_or_else(|| "unknown".to_string());
        let msg = resp.error.unwrap_or_default();
        return Err(MetricError::Query(format!("{kind}: {msg}")));
    }

    match resp.data {
        None => Err(MetricError::Malformed("missing data".to_string())),
        Some(QueryData::Scalar(sample)) => sample.parse(),
        Some(QueryData::Vector(samples)) => match samples.as_slice() {
            [] => Ok(None),
            [only] => only.value.parse(),
            many => Err(MetricError::Ambiguous(many.len())),
        },
        Some(QueryData::Matrix(_)) => Err(MetricError::UnsupportedResult("matrix".to_string())),
        Some(QueryData::String(_)) => Err(MetricError::UnsupportedResult("string".to_string())),
    }
}

fn epoch_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(values: &[&str]) -> String {
        let samples: Vec<String> = values
            .iter()
            .map(|v| format!(r#"{{"metric":{{}},"value":[1700000000,"{v}"]}}"#))
            .collect();
        format!(
            r#"{{"status":"success","data":{{"resultType":"vector","result":[{}]}}}}"#,
            samples.join(",")
        )
    }

    #[test]
    fn single_sample_vector() {
        let v = parse_query_response(vector(&["0.850000"]).as_bytes()).unwrap();
        assert_eq!(v, Some(0.85));
    }

    #[test]
    fn empty_vector_is_no_data() {
        assert_eq!(parse_query_response(vector(&[]).as_bytes()).unwrap(), None);
    }

    #[test]
    fn nan_is_no_data() {
        assert_eq!(parse_query_response(vector(&["NaN"]).as_bytes()).unwrap(), None);
        assert_eq!(parse_query_response(vector(&["+Inf"]).as_bytes()).unwrap(), None);
    }

    #[test]
    fn multiple_series_are_ambiguous() {
        let err = parse_query_response(vector(&["1", "2"]).as_bytes()).unwrap_err();
        assert!(matches!(err, MetricError::Ambiguous(2)));
    }

    #[test]
    fn scalar_result() {
        let body = r#"{"status":"success","data":{"resultType":"scalar","result":[1700000000.5,"41"]}}"#;
        assert_eq!(parse_query_response(body.as_bytes()).unwrap(), Some(41.0));
    }

    #[test]
    fn matrix_is_unsupported() {
        let body = r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#;
        assert!(matches!(
            parse_query_response(body.as_bytes()),
            Err(MetricError::UnsupportedResult(_))
        ));
    }

    #[test]
    fn error_status_is_query_error() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error at char 3"}"#;
        let err = parse_query_response(body.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("bad_data"));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            parse_query_response(b"<html>"),
            Err(MetricError::Malformed(_))
        ));
    }

    #[test]
    fn endpoint_keeps_path_prefix() {
        let c = PrometheusClient::new("http://metrics:9090/prom", Duration::from_secs(1)).unwrap();
        assert_eq!(c.endpoint(), "http://metrics:9090/prom/api/v1/query");
        let c = PrometheusClient::new("http://metrics:9090", Duration::from_secs(1)).unwrap();
        assert_eq!(c.endpoint(), "http://metrics:9090/api/v1/query");
    }

    #[test]
    fn rejects_non_http_endpoints() {
        assert!(PrometheusClient::new("https://metrics", Duration::from_secs(1)).is_err());
        assert!(PrometheusClient::new("not a url", Duration::from_secs(1)).is_err());
    }
}
