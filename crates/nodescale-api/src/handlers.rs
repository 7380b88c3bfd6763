//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` and returns JSON responses.
//! Spec writes enqueue the spec's name so the change is acted on without
//! waiting for the next resync.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use nodescale_autoscale::ReplicaBounds;
use nodescale_state::{MetricTarget, NodeGroupId, ScalingSpec, ScalingStatus};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn internal(e: impl ToString) -> axum::response::Response {
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
}

/// A spec together with the status its reconciler last published.
#[derive(Debug, Serialize, Deserialize)]
pub struct AutoscalerView {
    pub spec: ScalingSpec,
    pub status: Option<ScalingStatus>,
}

/// Body of `PUT /api/v1/autoscalers/{name}`.
#[derive(Debug, Deserialize)]
pub struct AutoscalerRequest {
    pub node_group: NodeGroupId,
    pub metric: MetricTarget,
    #[serde(default)]
    pub min_replicas: Option<u32>,
    #[serde(default)]
    pub max_replicas: Option<u32>,
}

// ── Autoscalers ────────────────────────────────────────────────

/// GET /api/v1/autoscalers
pub async fn list_autoscalers(State(state): State<ApiState>) -> impl IntoResponse {
    let specs = match state.store.list_autoscalers() {
        Ok(specs) => specs,
        Err(e) => return internal(e),
    };
    let mut views = Vec::with_capacity(specs.len());
    for spec in specs {
        match state.store.get_status(&spec.name) {
            Ok(status) => views.push(AutoscalerView { spec, status }),
            Err(e) => return internal(e),
        }
    }
    ApiResponse::ok(views).into_response()
}

/// GET /api/v1/autoscalers/{name}
pub async fn get_autoscaler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.get_autoscaler(&name) {
        Ok(Some(spec)) => match state.store.get_status(&name) {
            Ok(status) => ApiResponse::ok(AutoscalerView { spec, status }).into_response(),
            Err(e) => internal(e),
        },
        Ok(None) => error_response("autoscaler not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal(e),
    }
}

/// PUT /api/v1/autoscalers/{name}
pub async fn put_autoscaler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<AutoscalerRequest>,
) -> impl IntoResponse {
    if let Err(e) = ReplicaBounds::new(req.min_replicas, req.max_replicas) {
        return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
    }

    let existing = match state.store.get_autoscaler(&name) {
        Ok(existing) => existing,
        Err(e) => return internal(e),
    };
    let now = epoch_secs();
    let spec = ScalingSpec {
        name: name.clone(),
        node_group: req.node_group,
        metric: req.metric,
        min_replicas: req.min_replicas,
        max_replicas: req.max_replicas,
        created_at: existing.as_ref().map_or(now, |s| s.created_at),
        updated_at: now,
    };
    if let Err(e) = state.store.put_autoscaler(&spec) {
        return internal(e);
    }

    state.queue.add(&name);
    info!(autoscaler = %name, node_group = %spec.node_group, "autoscaler stored");

    let code = if existing.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    (code, ApiResponse::ok(spec)).into_response()
}

/// DELETE /api/v1/autoscalers/{name}
pub async fn delete_autoscaler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_autoscaler(&name) {
        Ok(true) => {
            // A tick already in flight sees the spec gone and cleans up.
            state.queue.add(&name);
            info!(autoscaler = %name, "autoscaler deleted");
            ApiResponse::ok("deleted").into_response()
        }
        Ok(false) => error_response("autoscaler not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal(e),
    }
}

/// POST /api/v1/autoscalers/{name}/reconcile
pub async fn reconcile_autoscaler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.get_autoscaler(&name) {
        Ok(Some(_)) => {
            state.queue.add(&name);
            (StatusCode::ACCEPTED, ApiResponse::ok("queued")).into_response()
        }
        Ok(None) => error_response("autoscaler not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal(e),
    }
}

// ── Bootstrap ──────────────────────────────────────────────────

/// GET /api/v1/bootstrap/{cluster}
pub async fn get_bootstrap(
    State(state): State<ApiState>,
    Path(cluster): Path<String>,
) -> impl IntoResponse {
    match state.store.get_bootstrap(&cluster) {
        Ok(Some(bootstrap)) => ApiResponse::ok(bootstrap).into_response(),
        Ok(None) => {
            error_response("no bootstrap recorded for cluster", StatusCode::NOT_FOUND)
                .into_response()
        }
        Err(e) => internal(e),
    }
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
