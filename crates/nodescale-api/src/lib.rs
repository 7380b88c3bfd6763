//! nodescale-api — REST API for nodescale.
//!
//! Manages scaling specs, exposes the status each reconciler publishes and
//! the last bootstrap result. Writes go to the `StateStore` and then
//! trigger a tick through the controller's work queue.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/autoscalers` | List specs with status |
//! | PUT | `/api/v1/autoscalers/{name}` | Create or update a spec |
//! | GET | `/api/v1/autoscalers/{name}` | Spec and status |
//! | DELETE | `/api/v1/autoscalers/{name}` | Delete a spec |
//! | POST | `/api/v1/autoscalers/{name}/reconcile` | Trigger a tick |
//! | GET | `/api/v1/bootstrap/{cluster}` | Last bootstrap state |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use nodescale_autoscale::WorkQueue;
use nodescale_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub queue: Arc<WorkQueue>,
}

/// Build the complete API router.
pub fn build_router(store: StateStore, queue: Arc<WorkQueue>) -> Router {
    let api_state = ApiState { store, queue };

    let api_routes = Router::new()
        .route("/autoscalers", get(handlers::list_autoscalers))
        .route(
            "/autoscalers/{name}",
            get(handlers::get_autoscaler)
                .put(handlers::put_autoscaler)
                .delete(handlers::delete_autoscaler),
        )
        .route("/autoscalers/{name}/reconcile", post(handlers::reconcile_autoscaler))
        .route("/bootstrap/{cluster}", get(handlers::get_bootstrap))
        .with_state(api_state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
