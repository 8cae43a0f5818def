//! zoneshift-api — REST API for the scaling control loop.
//!
//! Every handler reads the latest published `SimulationView` or sends a
//! command through the `ClusterHandle`; none of them touch the timeline
//! directly.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/cluster` | Current snapshot |
//! | GET | `/api/v1/samples?window=N` | Last N samples (default: display window) |
//! | GET | `/api/v1/events` | Retained lifecycle events, most recent first |
//! | POST | `/api/v1/control/{action}` | `start`, `pause`, `resume`, `reset` |
//! | POST | `/api/v1/scale/{action}` | `out`, `in`, `retry` |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use zoneshift_engine::ClusterHandle;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub cluster: ClusterHandle,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(cluster: ClusterHandle) -> Router {
    let api_state = ApiState { cluster };

    let api_routes = Router::new()
        .route("/cluster", get(handlers::get_cluster))
        .route("/samples", get(handlers::list_samples))
        .route("/events", get(handlers::list_events))
        .route("/control/{action}", post(handlers::control))
        .route("/scale/{action}", post(handlers::scale))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(api_state))
}
