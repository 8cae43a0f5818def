//! REST API handlers.
//!
//! Reads come from the latest published view; commands go through the
//! cluster handle and return the resulting snapshot.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use zoneshift_core::ClusterSnapshot;
use zoneshift_engine::{Command, EngineError};

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

fn engine_error_response(err: EngineError) -> axum::response::Response {
    match err {
        EngineError::Rejected(rejected) => {
            warn!(reason = %rejected, "command rejected");
            error_response(&rejected.to_string(), StatusCode::CONFLICT).into_response()
        }
        EngineError::Closed => {
            error_response(&err.to_string(), StatusCode::SERVICE_UNAVAILABLE).into_response()
        }
    }
}

/// Snapshot plus the failure reason while Failed.
#[derive(Serialize)]
pub struct ClusterStatus {
    #[serde(flatten)]
    pub snapshot: ClusterSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

fn status(state: &ApiState) -> ClusterStatus {
    let view = state.cluster.view();
    ClusterStatus {
        snapshot: view.snapshot.clone(),
        failure: view.failure.clone(),
    }
}

// ── Reads ──────────────────────────────────────────────────────

/// GET /api/v1/cluster
pub async fn get_cluster(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(status(&state))
}

#[derive(Deserialize)]
pub struct SamplesQuery {
    pub window: Option<usize>,
}

/// GET /api/v1/samples?window=N
pub async fn list_samples(
    State(state): State<ApiState>,
    Query(query): Query<SamplesQuery>,
) -> impl IntoResponse {
    let view = state.cluster.view();
    let window = query.window.unwrap_or(view.display_window);
    ApiResponse::ok(view.recent_samples(window).to_vec())
}

/// GET /api/v1/events
pub async fn list_events(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.cluster.view().events.clone())
}

// ── Commands ───────────────────────────────────────────────────

/// POST /api/v1/control/{action}
pub async fn control(
    State(state): State<ApiState>,
    Path(action): Path<String>,
) -> impl IntoResponse {
    let command = match action.as_str() {
        "start" => Command::Start,
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "reset" => Command::Reset,
        other => {
            return error_response(&format!("unknown control action: {other}"), StatusCode::NOT_FOUND)
                .into_response();
        }
    };
    match state.cluster.send(command).await {
        Ok(()) => ApiResponse::ok(status(&state)).into_response(),
        Err(e) => engine_error_response(e),
    }
}

/// POST /api/v1/scale/{action}
///
/// 202 once the workflow is accepted; 409 with the rejection reason when
/// the cluster is busy, already at the requested size, or Failed.
pub async fn scale(
    State(state): State<ApiState>,
    Path(action): Path<String>,
) -> impl IntoResponse {
    let command = match action.as_str() {
        "out" => Command::ScaleOut,
        "in" => Command::ScaleIn,
        "retry" => Command::Retry,
        other => {
            return error_response(&format!("unknown scale action: {other}"), StatusCode::NOT_FOUND)
                .into_response();
        }
    };
    match state.cluster.send(command).await {
        Ok(()) => (StatusCode::ACCEPTED, ApiResponse::ok(status(&state))).into_response(),
        Err(e) => engine_error_response(e),
    }
}

// ── Metrics ────────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let view = state.cluster.view();
    let body = zoneshift_metrics::render_prometheus(
        view.samples.last(),
        &view.snapshot.zones,
        view.snapshot.scaling_phase,
    );
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
