//! HTTP surface of the node agent.
//!
//! - `GET /stats/summary`: provider stats, checked against this node
//! - `GET /healthz`: liveness

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::error;
use vnode_model::Summary;

use crate::lifecycle::{LifecycleError, PodLifecycleController};

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    controller: Arc<PodLifecycleController>,
    shutdown: CancellationToken,
}

impl ApiState {
    pub fn new(controller: Arc<PodLifecycleController>, shutdown: CancellationToken) -> Self {
        Self {
            controller,
            shutdown,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,

    /// Current timestamp (RFC 3339).
    pub timestamp: String,
}

/// Error body returned by the API.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ProblemDetails {
    pub title: String,
    pub status: u16,
    pub code: String,
    pub detail: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    detail: String,
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        let (status, code) = match &err {
            LifecycleError::Stats(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invalid_summary"),
            LifecycleError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down"),
            _ => (StatusCode::BAD_GATEWAY, "provider_error"),
        };
        Self {
            status,
            code,
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ProblemDetails {
            title: self
                .status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            status: self.status.as_u16(),
            code: self.code.to_string(),
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Create the router with all routes and middleware.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/stats/summary", get(stats_summary))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "node-agent".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn stats_summary(State(state): State<ApiState>) -> Result<Json<Summary>, ApiError> {
    let summary = state
        .controller
        .get_stats_summary(&state.shutdown)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to get stats summary");
            ApiError::from(e)
        })?;
    Ok(Json(summary))
}
