//! `/health` (liveness) and `/ready` (readiness) endpoints.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use super::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub(super) struct HealthResponse {
    status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub(super) struct ReadyResponse {
    status: String,
    keys_loaded: usize,
    key_ids: Vec<String>,
}

/// Liveness check handler.
pub(super) async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics.record_http_request("health", 200);
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Ready once at least one private key is loaded.
pub(super) async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let is_ready = !state.keys.is_empty();

    let response = ReadyResponse {
        status: if is_ready { "ready" } else { "not_ready" }.to_string(),
        keys_loaded: state.keys.len(),
        key_ids: state.keys.key_ids().into_iter().map(String::from).collect(),
    };

    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    state.metrics.record_http_request("ready", status.as_u16());
    (status, Json(response))
}
