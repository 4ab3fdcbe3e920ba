//! `POST /api/inbox`: accepts plain or sealed JSON bodies.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::{ApiError, AppState};
use crate::client::{ENC_ALG_HEADER, ENC_KEY_ID_HEADER};
use crate::crypto::Envelope;

/// What the inbox received.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(test, derive(serde::Deserialize))]
pub(super) struct InboxResponse {
    encrypted: bool,
    key_id: Option<String>,
    subject: Option<String>,
    payload: Value,
}

pub(super) async fn inbox_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match accept(&state, &headers, &body) {
        Ok(response) => {
            state.metrics.record_http_request("inbox", 200);
            Json(response).into_response()
        }
        Err(e) => {
            state.metrics.record_http_request("inbox", e.status().as_u16());
            e.into_response()
        }
    }
}

fn accept(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<InboxResponse, ApiError> {
    let subject = if state.require_auth {
        authorize(state, headers)?
    } else {
        None
    };

    if !headers.contains_key(ENC_ALG_HEADER) {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?;
        return Ok(InboxResponse {
            encrypted: false,
            key_id: None,
            subject,
            payload,
        });
    }

    let envelope: Envelope = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid envelope: {e}")))?;

    if let Some(header_key_id) = headers.get(ENC_KEY_ID_HEADER)
        && header_key_id.as_bytes() != envelope.key_id.as_bytes()
    {
        return Err(ApiError::BadRequest(
            "Key id header does not match envelope".to_string(),
        ));
    }

    let payload = state.keys.open(&envelope).map_err(|e| {
        warn!(key_id = %envelope.key_id, error = %e, "Failed to open envelope");
        state.metrics.record_envelope_failure("open");
        ApiError::BadRequest("Envelope could not be opened".to_string())
    })?;
    state.metrics.record_envelope_opened();

    info!(
        key_id = %envelope.key_id,
        subject = subject.as_deref().unwrap_or("-"),
        "Opened envelope"
    );

    Ok(InboxResponse {
        encrypted: true,
        key_id: Some(envelope.key_id),
        subject,
        payload,
    })
}

/// Require a bearer token that decodes and has not expired. Yields its subject.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    else {
        state.metrics.record_token_check("missing");
        return Err(ApiError::Unauthorized("Missing bearer token".to_string()));
    };

    if !state.validator.is_valid(token) {
        state.metrics.record_token_check("expired");
        return Err(ApiError::Unauthorized(
            "Access token is invalid or expired".to_string(),
        ));
    }

    state.metrics.record_token_check("valid");
    Ok(state.validator.user_id(token))
}
