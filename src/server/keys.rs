//! Public key publication at the well-known path.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::{ApiError, AppState};
use crate::crypto::validate_key_id;

const PEM_CONTENT_TYPE: &str = "application/x-pem-file";

/// `GET /.well-known/enc-keys/{key_id}.pem`
pub(super) async fn public_key_handler(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
) -> Response {
    let pem = file
        .strip_suffix(".pem")
        .filter(|key_id| validate_key_id(key_id).is_ok())
        .and_then(|key_id| state.keys.public_key_pem(key_id));

    match pem {
        Some(pem) => {
            state.metrics.record_http_request("public_key", 200);
            ([(CONTENT_TYPE, PEM_CONTENT_TYPE)], pem.to_string()).into_response()
        }
        None => {
            debug!(file = %file, "Public key not found");
            state.metrics.record_http_request("public_key", 404);
            ApiError::NotFound(format!("No public key for '{file}'")).into_response()
        }
    }
}
