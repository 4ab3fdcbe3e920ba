//! Key service HTTP server.
//!
//! Routes:
//! - `GET /health`, `GET /ready`
//! - `GET /.well-known/enc-keys/{key_id}.pem`
//! - `POST /api/inbox`
//! - `GET /metrics` (when enabled)

mod health;
mod inbox;
mod keys;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, extract::State};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::crypto::{KeyRing, WELL_KNOWN_KEY_PATH};
use crate::error::Result;
use crate::metrics::Metrics;
use crate::token::TokenValidator;

/// Shared state for request handlers.
pub struct AppState {
    pub keys: KeyRing,
    pub validator: TokenValidator,
    pub metrics: Metrics,
    pub require_auth: bool,
}

/// Error body returned by every handler.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
struct ErrorResponse {
    error: String,
    code: String,
}

/// Handler errors, mapped onto status codes.
#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message) = match self {
            Self::NotFound(msg) => ("NOT_FOUND", msg),
            Self::BadRequest(msg) => ("BAD_REQUEST", msg),
            Self::Unauthorized(msg) => ("UNAUTHORIZED", msg),
            Self::Internal(msg) => ("INTERNAL_ERROR", msg),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// The key service.
pub struct KeyServer {
    bind_address: String,
    metrics_enabled: bool,
    state: Arc<AppState>,
}

impl KeyServer {
    /// Create a server over a loaded key ring.
    pub fn new(config: &AppConfig, keys: KeyRing, metrics: Metrics) -> Self {
        metrics.set_keys_loaded(keys.len());

        Self {
            bind_address: config.server.bind_address.clone(),
            metrics_enabled: config.metrics.enabled,
            state: Arc::new(AppState {
                keys,
                validator: TokenValidator::from_config(&config.token),
                metrics,
                require_auth: config.server.require_auth,
            }),
        }
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health::health_handler))
            .route("/ready", get(health::ready_handler))
            .route(
                &format!("{WELL_KNOWN_KEY_PATH}/{{file}}"),
                get(keys::public_key_handler),
            )
            .route("/api/inbox", post(inbox::inbox_handler));

        if self.metrics_enabled {
            router = router.route("/metrics", get(metrics_handler));
        }

        router.with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown is signaled.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_address).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until shutdown is signaled.
    pub async fn serve(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            address = %listener.local_addr()?,
            keys = self.state.keys.len(),
            "Key service listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
                info!("Key service shutting down");
            })
            .await?;

        Ok(())
    }
}

/// Prometheus exposition.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.encode_text() {
        Ok(text) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            ApiError::Internal("Failed to encode metrics".to_string()).into_response()
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::TestServer;
    use super::*;

    #[test]
    fn test_error_response_status() {
        assert_eq!(
            ApiError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Unauthorized("x".into()).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let server = TestServer::with_test_key(AppConfig::for_tests()).await;

        reqwest::get(server.url("/health")).await.unwrap();
        let response = reqwest::get(server.url("/metrics")).await.unwrap();

        assert_eq!(response.status(), 200);
        let text = response.text().await.unwrap();
        assert!(text.contains("hearthguard_keys_loaded 1"));
        assert!(text.contains("route=\"health\""));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_metrics_disabled() {
        let mut config = AppConfig::for_tests();
        config.metrics.enabled = false;
        let server = TestServer::with_test_key(config).await;

        let response = reqwest::get(server.url("/metrics")).await.unwrap();
        assert_eq!(response.status(), 404);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let server = TestServer::with_test_key(AppConfig::for_tests()).await;

        let response = reqwest::get(server.url("/nope")).await.unwrap();
        assert_eq!(response.status(), 404);

        server.stop().await;
    }
}
