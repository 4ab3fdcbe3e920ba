//! Household API client.
//!
//! Every request goes through the same pipeline:
//! 1. Seal the body in an [`Envelope`] when the request is flagged for
//!    encryption
//! 2. Attach the stored access token as a bearer token
//! 3. On `401`, refresh the access token once and retry

use std::time::SystemTime;

use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, FailurePolicy};
use crate::crypto::{Envelope, KeyFetcher, encrypt_payload};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::token::{Claims, TokenStore, TokenValidator};

/// Key id the body was sealed under.
pub const ENC_KEY_ID_HEADER: &str = "x-enc-key-id";

/// Algorithm of a sealed body.
pub const ENC_ALG_HEADER: &str = "x-enc-alg";

/// Marks the single retry after a token refresh.
pub const REFRESH_ATTEMPT_HEADER: &str = "x-refresh-attempt";

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";

/// Per-request flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Seal the body before sending.
    pub encrypt: bool,
    /// Recipient key id; the configured default when `None`.
    pub key_id: Option<String>,
}

impl RequestOptions {
    #[must_use]
    pub fn encrypted() -> Self {
        Self {
            encrypt: true,
            key_id: None,
        }
    }

    #[must_use]
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }
}

/// Outcome of the session check done before entering protected areas.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// No access token stored.
    Missing,
    /// The stored token failed validation and was cleared.
    Expired,
    /// The stored token is valid.
    Active(Claims),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: Option<String>,
    refresh_token: Option<String>,
}

enum Body {
    Empty,
    Plain(Value),
    Sealed(Envelope),
}

/// HTTP client for the household API.
pub struct ApiClient {
    http_client: Client,
    config: ClientConfig,
    tokens: TokenStore,
    validator: TokenValidator,
    key_fetcher: KeyFetcher,
    metrics: Option<Metrics>,
}

impl ApiClient {
    /// Create a client for the API at `config.base_url`.
    pub fn new(config: ClientConfig, validator: TokenValidator) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let key_fetcher = KeyFetcher::new(
            http_client.clone(),
            config.base_url.clone(),
            config.key_cache_size,
        );

        Ok(Self {
            http_client,
            config,
            tokens: TokenStore::new(),
            validator,
            key_fetcher,
            metrics: None,
        })
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.key_fetcher = self.key_fetcher.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Send a request to `{base_url}{api_prefix}{path}`.
    ///
    /// Non-2xx responses other than `401` are returned as-is.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<Response> {
        let url = self.config.api_url(path);

        let sealed = self.prepare_body(body, options).await?;
        let response = self.send(&method, &url, &sealed, false).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            self.check_rejected_envelope(&sealed, &response).await;
            return Ok(response);
        }

        debug!(%url, "Request unauthorized, refreshing access token");
        self.refresh().await?;

        // Each attempt gets its own envelope: key and IV are never resent.
        let sealed = self.prepare_body(body, options).await?;
        let response = self.send(&method, &url, &sealed, true).await?;
        self.check_rejected_envelope(&sealed, &response).await;
        Ok(response)
    }

    /// A sealed body answered with `400` may have used a rotated key.
    async fn check_rejected_envelope(&self, body: &Body, response: &Response) {
        if let Body::Sealed(envelope) = body
            && response.status() == StatusCode::BAD_REQUEST
        {
            debug!(key_id = %envelope.key_id, "Sealed request rejected, dropping cached key");
            self.key_fetcher.invalidate(&envelope.key_id).await;
        }
    }

    async fn prepare_body(&self, body: Option<&Value>, options: &RequestOptions) -> Result<Body> {
        let Some(body) = body else {
            return Ok(Body::Empty);
        };
        if !options.encrypt {
            return Ok(Body::Plain(body.clone()));
        }

        let key_id = options
            .key_id
            .as_deref()
            .unwrap_or(&self.config.default_key_id);

        match self.seal(body, key_id).await {
            Ok(envelope) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_envelope_sealed();
                }
                Ok(Body::Sealed(envelope))
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_envelope_failure("seal");
                }
                match self.config.failure_policy {
                    FailurePolicy::Reject => Err(e),
                    FailurePolicy::Plaintext => {
                        warn!(key_id, error = %e, "Encryption failed, sending body unencrypted");
                        if let Some(metrics) = &self.metrics {
                            metrics.record_encryption_fallback();
                        }
                        Ok(Body::Plain(body.clone()))
                    }
                }
            }
        }
    }

    async fn seal(&self, body: &Value, key_id: &str) -> Result<Envelope> {
        let public_key = self.key_fetcher.public_key(key_id).await?;
        encrypt_payload(body, &public_key, key_id)
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        body: &Body,
        refresh_attempt: bool,
    ) -> Result<Response> {
        let mut request = self.http_client.request(method.clone(), url);

        if let Some(token) = self.tokens.token().await {
            request = request.bearer_auth(token);
        }
        if refresh_attempt {
            request = request.header(REFRESH_ATTEMPT_HEADER, "1");
        }

        request = match body {
            Body::Empty => request,
            Body::Plain(value) => request.json(value),
            Body::Sealed(envelope) => request
                .header(ENC_KEY_ID_HEADER, envelope.key_id.as_str())
                .header(ENC_ALG_HEADER, envelope.alg.as_str())
                .json(envelope),
        };

        Ok(request.send().await?)
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// On any failure the session is cleared.
    pub async fn refresh(&self) -> Result<()> {
        let Some(refresh_token) = self.tokens.refresh_token().await else {
            self.record_refresh("unavailable");
            self.tokens.clear().await;
            return Err(Error::Unauthorized(
                "Session expired and no refresh token is stored".to_string(),
            ));
        };

        match self.request_refresh(&refresh_token).await {
            Ok((token, refresh_token)) => {
                self.tokens
                    .store_tokens(&token, refresh_token.as_deref())
                    .await;
                self.record_refresh("success");
                info!(
                    expires_in = ?self.validator.time_until_expiration(&token),
                    "Refreshed access token"
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                self.record_refresh("failed");
                self.tokens.clear().await;
                Err(Error::Unauthorized(format!("Token refresh failed: {e}")))
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<(String, Option<String>)> {
        let response = self
            .http_client
            .post(self.config.api_url(REFRESH_PATH))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        parse_token_response(response).await
    }

    /// Sign in and store the returned tokens.
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let response = self
            .http_client
            .post(self.config.api_url(LOGIN_PATH))
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        let (token, refresh_token) = parse_token_response(response).await?;
        self.tokens
            .store_tokens(&token, refresh_token.as_deref())
            .await;

        if self.validator.is_expired(&token) {
            warn!("Login returned a token that is already expired");
        }
        let refreshable = self.tokens.has_refresh_token().await;
        info!(
            subject = self.validator.user_id(&token).as_deref().unwrap_or("-"),
            refreshable,
            expires_in = ?self.validator.time_until_expiration(&token),
            "Logged in"
        );
        Ok(())
    }

    /// Drop all stored tokens.
    pub async fn logout(&self) {
        let had_session = self.tokens.has_token().await;
        self.tokens.clear().await;
        if had_session {
            info!("Logged out");
        }
    }

    /// Check the stored session, clearing it when the token is no longer valid.
    pub async fn guard(&self) -> SessionState {
        let Some(token) = self.tokens.token().await else {
            self.record_token_check("missing");
            return SessionState::Missing;
        };

        match self.validator.validate_at(&token, SystemTime::now()) {
            Some(claims) => {
                self.record_token_check("valid");
                SessionState::Active(claims)
            }
            None => {
                self.record_token_check("expired");
                self.tokens.clear().await;
                info!("Session expired");
                SessionState::Expired
            }
        }
    }

    fn record_refresh(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_token_refresh(outcome);
        }
    }

    fn record_token_check(&self, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_token_check(result);
        }
    }
}

/// Require a 2xx response carrying a non-empty `token`.
///
/// Returns the access token and the refresh token, if one was issued.
async fn parse_token_response(response: Response) -> Result<(String, Option<String>)> {
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Unauthorized(format!("Auth request failed: {status}")));
    }

    let tokens: TokenResponse = response.json().await?;
    match tokens.token {
        Some(token) if !token.is_empty() => Ok((token, tokens.refresh_token)),
        _ => Err(Error::Unauthorized(
            "Auth response carried no token".to_string(),
        )),
    }
}
