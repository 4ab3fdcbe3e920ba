//! Error types for hearthguard.

use thiserror::Error;

/// Main error type for hearthguard operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading or parsing error.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Cryptographic operation error.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Public key retrieval failed.
    #[error("Key fetch error: {0}")]
    KeyFetch(String),

    /// Key identifier rejected before use.
    #[error("Invalid key id: {0}")]
    InvalidKeyId(String),

    /// Malformed or unsupported envelope.
    #[error("Envelope error: {0}")]
    Envelope(String),

    /// Session missing, expired, or refused by the API.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JWT encoding error.
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
