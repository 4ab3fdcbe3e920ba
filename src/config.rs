//! Configuration loading and management.
//!
//! Supports TOML configuration files with environment variable overrides.
//! Environment variables follow the pattern: `HEARTHGUARD_<SECTION>__<KEY>`

use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Key service configuration.
    pub server: ServerConfig,

    /// API client configuration.
    pub client: ClientConfig,

    /// Token validation configuration.
    pub token: TokenConfig,

    /// Metrics configuration.
    pub metrics: MetricsConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Key service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Directory holding `<key_id>.key.pem` private keys.
    #[serde(default = "default_keys_dir")]
    pub keys_dir: PathBuf,

    /// Require a valid bearer token on `/api/inbox`.
    #[serde(default = "default_require_auth")]
    pub require_auth: bool,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_keys_dir() -> PathBuf {
    PathBuf::from("keys")
}

fn default_require_auth() -> bool {
    true
}

fn default_shutdown_timeout() -> u64 {
    10
}

/// What to do with a flagged request whose body could not be encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Fail the request.
    #[default]
    Reject,
    /// Log a warning and send the body unencrypted.
    Plaintext,
}

/// API client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Origin of the household API and the well-known key path.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Prefix prepended to every API path.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Key id used when a request does not name one.
    #[serde(default = "default_key_id")]
    pub default_key_id: String,

    /// Behaviour when sealing a flagged body fails.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Maximum number of imported public keys kept in memory.
    #[serde(default = "default_key_cache_size")]
    pub key_cache_size: usize,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

fn default_key_id() -> String {
    "v1".to_string()
}

fn default_key_cache_size() -> usize {
    16
}

fn default_request_timeout() -> u64 {
    30
}

/// Token validation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Seconds subtracted from `exp` before comparing against the clock.
    #[serde(default = "default_expiration_buffer")]
    pub expiration_buffer_secs: u64,
}

fn default_expiration_buffer() -> u64 {
    60
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether `/metrics` is served.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

fn default_metrics_enabled() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error", "off".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "pretty".
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl AppConfig {
    /// Load configuration from a file path with environment variable overrides.
    ///
    /// Environment variables follow the pattern: `HEARTHGUARD_<SECTION>__<KEY>`
    /// For example: `HEARTHGUARD_CLIENT__FAILURE_POLICY`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::defaults()?
            .add_source(File::from(path.as_ref()))
            .add_source(env_source())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load configuration from environment variables only (no config file).
    pub fn from_env() -> Result<Self> {
        let config = Self::defaults()?.add_source(env_source()).build()?;

        Ok(config.try_deserialize()?)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        Ok(Config::builder()
            .set_default("server.bind_address", default_bind_address())?
            .set_default("server.keys_dir", "keys")?
            .set_default("server.require_auth", true)?
            .set_default("server.shutdown_timeout_secs", 10)?
            .set_default("client.base_url", default_base_url())?
            .set_default("client.api_prefix", default_api_prefix())?
            .set_default("client.default_key_id", default_key_id())?
            .set_default("client.failure_policy", "reject")?
            .set_default("client.key_cache_size", 16)?
            .set_default("client.request_timeout_secs", 30)?
            .set_default("token.expiration_buffer_secs", 60)?
            .set_default("metrics.enabled", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("HEARTHGUARD")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl ServerConfig {
    /// Shutdown timeout as a duration.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl ClientConfig {
    /// Full URL of an API path, e.g. `/auth/refresh`.
    #[must_use]
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}{}{}",
            self.base_url.trim_end_matches('/'),
            self.api_prefix,
            path
        )
    }

    /// Request timeout as a duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl TokenConfig {
    /// Expiration buffer as a duration.
    #[must_use]
    pub fn expiration_buffer(&self) -> Duration {
        Duration::from_secs(self.expiration_buffer_secs)
    }
}

#[cfg(test)]
impl AppConfig {
    /// Configuration with every default applied.
    pub(crate) fn for_tests() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "127.0.0.1:0".to_string(),
                keys_dir: default_keys_dir(),
                require_auth: true,
                shutdown_timeout_secs: 1,
            },
            client: ClientConfig {
                base_url: default_base_url(),
                api_prefix: default_api_prefix(),
                default_key_id: default_key_id(),
                failure_policy: FailurePolicy::Reject,
                key_cache_size: default_key_cache_size(),
                request_timeout_secs: 5,
            },
            token: TokenConfig {
                expiration_buffer_secs: default_expiration_buffer(),
            },
            metrics: MetricsConfig { enabled: true },
            logging: LoggingConfig {
                level: default_log_level(),
                format: "off".to_string(),
            },
        }
    }
}
