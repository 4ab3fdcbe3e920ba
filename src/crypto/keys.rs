//! Public key retrieval for the sealing side.
//!
//! Keys are served as SPKI PEM at `/.well-known/enc-keys/<key_id>.pem`.
//! Imported keys are cached by key id; call [`KeyFetcher::invalidate`] after
//! a rotation.

use std::num::NonZeroUsize;

use lru::LruCache;
use reqwest::Client;
use rsa::RsaPublicKey;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::envelope::import_public_key;
use crate::error::{Error, Result};
use crate::metrics::Metrics;

/// Directory under which public keys are published.
pub const WELL_KNOWN_KEY_PATH: &str = "/.well-known/enc-keys";

/// Longest accepted key id.
const MAX_KEY_ID_LEN: usize = 64;

/// Reject key ids that could escape the well-known path or the keys dir.
pub fn validate_key_id(key_id: &str) -> Result<()> {
    let well_formed = !key_id.is_empty()
        && key_id.len() <= MAX_KEY_ID_LEN
        && !key_id.starts_with('.')
        && key_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if well_formed {
        Ok(())
    } else {
        Err(Error::InvalidKeyId(key_id.to_string()))
    }
}

/// Path of the public key for `key_id`, relative to the origin.
#[must_use]
pub fn public_key_path(key_id: &str) -> String {
    format!("{WELL_KNOWN_KEY_PATH}/{key_id}.pem")
}

/// Fetches and caches recipient public keys.
pub struct KeyFetcher {
    http_client: Client,
    base_url: String,
    cache: RwLock<LruCache<String, RsaPublicKey>>,
    metrics: Option<Metrics>,
}

impl KeyFetcher {
    /// Create a fetcher for keys published under `base_url`.
    pub fn new(http_client: Client, base_url: impl Into<String>, cache_size: usize) -> Self {
        let cache_size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: RwLock::new(LruCache::new(cache_size)),
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fetch the PEM text for `key_id`. Non-2xx responses are errors.
    pub async fn fetch_public_key_pem(&self, key_id: &str) -> Result<String> {
        validate_key_id(key_id)?;
        let url = format!("{}{}", self.base_url, public_key_path(key_id));

        let result = self.fetch(&url).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_key_fetch(if result.is_ok() { "success" } else { "error" });
        }
        result
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(%url, %status, "Public key request failed");
            return Err(Error::KeyFetch(format!(
                "Failed to retrieve public key: {status}"
            )));
        }

        Ok(response.text().await?)
    }

    /// Imported public key for `key_id`, from cache or the network.
    pub async fn public_key(&self, key_id: &str) -> Result<RsaPublicKey> {
        validate_key_id(key_id)?;

        // `LruCache::get` updates recency, hence the write lock.
        if let Some(key) = self.cache.write().await.get(key_id) {
            if let Some(metrics) = &self.metrics {
                metrics.record_key_cache_hit();
            }
            return Ok(key.clone());
        }

        let pem = self.fetch_public_key_pem(key_id).await?;
        let key = import_public_key(&pem)?;

        debug!(key_id, "Cached public key");
        self.cache.write().await.put(key_id.to_string(), key.clone());
        Ok(key)
    }

    /// Forget a cached key so the next lookup refetches it.
    pub async fn invalidate(&self, key_id: &str) {
        self.cache.write().await.pop(key_id);
    }

    #[cfg(test)]
    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_vectors::{test_opener, test_public_key_pem};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn key_server(key_id: &str, expected_calls: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(public_key_path(key_id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(test_public_key_pem()))
            .expect(expected_calls)
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_validate_key_id() {
        for ok in ["v1", "2026-10", "prod_key.3", "A"] {
            assert!(validate_key_id(ok).is_ok(), "{ok}");
        }
        let too_long = "k".repeat(65);
        for bad in ["", "../v1", "v1/..", ".hidden", "v 1", "v1%2f", too_long.as_str()] {
            assert!(validate_key_id(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_public_key_path() {
        assert_eq!(public_key_path("v1"), "/.well-known/enc-keys/v1.pem");
    }

    #[tokio::test]
    async fn test_fetch_public_key_pem() {
        let server = key_server("v1", 1).await;
        let fetcher = KeyFetcher::new(Client::new(), server.uri(), 4);

        let pem = fetcher.fetch_public_key_pem("v1").await.unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
    }

    #[tokio::test]
    async fn test_fetch_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let metrics = Metrics::new().unwrap();
        let fetcher = KeyFetcher::new(Client::new(), server.uri(), 4).with_metrics(metrics.clone());

        let err = fetcher.fetch_public_key_pem("v9").await.unwrap_err();
        assert!(matches!(err, Error::KeyFetch(_)));
        assert!(err.to_string().contains("404"));
        assert_eq!(
            metrics.key_fetches_total.with_label_values(&["error"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_fetch_rejects_bad_key_id_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let fetcher = KeyFetcher::new(Client::new(), server.uri(), 4);
        let err = fetcher.fetch_public_key_pem("../secrets").await.unwrap_err();
        assert!(matches!(err, Error::InvalidKeyId(_)));
    }

    #[tokio::test]
    async fn test_public_key_is_cached() {
        let server = key_server("v1", 1).await;
        let metrics = Metrics::new().unwrap();
        let fetcher =
            KeyFetcher::new(Client::new(), format!("{}/", server.uri()), 4).with_metrics(metrics.clone());

        let first = fetcher.public_key("v1").await.unwrap();
        let second = fetcher.public_key("v1").await.unwrap();

        assert_eq!(first, test_opener().public_key());
        assert_eq!(first, second);
        assert_eq!(fetcher.cached_len().await, 1);
        assert_eq!(metrics.key_cache_hits_total.get(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let server = key_server("v1", 2).await;
        let fetcher = KeyFetcher::new(Client::new(), server.uri(), 4);

        fetcher.public_key("v1").await.unwrap();
        fetcher.invalidate("v1").await;
        assert_eq!(fetcher.cached_len().await, 0);
        fetcher.public_key("v1").await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_pem_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let fetcher = KeyFetcher::new(Client::new(), server.uri(), 4);
        assert!(fetcher.public_key("v1").await.is_err());
        assert_eq!(fetcher.cached_len().await, 0);
    }
}
