//! In-memory session token storage.
//!
//! Nothing is persisted: a restarted process has to log in again or be handed
//! a refresh token. Token strings are zeroed when replaced or cleared.

use tokio::sync::RwLock;
use tracing::warn;
use zeroize::Zeroizing;

type Secret = Zeroizing<String>;

/// Access and refresh token holder shared by the API client.
#[derive(Default)]
pub struct TokenStore {
    access: RwLock<Option<Secret>>,
    refresh: RwLock<Option<Secret>>,
}

impl TokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the access token. Empty tokens are ignored.
    pub async fn set_token(&self, token: &str) {
        if token.is_empty() {
            warn!("Ignoring empty access token");
            return;
        }
        *self.access.write().await = Some(Zeroizing::new(token.to_string()));
    }

    pub async fn token(&self) -> Option<String> {
        self.access.read().await.as_ref().map(|t| t.to_string())
    }

    pub async fn has_token(&self) -> bool {
        self.access.read().await.is_some()
    }

    /// Store the refresh token. Empty tokens are ignored.
    pub async fn set_refresh_token(&self, token: &str) {
        if token.is_empty() {
            warn!("Ignoring empty refresh token");
            return;
        }
        *self.refresh.write().await = Some(Zeroizing::new(token.to_string()));
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.refresh.read().await.as_ref().map(|t| t.to_string())
    }

    pub async fn has_refresh_token(&self) -> bool {
        self.refresh.read().await.is_some()
    }

    /// Store tokens from a login or refresh response.
    pub async fn store_tokens(&self, access: &str, refresh: Option<&str>) {
        self.set_token(access).await;
        if let Some(refresh) = refresh {
            self.set_refresh_token(refresh).await;
        }
    }

    /// Drop both tokens (logout, or a session the API refused).
    pub async fn clear(&self) {
        *self.access.write().await = None;
        *self.refresh.write().await = None;
    }
}
