//! Structural and expiry checks for access tokens.
//!
//! The validator decodes the payload segment and compares `exp` against the
//! clock minus a safety buffer. It never verifies signatures.
//!
//! # Fail-closed
//!
//! A token that does not decode, or whose payload carries no numeric `exp`,
//! is expired. An unbounded token is never trusted.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use super::Claims;
use crate::config::TokenConfig;

/// Default buffer subtracted from `exp` (60 seconds).
pub const DEFAULT_EXPIRATION_BUFFER: Duration = Duration::from_secs(60);

/// Standard alphabet, padding optional, trailing bits tolerated.
///
/// Payload segments are base64url; they are mapped onto the standard
/// alphabet first and then decoded as leniently as a browser's `atob`.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Client-side token validator.
#[derive(Debug, Clone, Copy)]
pub struct TokenValidator {
    buffer: Duration,
}

/// Summary of a token, safe to print: it never contains the token itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenReport {
    pub decoded: bool,
    pub valid: bool,
    pub expired: bool,
    pub subject: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub issuer: Option<String>,
    pub audience: Vec<String>,
    /// Issued-at and expiration in seconds since the epoch.
    pub issued_at: Option<u64>,
    pub expires_at: Option<u64>,
    pub remaining_ms: u64,
}

impl Default for TokenValidator {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRATION_BUFFER)
    }
}

impl TokenValidator {
    /// Create a validator with the given expiration buffer.
    #[must_use]
    pub fn new(buffer: Duration) -> Self {
        Self { buffer }
    }

    #[must_use]
    pub fn from_config(config: &TokenConfig) -> Self {
        Self::new(config.expiration_buffer())
    }

    /// Decode the payload segment of a token.
    ///
    /// Returns `None` unless the token has exactly three `.`-separated
    /// segments and the middle one is base64url-encoded JSON object.
    #[must_use]
    pub fn decode(&self, token: &str) -> Option<Claims> {
        if token.is_empty() {
            return None;
        }

        let mut segments = token.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            trace!("Token does not have three segments");
            return None;
        };

        let standard: String = payload
            .chars()
            .map(|c| match c {
                '-' => '+',
                '_' => '/',
                other => other,
            })
            .collect();

        let bytes = match PAYLOAD_ENGINE.decode(standard) {
            Ok(bytes) => bytes,
            Err(e) => {
                trace!(error = %e, "Token payload is not base64");
                return None;
            }
        };

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Some(Claims::new(map)),
            Ok(_) => {
                trace!("Token payload is not a JSON object");
                None
            }
            Err(e) => {
                trace!(error = %e, "Token payload is not JSON");
                None
            }
        }
    }

    /// Whether the token is expired (or undecodable) right now.
    #[must_use]
    pub fn is_expired(&self, token: &str) -> bool {
        self.is_expired_at(token, SystemTime::now())
    }

    /// Whether the token is expired (or undecodable) at `now`.
    #[must_use]
    pub fn is_expired_at(&self, token: &str, now: SystemTime) -> bool {
        match self.decode(token) {
            Some(claims) => self.claims_expired_at(&claims, now),
            None => true,
        }
    }

    /// Expiry check on already-decoded claims.
    #[must_use]
    pub fn claims_expired_at(&self, claims: &Claims, now: SystemTime) -> bool {
        let Some(exp) = claims.expiration() else {
            return true;
        };

        let buffered_ms = exp * 1000.0 - self.buffer.as_millis() as f64;
        buffered_ms < unix_millis(now)
    }

    /// Whether the token is non-empty, decodes, and is not expired.
    #[must_use]
    pub fn is_valid(&self, token: &str) -> bool {
        self.is_valid_at(token, SystemTime::now())
    }

    #[must_use]
    pub fn is_valid_at(&self, token: &str, now: SystemTime) -> bool {
        self.validate_at(token, now).is_some()
    }

    /// Claims of a token that is valid at `now`.
    #[must_use]
    pub fn validate_at(&self, token: &str, now: SystemTime) -> Option<Claims> {
        let claims = self.decode(token)?;
        (!self.claims_expired_at(&claims, now)).then_some(claims)
    }

    /// Expiration as a timestamp.
    ///
    /// `None` when the token does not decode or `exp` is missing, negative,
    /// or out of range.
    #[must_use]
    pub fn expiration(&self, token: &str) -> Option<SystemTime> {
        self.decode(token).and_then(|claims| expiration_time(&claims))
    }

    /// Time left before `exp` (without the buffer), zero if already past.
    #[must_use]
    pub fn time_until_expiration(&self, token: &str) -> Duration {
        self.time_until_expiration_at(token, SystemTime::now())
    }

    #[must_use]
    pub fn time_until_expiration_at(&self, token: &str, now: SystemTime) -> Duration {
        self.expiration(token)
            .and_then(|expires| expires.duration_since(now).ok())
            .unwrap_or_default()
    }

    /// A single claim, deserialized into `T`.
    #[must_use]
    pub fn claim<T: DeserializeOwned>(&self, token: &str, name: &str) -> Option<T> {
        self.decode(token)?.claim(name)
    }

    /// The `sub` claim.
    #[must_use]
    pub fn user_id(&self, token: &str) -> Option<String> {
        self.claim(token, "sub")
    }

    /// The `email` claim.
    #[must_use]
    pub fn user_email(&self, token: &str) -> Option<String> {
        self.claim(token, "email")
    }

    /// The `roles` claim, empty when absent.
    #[must_use]
    pub fn user_roles(&self, token: &str) -> Vec<String> {
        self.decode(token)
            .map(|claims| claims.roles())
            .unwrap_or_default()
    }

    /// Summarize a token.
    #[must_use]
    pub fn inspect(&self, token: &str) -> TokenReport {
        self.inspect_at(token, SystemTime::now())
    }

    #[must_use]
    pub fn inspect_at(&self, token: &str, now: SystemTime) -> TokenReport {
        let claims = self.decode(token);
        let remaining = self.time_until_expiration_at(token, now);

        TokenReport {
            decoded: claims.is_some(),
            valid: self.is_valid_at(token, now),
            expired: self.is_expired_at(token, now),
            subject: self.user_id(token),
            email: self.user_email(token),
            roles: self.user_roles(token),
            issuer: claims
                .as_ref()
                .and_then(|c| c.issuer().map(str::to_string)),
            audience: claims.as_ref().map(Claims::audience).unwrap_or_default(),
            issued_at: claims
                .as_ref()
                .and_then(Claims::issued_at)
                .filter(|iat| *iat >= 0.0)
                .map(|iat| iat as u64),
            expires_at: self
                .expiration(token)
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
            remaining_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

fn expiration_time(claims: &Claims) -> Option<SystemTime> {
    let exp = claims.expiration()?;
    let since_epoch = Duration::try_from_secs_f64(exp).ok()?;
    UNIX_EPOCH.checked_add(since_epoch)
}

fn unix_millis(now: SystemTime) -> f64 {
    match now.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as f64,
        Err(e) => -(e.duration().as_millis() as f64),
    }
}
