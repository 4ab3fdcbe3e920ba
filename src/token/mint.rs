//! HS256 development tokens.
//!
//! The validator ignores signatures, so these are only useful for exercising
//! expiry handling and the inbox locally.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;

use crate::error::{Error, Result};

/// Claims written into a minted token.
#[derive(Debug, Clone, Serialize)]
pub struct MintClaims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    pub iat: u64,
    pub exp: u64,
}

impl MintClaims {
    /// Claims for `sub`, issued now and valid for `ttl`.
    pub fn new(sub: impl Into<String>, ttl: Duration) -> Result<Self> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Crypto(format!("System time error: {e}")))?
            .as_secs();

        let exp = now
            .checked_add(ttl.as_secs())
            .ok_or_else(|| Error::Crypto(format!("Token lifetime too large: {ttl:?}")))?;

        Ok(Self {
            sub: sub.into(),
            email: None,
            roles: Vec::new(),
            iat: now,
            exp,
        })
    }
}

/// Sign `claims` with HS256.
pub fn mint_token(claims: &MintClaims, secret: &[u8]) -> Result<String> {
    if secret.is_empty() {
        return Err(Error::Crypto("Signing secret must not be empty".to_string()));
    }
    Ok(encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenValidator;

    #[test]
    fn test_minted_token_is_valid() {
        let mut claims = MintClaims::new("u1", Duration::from_secs(3600)).unwrap();
        claims.email = Some("ana@example.com".to_string());
        claims.roles = vec!["parent".to_string()];

        let token = mint_token(&claims, b"dev-secret").unwrap();
        let validator = TokenValidator::default();

        assert_eq!(token.split('.').count(), 3);
        assert!(validator.is_valid(&token));
        assert_eq!(validator.user_id(&token).as_deref(), Some("u1"));
        assert_eq!(validator.user_email(&token).as_deref(), Some("ana@example.com"));
        assert_eq!(validator.user_roles(&token), vec!["parent".to_string()]);
    }

    #[test]
    fn test_short_ttl_is_inside_buffer() {
        let claims = MintClaims::new("u1", Duration::from_secs(30)).unwrap();
        let token = mint_token(&claims, b"dev-secret").unwrap();

        assert!(TokenValidator::default().is_expired(&token));
    }

    #[test]
    fn test_optional_claims_omitted() {
        let claims = MintClaims::new("u1", Duration::from_secs(60)).unwrap();
        let json = serde_json::to_value(&claims).unwrap();

        assert!(json.get("email").is_none());
        assert!(json.get("roles").is_none());
        assert_eq!(json["exp"].as_u64().unwrap() - json["iat"].as_u64().unwrap(), 60);
    }

    #[test]
    fn test_oversized_ttl_rejected() {
        let result = MintClaims::new("u1", Duration::from_secs(u64::MAX));
        assert!(matches!(result, Err(Error::Crypto(_))));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let claims = MintClaims::new("u1", Duration::from_secs(60)).unwrap();
        assert!(mint_token(&claims, b"").is_err());
    }
}
