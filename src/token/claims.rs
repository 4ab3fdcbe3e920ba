//! Token payload claims.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decoded token payload.
///
/// Claims are kept as the raw JSON object so that unknown claims survive;
/// the registered ones are exposed through typed accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Wrap a JSON object.
    #[must_use]
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Subject, typically the user id.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.get_str("sub")
    }

    /// Expiration in seconds since the epoch.
    ///
    /// Any JSON number is accepted. A non-numeric `exp` reads as absent.
    #[must_use]
    pub fn expiration(&self) -> Option<f64> {
        self.get("exp").and_then(Value::as_f64)
    }

    /// Issued-at in seconds since the epoch.
    #[must_use]
    pub fn issued_at(&self) -> Option<f64> {
        self.get("iat").and_then(Value::as_f64)
    }

    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.get_str("iss")
    }

    /// Audience, which may be a single string or a list.
    #[must_use]
    pub fn audience(&self) -> Vec<String> {
        match self.get("aud") {
            Some(Value::String(aud)) => vec![aud.clone()],
            Some(Value::Array(_)) => self.claim("aud").unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.get_str("email")
    }

    /// Role list; empty when absent or not a list of strings.
    #[must_use]
    pub fn roles(&self) -> Vec<String> {
        self.claim("roles").unwrap_or_default()
    }

    /// Raw claim value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Claim deserialized into `T`, or `None` if absent or of another shape.
    #[must_use]
    pub fn claim<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        T::deserialize(self.get(name)?).ok()
    }

    fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Claims {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_registered_claims() {
        let c = claims(json!({
            "sub": "u1",
            "exp": 1_900_000_000,
            "iat": 1_899_996_400,
            "iss": "household-api",
            "email": "ana@example.com",
            "roles": ["parent", "admin"]
        }));

        assert_eq!(c.subject(), Some("u1"));
        assert_eq!(c.expiration(), Some(1_900_000_000.0));
        assert_eq!(c.issued_at(), Some(1_899_996_400.0));
        assert_eq!(c.issuer(), Some("household-api"));
        assert_eq!(c.email(), Some("ana@example.com"));
        assert_eq!(c.roles(), vec!["parent", "admin"]);
    }

    #[test]
    fn test_fractional_exp_is_numeric() {
        let c = claims(json!({ "exp": 1_900_000_000.5 }));
        assert_eq!(c.expiration(), Some(1_900_000_000.5));
    }

    #[test]
    fn test_string_exp_reads_as_absent() {
        let c = claims(json!({ "exp": "1900000000" }));
        assert_eq!(c.expiration(), None);
    }

    #[test]
    fn test_roles_default_to_empty() {
        assert!(claims(json!({})).roles().is_empty());
        assert!(claims(json!({ "roles": "admin" })).roles().is_empty());
        assert!(claims(json!({ "roles": [1, 2] })).roles().is_empty());
    }

    #[test]
    fn test_audience_string_or_list() {
        assert_eq!(claims(json!({ "aud": "web" })).audience(), vec!["web"]);
        assert_eq!(
            claims(json!({ "aud": ["web", "mobile"] })).audience(),
            vec!["web", "mobile"]
        );
        assert!(claims(json!({ "aud": 7 })).audience().is_empty());
    }

    #[test]
    fn test_custom_claims_preserved() {
        let c = claims(json!({ "household_id": 42, "features": { "budget": true } }));

        assert_eq!(c.claim::<u32>("household_id"), Some(42));
        assert_eq!(c.get("features"), Some(&json!({ "budget": true })));
        assert_eq!(c.claim::<String>("household_id"), None);
        assert_eq!(c.claim::<String>("missing"), None);
    }
}
