//! Compact JWS verification and id token claim checks.

use std::str::FromStr;

use jsonwebtoken::{Algorithm, DecodingKey};
use serde_json::{Map, Value};
use tracing::warn;

use crate::oauth2::jwt::decode_unverified;
use crate::oauth_core::types::{OAuthError, Result};

/// Tolerated clock skew when checking `exp`, in seconds.
pub const CLOCK_SKEW: i64 = 60;

/// A split compact JWS with its decoded header and payload.
#[derive(Debug, Clone)]
pub struct Jws<'a> {
    pub header: Map<String, Value>,
    pub payload: Map<String, Value>,
    signing_input: &'a str,
    signature: &'a str,
}

impl<'a> Jws<'a> {
    /// Splits `token` on `.` and decodes header and payload.
    pub fn parse(token: &'a str) -> Result<Self> {
        let (header, payload) = decode_unverified(token)?;
        let Some((signing_input, signature)) = token.rsplit_once('.') else {
            return Err(OAuthError::Client("malformed JWS".into()));
        };
        Ok(Self { header, payload, signing_input, signature })
    }

    pub fn alg(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }

    pub fn kid(&self) -> Option<&str> {
        self.header.get("kid").and_then(Value::as_str)
    }

    /// The header algorithm, provided it is in `allowed`.
    pub fn algorithm(&self, allowed: &[String]) -> Result<Algorithm> {
        let alg = self.alg().ok_or_else(|| OAuthError::Client("JWS header has no alg".into()))?;
        if !allowed.iter().any(|a| a == alg) {
            warn!(alg, "JWS algorithm is not allowed");
            return Err(OAuthError::Client(format!("JWS algorithm {alg:?} is not allowed")));
        }
        Algorithm::from_str(alg).map_err(|_| OAuthError::Client(format!("unsupported JWS algorithm {alg:?}")))
    }

    /// Checks the signature with `key` under `algorithm`.
    pub fn verify(&self, key: &DecodingKey, algorithm: Algorithm) -> Result<()> {
        let valid = jsonwebtoken::crypto::verify(self.signature, self.signing_input.as_bytes(), key, algorithm)
            .map_err(|e| OAuthError::Client(format!("JWS verification failed: {e}")))?;
        if valid {
            Ok(())
        } else {
            warn!("JWS signature mismatch");
            Err(OAuthError::Client("JWS signature is invalid".into()))
        }
    }
}

/// Checks `iss` (trailing slash ignored), `aud` (string or array) and `exp`.
pub fn validate_claims(claims: &Map<String, Value>, issuer: &str, client_id: &str, now: i64) -> Result<()> {
    let iss = claims.get("iss").and_then(Value::as_str).unwrap_or_default();
    if iss.is_empty() || iss.trim_end_matches('/') != issuer.trim_end_matches('/') {
        warn!("id token issuer mismatch");
        return Err(OAuthError::Client("invalid \"iss\" claim".into()));
    }
    let aud_ok = match claims.get("aud") {
        Some(Value::String(aud)) => aud == client_id,
        Some(Value::Array(auds)) => auds.iter().any(|a| a.as_str() == Some(client_id)),
        _ => false,
    };
    if !aud_ok {
        warn!("id token audience mismatch");
        return Err(OAuthError::Client("invalid \"aud\" claim".into()));
    }
    if let Some(exp) = claims.get("exp") {
        let exp = exp.as_i64().ok_or_else(|| OAuthError::Client("invalid \"exp\" claim".into()))?;
        if now > exp + CLOCK_SKEW {
            warn!("id token has expired");
            return Err(OAuthError::Client("id token has expired".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn issuer_trailing_slash_is_ignored() {
        let c = claims(json!({"iss": "https://id.example.com/", "aud": "app"}));
        assert!(validate_claims(&c, "https://id.example.com", "app", 0).is_ok());
        let c = claims(json!({"iss": "https://evil.example.com", "aud": "app"}));
        assert!(matches!(validate_claims(&c, "https://id.example.com", "app", 0), Err(OAuthError::Client(_))));
    }

    #[test]
    fn audience_string_or_array() {
        let c = claims(json!({"iss": "i", "aud": ["other", "app"]}));
        assert!(validate_claims(&c, "i", "app", 0).is_ok());
        let c = claims(json!({"iss": "i", "aud": "other"}));
        assert!(validate_claims(&c, "i", "app", 0).is_err());
        let c = claims(json!({"iss": "i"}));
        assert!(validate_claims(&c, "i", "app", 0).is_err());
    }

    #[test]
    fn expiry_with_skew() {
        let c = claims(json!({"iss": "i", "aud": "app", "exp": 1000}));
        assert!(validate_claims(&c, "i", "app", 1000 + CLOCK_SKEW).is_ok());
        assert!(validate_claims(&c, "i", "app", 1001 + CLOCK_SKEW).is_err());
    }

    #[test]
    fn algorithm_allow_list() {
        // {"alg":"HS256","typ":"JWT"}.{}.sig
        let jws = Jws::parse("eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.e30.c2ln").unwrap();
        assert_eq!(jws.algorithm(&["HS256".to_string()]).unwrap(), Algorithm::HS256);
        assert!(jws.algorithm(&["RS256".to_string()]).is_err());
    }
}
