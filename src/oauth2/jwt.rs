//! Compact JWT assertions for the JWT-bearer grant and `client_secret_jwt`.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value, json};

use crate::oauth_core::signature::{HmacSha, SignatureMethod};
use crate::oauth_core::types::{OAuthError, Result};

/// Lifetime of generated assertions, in seconds.
pub const ASSERTION_LIFETIME: i64 = 3600;

/// Signature method plus the key it signs with.
#[derive(Debug, Clone)]
pub struct JwtSigner {
    pub method: Arc<dyn SignatureMethod>,
    pub key: String,
}

impl JwtSigner {
    pub fn new(method: Arc<dyn SignatureMethod>, key: impl Into<String>) -> Self {
        Self { method, key: key.into() }
    }

    /// `HS256` keyed with a shared secret.
    pub fn hmac_sha256(secret: impl Into<String>) -> Self {
        Self::new(Arc::new(HmacSha::sha256()), secret)
    }
}

/// Extra header and payload members; they override the generated ones.
#[derive(Debug, Clone, Default)]
pub struct JwtOptions {
    pub header: Map<String, Value>,
    pub payload: Map<String, Value>,
}

fn encode_segment(value: &Map<String, Value>) -> Result<String> {
    let json = serde_json::to_vec(value).map_err(|e| OAuthError::Crypto(format!("cannot encode JWT segment: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// `base64url(header).base64url(payload).base64url(signature)`.
///
/// `typ` and `alg` are filled in from the signer unless `header` sets them.
pub fn encode_jwt(header: &Map<String, Value>, payload: &Map<String, Value>, signer: &JwtSigner) -> Result<String> {
    let mut full_header = Map::new();
    full_header.insert("typ".into(), json!("JWT"));
    full_header.insert("alg".into(), Value::String(signer.method.jws_algorithm()));
    full_header.extend(header.clone());

    let signing_input = format!("{}.{}", encode_segment(&full_header)?, encode_segment(payload)?);
    let signature = signer.method.sign_raw(signing_input.as_bytes(), signer.key.as_bytes())?;
    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
}

/// Standard assertion claims: `iss`, `aud`, `iat`, `exp = iat + 3600`, then `extra`.
pub fn assertion_claims(issuer: &str, audience: &str, issued_at: i64, extra: &Map<String, Value>) -> Map<String, Value> {
    let mut claims = Map::new();
    claims.insert("iss".into(), json!(issuer));
    claims.insert("aud".into(), json!(audience));
    claims.insert("iat".into(), json!(issued_at));
    claims.insert("exp".into(), json!(issued_at + ASSERTION_LIFETIME));
    claims.extend(extra.clone());
    claims
}

/// Splits a compact JWT and decodes its header and payload without verifying it.
pub fn decode_unverified(jwt: &str) -> Result<(Map<String, Value>, Map<String, Value>)> {
    let mut parts = jwt.split('.');
    let (Some(header), Some(payload), Some(_), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return Err(OAuthError::Client("malformed JWT: expected three segments".into()));
    };
    Ok((decode_segment(header)?, decode_segment(payload)?))
}

fn decode_segment(segment: &str) -> Result<Map<String, Value>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| OAuthError::Client(format!("malformed JWT segment: {e}")))?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(OAuthError::Client("malformed JWT segment: not a JSON object".into())),
    }
}
