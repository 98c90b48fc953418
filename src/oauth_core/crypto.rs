//! Randomness, hashing and comparison helpers shared by the engines, using `ring`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::rand::{SecureRandom, SystemRandom};
use ring::{digest, hmac};
use subtle::ConstantTimeEq;

use super::types::{OAuthError, Result};

/// `len` bytes from the system CSPRNG.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| OAuthError::Crypto("system random generator failed".into()))?;
    Ok(buf)
}

/// Random URL-safe string carrying `len` bytes of entropy.
pub fn random_string(len: usize) -> Result<String> {
    Ok(URL_SAFE_NO_PAD.encode(random_bytes(len)?))
}

/// Collision resistant OAuth 1.0a nonce: hex SHA-256 over random bytes and the current time.
pub fn generate_nonce() -> Result<String> {
    let mut ctx = digest::Context::new(&digest::SHA256);
    ctx.update(&random_bytes(16)?);
    ctx.update(&chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
    Ok(hex::encode(ctx.finish()))
}

/// Generate a PKCE code verifier (43 characters, RFC 7636 section 4.1).
pub fn pkce_code_verifier() -> Result<String> {
    random_string(32)
}

/// Generate a PKCE code challenge from the given verifier using SHA-256 and base64url (no padding).
pub fn pkce_code_challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

/// Hex encoded HMAC-SHA256 of `data` under `key`.
pub fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> String {
    let s_key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hex::encode(hmac::sign(&s_key, data).as_ref())
}

/// Constant time string comparison. Empty values never match.
pub fn secure_compare(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}
