//! JSON Web Key Sets and conversion of keys to verification material.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::DecodingKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::oauth_core::types::{OAuthError, Result};

/// A JWK as represented in a JWKS endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    // RSA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    // EC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    fn component<'a>(&self, value: &'a Option<String>, name: &str) -> Result<&'a str> {
        value
            .as_deref()
            .ok_or_else(|| OAuthError::Client(format!("JWK {:?} lacks the {name} member", self.kid)))
    }

    fn decode_uint(&self, value: &Option<String>, name: &str) -> Result<BigUint> {
        let raw = URL_SAFE_NO_PAD
            .decode(self.component(value, name)?.trim_end_matches('='))
            .map_err(|e| OAuthError::Client(format!("JWK {name} is not base64url: {e}")))?;
        Ok(BigUint::from_bytes_be(&raw))
    }

    /// SPKI PEM of an RSA key rebuilt from its modulus `n` and exponent `e`.
    pub fn to_pem(&self) -> Result<String> {
        if self.kty != "RSA" {
            return Err(OAuthError::Client(format!("cannot build a PEM from a {} key", self.kty)));
        }
        let key = RsaPublicKey::new(self.decode_uint(&self.n, "n")?, self.decode_uint(&self.e, "e")?)
            .map_err(|e| OAuthError::Client(format!("invalid RSA JWK: {e}")))?;
        key.to_public_key_pem(LineEnding::LF)
            .map_err(|e| OAuthError::Crypto(format!("cannot encode RSA public key: {e}")))
    }

    /// Verification key for this JWK.
    pub fn decoding_key(&self) -> Result<DecodingKey> {
        match self.kty.as_str() {
            "RSA" => DecodingKey::from_rsa_pem(self.to_pem()?.as_bytes())
                .map_err(|e| OAuthError::Crypto(format!("cannot load RSA key: {e}"))),
            "EC" => DecodingKey::from_ec_components(self.component(&self.x, "x")?, self.component(&self.y, "y")?)
                .map_err(|e| OAuthError::Crypto(format!("cannot load EC key: {e}"))),
            other => Err(OAuthError::Client(format!("unsupported JWK key type {other:?}"))),
        }
    }

    fn usable_for_signatures(&self) -> bool {
        self.use_.as_deref().is_none_or(|u| u == "sig")
    }
}

/// A JWKS response containing multiple keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| OAuthError::Protocol(format!("malformed JWKS document: {e}")))
    }

    /// Signing key with the given `kid`. Without a `kid`, a set holding a
    /// single signing key yields that key.
    pub fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
        let mut signing = self.keys.iter().filter(|k| k.usable_for_signatures());
        match kid {
            Some(kid) => signing.find(|k| k.kid.as_deref() == Some(kid)),
            None => {
                let first = signing.next();
                if signing.next().is_some() { None } else { first }
            }
        }
    }
}
