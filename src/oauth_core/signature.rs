//! Signature methods used by OAuth 1.0a request signing and JWT assertions.
//!
//! Every method exposes its protocol name (`oauth_signature_method`) and a
//! raw sign/verify pair. The string-level [`SignatureMethod::sign`] encodes
//! raw signatures as standard base64, which is what OAuth 1.0a expects.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ring::hmac;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::Digest;
use subtle::ConstantTimeEq;

use super::types::{OAuthError, Result};

/// A pluggable signing strategy.
pub trait SignatureMethod: Send + Sync + fmt::Debug {
    /// Canonical name, e.g. `HMAC-SHA1`.
    fn name(&self) -> &'static str;

    /// Signs `base` with `key` and returns the raw signature bytes.
    fn sign_raw(&self, base: &[u8], key: &[u8]) -> Result<Vec<u8>>;

    /// Checks a raw signature produced by [`SignatureMethod::sign_raw`].
    fn verify_raw(&self, signature: &[u8], base: &[u8], key: &[u8]) -> bool;

    /// Signs `base` and returns the base64 encoded signature.
    fn sign(&self, base: &str, key: &str) -> Result<String> {
        Ok(STANDARD.encode(self.sign_raw(base.as_bytes(), key.as_bytes())?))
    }

    /// Verifies a base64 encoded signature. Undecodable input is simply invalid.
    fn verify(&self, signature: &str, base: &str, key: &str) -> bool {
        match STANDARD.decode(signature) {
            Ok(raw) => self.verify_raw(&raw, base.as_bytes(), key.as_bytes()),
            Err(_) => false,
        }
    }

    /// JWS `alg` value for this method: `HMAC-SHA256` becomes `HS256`,
    /// `RSA-SHA256` becomes `RS256`, `PLAINTEXT` becomes `none`.
    fn jws_algorithm(&self) -> String {
        let name = self.name();
        let bits = name.rsplit("SHA").next().unwrap_or_default();
        if name.starts_with("HMAC-") {
            format!("HS{bits}")
        } else if name.starts_with("RSA-") {
            format!("RS{bits}")
        } else {
            "none".to_string()
        }
    }
}

/// `PLAINTEXT`: the signature is the key itself. Only safe over TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainText;

impl SignatureMethod for PlainText {
    fn name(&self) -> &'static str {
        "PLAINTEXT"
    }

    fn sign_raw(&self, _base: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        Ok(key.to_vec())
    }

    fn verify_raw(&self, signature: &[u8], _base: &[u8], key: &[u8]) -> bool {
        signature.ct_eq(key).into()
    }

    fn sign(&self, _base: &str, key: &str) -> Result<String> {
        Ok(key.to_string())
    }

    fn verify(&self, signature: &str, _base: &str, key: &str) -> bool {
        signature.as_bytes().ct_eq(key.as_bytes()).into()
    }
}

/// `HMAC-SHA*` keyed hash.
#[derive(Clone, Copy)]
pub struct HmacSha {
    name: &'static str,
    algorithm: hmac::Algorithm,
}

impl HmacSha {
    pub fn sha1() -> Self {
        Self { name: "HMAC-SHA1", algorithm: hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY }
    }

    pub fn sha256() -> Self {
        Self { name: "HMAC-SHA256", algorithm: hmac::HMAC_SHA256 }
    }

    pub fn sha384() -> Self {
        Self { name: "HMAC-SHA384", algorithm: hmac::HMAC_SHA384 }
    }

    pub fn sha512() -> Self {
        Self { name: "HMAC-SHA512", algorithm: hmac::HMAC_SHA512 }
    }
}

impl fmt::Debug for HmacSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacSha").field("name", &self.name).finish()
    }
}

impl SignatureMethod for HmacSha {
    fn name(&self) -> &'static str {
        self.name
    }

    fn sign_raw(&self, base: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        let s_key = hmac::Key::new(self.algorithm, key);
        Ok(hmac::sign(&s_key, base).as_ref().to_vec())
    }

    fn verify_raw(&self, signature: &[u8], base: &[u8], key: &[u8]) -> bool {
        let s_key = hmac::Key::new(self.algorithm, key);
        hmac::verify(&s_key, base, signature).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RsaDigest {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl RsaDigest {
    fn padding_and_hash(self, data: &[u8]) -> (Pkcs1v15Sign, Vec<u8>) {
        match self {
            RsaDigest::Sha1 => (Pkcs1v15Sign::new::<sha1::Sha1>(), sha1::Sha1::digest(data).to_vec()),
            RsaDigest::Sha256 => (Pkcs1v15Sign::new::<sha2::Sha256>(), sha2::Sha256::digest(data).to_vec()),
            RsaDigest::Sha384 => (Pkcs1v15Sign::new::<sha2::Sha384>(), sha2::Sha384::digest(data).to_vec()),
            RsaDigest::Sha512 => (Pkcs1v15Sign::new::<sha2::Sha512>(), sha2::Sha512::digest(data).to_vec()),
        }
    }
}

/// `RSA-SHA*` (PKCS#1 v1.5) signatures.
///
/// Keys come from configured PEM certificates. When none is configured the
/// `key` argument of sign/verify is read as a PEM document instead.
#[derive(Clone)]
pub struct RsaSha {
    name: &'static str,
    digest: RsaDigest,
    private_key: Option<RsaPrivateKey>,
    public_key: Option<RsaPublicKey>,
}

impl RsaSha {
    fn with_digest(name: &'static str, digest: RsaDigest) -> Self {
        Self { name, digest, private_key: None, public_key: None }
    }

    pub fn sha1() -> Self {
        Self::with_digest("RSA-SHA1", RsaDigest::Sha1)
    }

    pub fn sha256() -> Self {
        Self::with_digest("RSA-SHA256", RsaDigest::Sha256)
    }

    pub fn sha384() -> Self {
        Self::with_digest("RSA-SHA384", RsaDigest::Sha384)
    }

    pub fn sha512() -> Self {
        Self::with_digest("RSA-SHA512", RsaDigest::Sha512)
    }

    /// Loads the signing key (PKCS#8 or PKCS#1 PEM). The public half is
    /// derived unless a public certificate is set too.
    pub fn with_private_key_pem(mut self, pem: &str) -> Result<Self> {
        let key = parse_private_pem(pem)?;
        if self.public_key.is_none() {
            self.public_key = Some(key.to_public_key());
        }
        self.private_key = Some(key);
        Ok(self)
    }

    /// Loads the verification key (SPKI or PKCS#1 PEM).
    pub fn with_public_key_pem(mut self, pem: &str) -> Result<Self> {
        self.public_key = Some(parse_public_pem(pem)?);
        Ok(self)
    }

    fn signing_key(&self, key: &[u8]) -> Result<RsaPrivateKey> {
        match &self.private_key {
            Some(k) => Ok(k.clone()),
            None => parse_private_pem(&String::from_utf8_lossy(key)),
        }
    }

    fn verifying_key(&self, key: &[u8]) -> Option<RsaPublicKey> {
        if let Some(k) = &self.public_key {
            return Some(k.clone());
        }
        let pem = String::from_utf8_lossy(key);
        parse_public_pem(&pem)
            .or_else(|_| parse_private_pem(&pem).map(|k| k.to_public_key()))
            .ok()
    }
}

impl fmt::Debug for RsaSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaSha")
            .field("name", &self.name)
            .field("has_private_key", &self.private_key.is_some())
            .field("has_public_key", &self.public_key.is_some())
            .finish()
    }
}

impl SignatureMethod for RsaSha {
    fn name(&self) -> &'static str {
        self.name
    }

    fn sign_raw(&self, base: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        let private_key = self.signing_key(key)?;
        let (padding, hashed) = self.digest.padding_and_hash(base);
        private_key
            .sign(padding, &hashed)
            .map_err(|e| OAuthError::Crypto(format!("RSA signing failed: {e}")))
    }

    fn verify_raw(&self, signature: &[u8], base: &[u8], key: &[u8]) -> bool {
        let Some(public_key) = self.verifying_key(key) else {
            return false;
        };
        let (padding, hashed) = self.digest.padding_and_hash(base);
        public_key.verify(padding, &hashed, signature).is_ok()
    }
}

fn parse_private_pem(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| OAuthError::Crypto(format!("invalid RSA private key: {e}")))
}

fn parse_public_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| OAuthError::Crypto(format!("invalid RSA public key: {e}")))
}

/// Resolves a signature method by its protocol name.
///
/// RSA methods pick up the given PEM certificates.
pub fn signature_method_from_name(
    name: &str,
    private_key_pem: Option<&str>,
    public_key_pem: Option<&str>,
) -> Result<Arc<dyn SignatureMethod>> {
    let rsa = |method: RsaSha| -> Result<Arc<dyn SignatureMethod>> {
        let method = match public_key_pem {
            Some(pem) => method.with_public_key_pem(pem)?,
            None => method,
        };
        let method = match private_key_pem {
            Some(pem) => method.with_private_key_pem(pem)?,
            None => method,
        };
        Ok(Arc::new(method))
    };
    match name.to_ascii_uppercase().as_str() {
        "PLAINTEXT" => Ok(Arc::new(PlainText)),
        "HMAC-SHA1" => Ok(Arc::new(HmacSha::sha1())),
        "HMAC-SHA256" => Ok(Arc::new(HmacSha::sha256())),
        "HMAC-SHA384" => Ok(Arc::new(HmacSha::sha384())),
        "HMAC-SHA512" => Ok(Arc::new(HmacSha::sha512())),
        "RSA-SHA1" => rsa(RsaSha::sha1()),
        "RSA-SHA256" => rsa(RsaSha::sha256()),
        "RSA-SHA384" => rsa(RsaSha::sha384()),
        "RSA-SHA512" => rsa(RsaSha::sha512()),
        other => Err(OAuthError::Configuration(format!("unknown signature method {other:?}"))),
    }
}
