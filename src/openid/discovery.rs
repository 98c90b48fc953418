//! OpenID provider metadata (`/.well-known/openid-configuration`) and the
//! cache shared between clients of the same provider.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::{Map, Value};

use super::jwks::JwkSet;

pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Discovery document URL for `issuer`.
pub fn discovery_url(issuer: &str) -> String {
    format!("{}{}", issuer.trim_end_matches('/'), DISCOVERY_PATH)
}

/// Result of parsing /.well-known/openid-configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderMetadata {
    params: Map<String, Value>,
}

impl ProviderMetadata {
    pub fn new(params: Map<String, Value>) -> Self {
        Self { params }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.params
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    fn string_list(&self, name: &str) -> Option<Vec<String>> {
        self.params
            .get(name)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
    }

    pub fn issuer(&self) -> Option<&str> {
        self.get_str("issuer")
    }

    pub fn authorization_endpoint(&self) -> Option<&str> {
        self.get_str("authorization_endpoint")
    }

    pub fn token_endpoint(&self) -> Option<&str> {
        self.get_str("token_endpoint")
    }

    pub fn userinfo_endpoint(&self) -> Option<&str> {
        self.get_str("userinfo_endpoint")
    }

    pub fn jwks_uri(&self) -> Option<&str> {
        self.get_str("jwks_uri")
    }

    pub fn claims_supported(&self) -> Vec<String> {
        self.string_list("claims_supported").unwrap_or_default()
    }

    /// Advertised token endpoint auth methods; `client_secret_basic` when absent.
    pub fn token_endpoint_auth_methods_supported(&self) -> Vec<String> {
        self.string_list("token_endpoint_auth_methods_supported")
            .unwrap_or_else(|| vec!["client_secret_basic".to_string()])
    }
}

#[derive(Clone)]
struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

/// Discovery documents and key sets keyed by provider id.
///
/// These are public provider data, so one cache can serve every session.
/// Entries live until `ttl` passes (forever without one) or until they are
/// invalidated.
#[derive(Clone, Default)]
pub struct OidcCache {
    configs: Arc<DashMap<String, Cached<ProviderMetadata>>>,
    jwks: Arc<DashMap<String, Cached<JwkSet>>>,
    ttl: Option<Duration>,
}

impl OidcCache {
    /// Creates an empty cache whose entries never expire.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty cache whose entries expire after `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl), ..Self::default() }
    }

    fn fresh<T: Clone>(&self, entry: &Cached<T>) -> Option<T> {
        match self.ttl {
            Some(ttl) if entry.fetched_at.elapsed() > ttl => None,
            _ => Some(entry.value.clone()),
        }
    }

    pub fn config(&self, provider: &str) -> Option<ProviderMetadata> {
        self.configs.get(provider).and_then(|entry| self.fresh(entry.value()))
    }

    pub fn set_config(&self, provider: &str, metadata: ProviderMetadata) {
        self.configs.insert(provider.to_owned(), Cached { value: metadata, fetched_at: Instant::now() });
    }

    pub fn jwks(&self, provider: &str) -> Option<JwkSet> {
        self.jwks.get(provider).and_then(|entry| self.fresh(entry.value()))
    }

    pub fn set_jwks(&self, provider: &str, keys: JwkSet) {
        self.jwks.insert(provider.to_owned(), Cached { value: keys, fetched_at: Instant::now() });
    }

    /// Drops everything cached for `provider`.
    pub fn invalidate(&self, provider: &str) {
        self.configs.remove(provider);
        self.jwks.remove(provider);
    }
}
