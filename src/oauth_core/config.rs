//! Provider configuration records.
//!
//! A provider is described by data rather than by a type: endpoints, client
//! credentials, protocol switches and a small set of [`Quirk`]s.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::http_client::HttpMethod;
use super::signature::{SignatureMethod, signature_method_from_name};
use super::types::{OAuthError, Result};

/// JWS algorithms accepted for id tokens unless configured otherwise.
pub const DEFAULT_JWS_ALGORITHMS: [&str; 11] = [
    "HS256", "HS384", "HS512", "RS256", "RS384", "RS512", "ES256", "ES384", "PS256", "PS384", "PS512",
];

/// Which HTTP methods carry OAuth 1.0a parameters in the `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationHeaderMethods {
    /// Only POST requests.
    #[default]
    Post,
    /// Every request.
    All,
    /// Never; parameters stay in the query or body.
    None,
    /// An explicit list.
    Methods(Vec<HttpMethod>),
}

impl AuthorizationHeaderMethods {
    pub fn contains(&self, method: HttpMethod) -> bool {
        match self {
            AuthorizationHeaderMethods::Post => method == HttpMethod::POST,
            AuthorizationHeaderMethods::All => true,
            AuthorizationHeaderMethods::None => false,
            AuthorizationHeaderMethods::Methods(list) => list.contains(&method),
        }
    }
}

/// How OAuth2 resource calls carry the access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTokenPlacement {
    /// `access_token` request parameter.
    #[default]
    QueryParam,
    /// `Authorization: Bearer <token>` header.
    BearerHeader,
}

/// Provider specific behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quirk {
    /// Sign API calls with `appsecret_proof = hex(HMAC-SHA256(client_secret, access_token))`.
    AppSecretProof,
    /// Send the access token as a bearer header on API calls.
    BearerHeader,
}

/// Configuration for one identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Identity string; prefixes every state store key.
    pub id: String,
    pub client_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
    /// Authorization endpoint (OAuth2) or user authorize endpoint (OAuth1).
    pub auth_url: Option<String>,
    /// Token endpoint.
    pub token_url: Option<String>,
    /// Base URL that relative API paths are joined to.
    pub api_base_url: Option<String>,
    /// Callback URL registered with the provider.
    pub return_url: Option<String>,
    pub scope: Option<String>,
    /// Per-request network timeout.
    pub timeout_secs: Option<u64>,

    // OAuth 1.0a
    pub request_token_url: Option<String>,
    pub request_token_method: HttpMethod,
    pub access_token_url: Option<String>,
    pub access_token_method: HttpMethod,
    pub authorization_header_methods: AuthorizationHeaderMethods,
    pub realm: Option<String>,
    /// `PLAINTEXT`, `HMAC-SHA*` or `RSA-SHA*`.
    pub signature_method: String,
    pub rsa_private_key_pem: Option<String>,
    pub rsa_public_key_pem: Option<String>,

    // OAuth 2.0
    pub validate_auth_state: bool,
    pub enable_pkce: bool,
    pub auto_refresh_access_token: bool,
    pub access_token_placement: AccessTokenPlacement,

    // OpenID Connect
    pub issuer_url: Option<String>,
    /// Overrides the discovered `jwks_uri`.
    pub jwks_url: Option<String>,
    pub validate_jws: bool,
    /// `None` enables nonce checks when the provider lists `nonce` in `claims_supported`.
    pub validate_auth_nonce: Option<bool>,
    pub allowed_jws_algorithms: Vec<String>,

    pub quirks: Vec<Quirk>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            auth_url: None,
            token_url: None,
            api_base_url: None,
            return_url: None,
            scope: None,
            timeout_secs: None,
            request_token_url: None,
            request_token_method: HttpMethod::GET,
            access_token_url: None,
            access_token_method: HttpMethod::GET,
            authorization_header_methods: AuthorizationHeaderMethods::Post,
            realm: None,
            signature_method: "HMAC-SHA1".to_string(),
            rsa_private_key_pem: None,
            rsa_public_key_pem: None,
            validate_auth_state: true,
            enable_pkce: false,
            auto_refresh_access_token: true,
            access_token_placement: AccessTokenPlacement::QueryParam,
            issuer_url: None,
            jwks_url: None,
            validate_jws: true,
            validate_auth_nonce: None,
            allowed_jws_algorithms: DEFAULT_JWS_ALGORITHMS.iter().map(|a| a.to_string()).collect(),
            quirks: Vec::new(),
        }
    }
}

impl ProviderConfig {
    /// Starts a builder for provider `id`.
    pub fn builder(id: impl Into<String>) -> ProviderConfigBuilder {
        ProviderConfigBuilder { config: ProviderConfig { id: id.into(), ..ProviderConfig::default() } }
    }

    /// Parses a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ProviderConfig =
            serde_json::from_str(json).map_err(|e| OAuthError::Configuration(format!("invalid provider config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks fields every engine depends on.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(OAuthError::Configuration("provider id must not be empty".into()));
        }
        if self.client_id.is_empty() {
            return Err(OAuthError::Configuration(format!("provider {:?} has no client_id", self.id)));
        }
        Ok(())
    }

    pub fn has_quirk(&self, quirk: Quirk) -> bool {
        self.quirks.contains(&quirk)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Namespaced state store key for a logical key.
    pub fn state_key(&self, key: &str) -> String {
        format!("{}_{}", self.id, key)
    }

    /// Resolves the configured signature method together with its key material.
    pub fn signature_method(&self) -> Result<Arc<dyn SignatureMethod>> {
        signature_method_from_name(
            &self.signature_method,
            self.rsa_private_key_pem.as_deref(),
            self.rsa_public_key_pem.as_deref(),
        )
    }

    /// A required URL field, or a configuration error naming it.
    pub fn require<'a>(&self, value: &'a Option<String>, field: &str) -> Result<&'a str> {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| OAuthError::Configuration(format!("provider {:?} has no {field}", self.id)))
    }
}

/// Builder for [`ProviderConfig`]; defaults are resolved when it is created.
#[derive(Debug, Clone)]
pub struct ProviderConfigBuilder {
    config: ProviderConfig,
}

impl ProviderConfigBuilder {
    pub fn client_id(mut self, v: impl Into<String>) -> Self {
        self.config.client_id = v.into();
        self
    }

    pub fn client_secret(mut self, v: impl Into<String>) -> Self {
        self.config.client_secret = v.into();
        self
    }

    pub fn auth_url(mut self, v: impl Into<String>) -> Self {
        self.config.auth_url = Some(v.into());
        self
    }

    pub fn token_url(mut self, v: impl Into<String>) -> Self {
        self.config.token_url = Some(v.into());
        self
    }

    pub fn api_base_url(mut self, v: impl Into<String>) -> Self {
        self.config.api_base_url = Some(v.into());
        self
    }

    pub fn return_url(mut self, v: impl Into<String>) -> Self {
        self.config.return_url = Some(v.into());
        self
    }

    pub fn scope(mut self, v: impl Into<String>) -> Self {
        self.config.scope = Some(v.into());
        self
    }

    pub fn timeout_secs(mut self, v: u64) -> Self {
        self.config.timeout_secs = Some(v);
        self
    }

    pub fn request_token_url(mut self, v: impl Into<String>) -> Self {
        self.config.request_token_url = Some(v.into());
        self
    }

    pub fn request_token_method(mut self, v: HttpMethod) -> Self {
        self.config.request_token_method = v;
        self
    }

    pub fn access_token_url(mut self, v: impl Into<String>) -> Self {
        self.config.access_token_url = Some(v.into());
        self
    }

    pub fn access_token_method(mut self, v: HttpMethod) -> Self {
        self.config.access_token_method = v;
        self
    }

    pub fn authorization_header_methods(mut self, v: AuthorizationHeaderMethods) -> Self {
        self.config.authorization_header_methods = v;
        self
    }

    pub fn realm(mut self, v: impl Into<String>) -> Self {
        self.config.realm = Some(v.into());
        self
    }

    pub fn signature_method(mut self, v: impl Into<String>) -> Self {
        self.config.signature_method = v.into();
        self
    }

    pub fn rsa_private_key_pem(mut self, v: impl Into<String>) -> Self {
        self.config.rsa_private_key_pem = Some(v.into());
        self
    }

    pub fn rsa_public_key_pem(mut self, v: impl Into<String>) -> Self {
        self.config.rsa_public_key_pem = Some(v.into());
        self
    }

    pub fn validate_auth_state(mut self, v: bool) -> Self {
        self.config.validate_auth_state = v;
        self
    }

    pub fn enable_pkce(mut self, v: bool) -> Self {
        self.config.enable_pkce = v;
        self
    }

    pub fn auto_refresh_access_token(mut self, v: bool) -> Self {
        self.config.auto_refresh_access_token = v;
        self
    }

    pub fn access_token_placement(mut self, v: AccessTokenPlacement) -> Self {
        self.config.access_token_placement = v;
        self
    }

    pub fn issuer_url(mut self, v: impl Into<String>) -> Self {
        self.config.issuer_url = Some(v.into());
        self
    }

    pub fn jwks_url(mut self, v: impl Into<String>) -> Self {
        self.config.jwks_url = Some(v.into());
        self
    }

    pub fn validate_jws(mut self, v: bool) -> Self {
        self.config.validate_jws = v;
        self
    }

    pub fn validate_auth_nonce(mut self, v: bool) -> Self {
        self.config.validate_auth_nonce = Some(v);
        self
    }

    pub fn allowed_jws_algorithms<I, S>(mut self, algs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_jws_algorithms = algs.into_iter().map(Into::into).collect();
        self
    }

    pub fn quirk(mut self, quirk: Quirk) -> Self {
        if !self.config.quirks.contains(&quirk) {
            self.config.quirks.push(quirk);
        }
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<ProviderConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
