//! State and behaviour shared by every protocol engine.
//!
//! [`ClientCore`] owns the provider configuration, the injected transport and
//! state store, and the in-memory access token. [`AuthClient`] is the surface
//! a callback handler drives: `authenticate` for the handshake, `api` for
//! resource calls.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use super::config::{ProviderConfig, Quirk};
use super::crypto::hmac_sha256_hex;
use super::http_client::{HttpMethod, HttpRequest, HttpResponse, OAuthHttpClient, TimeoutError};
use super::state_store::StateStore;
use super::token::Token;
use super::types::{AuthOutcome, IncomingRequest, OAuthError, Result};
use super::url_encoding::{join_api_url, parse_query};

/// Logical state key of the pending OAuth 1.0a request token.
pub const STATE_REQUEST_TOKEN: &str = "requestToken";
/// Logical state key of the OAuth2 CSRF state.
pub const STATE_AUTH_STATE: &str = "authState";
/// Logical state key of the OIDC nonce.
pub const STATE_AUTH_NONCE: &str = "authNonce";
/// Logical state key of the PKCE code verifier.
pub const STATE_CODE_VERIFIER: &str = "authCodeVerifier";
/// Logical state key of the current access token.
pub const STATE_TOKEN: &str = "token";

/// Provider configuration, collaborators and the current access token.
#[derive(Clone)]
pub struct ClientCore {
    config: Arc<ProviderConfig>,
    http: Arc<dyn OAuthHttpClient>,
    store: Arc<dyn StateStore>,
    access_token: Option<Token>,
}

impl ClientCore {
    /// Validates `config` and wires the collaborators.
    pub fn new(config: ProviderConfig, http: Arc<dyn OAuthHttpClient>, store: Arc<dyn StateStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config: Arc::new(config), http, store, access_token: None })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn http(&self) -> &Arc<dyn OAuthHttpClient> {
        &self.http
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub async fn set_state(&self, key: &str, value: impl Into<String> + Send) -> Result<()> {
        self.store.set(&self.config.state_key(key), value.into()).await
    }

    pub async fn get_state(&self, key: &str) -> Result<Option<String>> {
        self.store.get(&self.config.state_key(key)).await
    }

    pub async fn remove_state(&self, key: &str) -> Result<()> {
        self.store.remove(&self.config.state_key(key)).await
    }

    /// Single-use read: the entry is gone afterwards whether or not it is valid.
    pub async fn take_state(&self, key: &str) -> Result<Option<String>> {
        self.store.take(&self.config.state_key(key)).await
    }

    /// Stores a token as JSON under `key`.
    pub async fn set_token_state(&self, key: &str, token: &Token) -> Result<()> {
        let json = serde_json::to_string(token).map_err(|e| OAuthError::Storage(format!("cannot encode token: {e}")))?;
        self.set_state(key, json).await
    }

    /// Decodes a token stored with [`ClientCore::set_token_state`].
    pub fn decode_token(json: &str) -> Result<Token> {
        serde_json::from_str(json).map_err(|e| OAuthError::Storage(format!("stored token is corrupt: {e}")))
    }

    pub fn cached_access_token(&self) -> Option<&Token> {
        self.access_token.as_ref()
    }

    /// Makes `token` the current access token and persists it.
    pub async fn save_access_token(&mut self, token: Token) -> Result<()> {
        self.set_token_state(STATE_TOKEN, &token).await?;
        self.access_token = Some(token);
        Ok(())
    }

    /// Reads the persisted access token without touching the in-memory one.
    pub async fn restore_access_token(&self) -> Result<Option<Token>> {
        self.get_state(STATE_TOKEN).await?.map(|json| Self::decode_token(&json)).transpose()
    }

    pub fn cache_access_token(&mut self, token: Token) {
        self.access_token = Some(token);
    }

    /// Forgets the access token in memory and in the store.
    pub async fn clear_access_token(&mut self) -> Result<()> {
        self.access_token = None;
        self.remove_state(STATE_TOKEN).await
    }

    /// A request carrying the configured timeout.
    pub fn new_request(&self, method: HttpMethod, url: impl Into<String>) -> HttpRequest {
        let mut request = HttpRequest::new(method, url);
        request.timeout = self.config.timeout();
        request
    }

    /// Sends a request and fails on transport errors and non-2xx statuses.
    #[instrument(
        skip(self, request),
        level = "debug",
        fields(provider = %self.config.id, method = %request.method, url = %request.url.split('?').next().unwrap_or_default())
    )]
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let request = request.prepare();
        let timeout = request.timeout;
        let fut = self.http.execute(request);
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| OAuthError::Transport(format!("request timed out after {limit:?}")))?,
            None => fut.await,
        };
        let response = outcome.map_err(|e| match e.downcast_ref::<TimeoutError>() {
            Some(timeout) => OAuthError::Transport(timeout.to_string()),
            None => OAuthError::Transport(e.to_string()),
        })?;
        if !response.is_success() {
            warn!(status = response.status, "provider returned a non-success status");
            return Err(OAuthError::InvalidResponse(Box::new(response)));
        }
        debug!(status = response.status, "provider call succeeded");
        Ok(response)
    }

    /// Sends a request to a protocol endpoint and normalizes its key/value answer.
    pub async fn send_for_params(&self, request: HttpRequest) -> Result<Map<String, Value>> {
        let response = self.send(request).await?;
        parse_response_params(&response)
    }
}

fn body_text(response: &HttpResponse) -> Result<&str> {
    std::str::from_utf8(&response.body).map_err(|_| OAuthError::Protocol("response body is not UTF-8".into()))
}

fn looks_like_json(response: &HttpResponse, text: &str) -> bool {
    response.header("Content-Type").is_some_and(|ct| ct.contains("json")) || text.starts_with('{') || text.starts_with('[')
}

/// Parses a JSON object or form encoded body into a parameter map.
pub fn parse_response_params(response: &HttpResponse) -> Result<Map<String, Value>> {
    let text = body_text(response)?.trim();
    if looks_like_json(response, text) {
        return match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(OAuthError::Protocol("expected a JSON object".into())),
            Err(e) => Err(OAuthError::Protocol(format!("malformed JSON response: {e}"))),
        };
    }
    if !text.contains('=') {
        return Err(OAuthError::Protocol("response is not a key/value document".into()));
    }
    Ok(parse_query(text).into_iter().map(|(k, v)| (k, Value::String(v))).collect())
}

/// Parses an API response: JSON, form encoded pairs, or the raw text.
pub fn parse_response_value(response: &HttpResponse) -> Result<Value> {
    let text = body_text(response)?.trim();
    if text.is_empty() {
        return Ok(Value::Null);
    }
    if looks_like_json(response, text) {
        return serde_json::from_str(text).map_err(|e| OAuthError::Protocol(format!("malformed JSON response: {e}")));
    }
    if text.contains('=') && !text.contains(char::is_whitespace) {
        return Ok(Value::Object(parse_query(text).into_iter().map(|(k, v)| (k, Value::String(v))).collect()));
    }
    Ok(Value::String(text.to_string()))
}

/// The handshake and API surface implemented by every protocol engine.
#[async_trait]
pub trait AuthClient: Send + Sync {
    fn core(&self) -> &ClientCore;

    fn core_mut(&mut self) -> &mut ClientCore;

    /// Authenticates a resource request with `token`.
    fn apply_access_token_to_request(&self, request: HttpRequest, token: &Token) -> Result<HttpRequest>;

    /// Exchanges `token` for a fresh one and persists it.
    async fn refresh_access_token(&mut self, token: &Token) -> Result<Token>;

    /// Runs one step of the handshake for an inbound request: returns a
    /// redirect to start it, the token once the callback succeeds, or a
    /// cancellation when the user declined.
    async fn authenticate(&mut self, request: &IncomingRequest) -> Result<AuthOutcome>;

    /// Current access token.
    ///
    /// A valid in-memory token wins. Otherwise the persisted token is
    /// restored, and refreshed first when it has expired and auto refresh is
    /// on. An invalid token is returned as is when it cannot be refreshed.
    async fn access_token(&mut self) -> Result<Option<Token>> {
        if let Some(token) = self.core().cached_access_token() {
            if token.is_valid() {
                return Ok(Some(token.clone()));
            }
        }
        let restored = match self.core().restore_access_token().await? {
            Some(token) => token,
            None => return Ok(self.core().cached_access_token().cloned()),
        };
        if restored.is_expired() && self.core().config().auto_refresh_access_token {
            debug!(provider = %self.core().config().id, "access token expired, refreshing");
            return self.refresh_access_token(&restored).await.map(Some);
        }
        self.core_mut().cache_access_token(restored.clone());
        Ok(Some(restored))
    }

    /// Makes `token` the current access token.
    async fn set_access_token(&mut self, token: Token) -> Result<()> {
        self.core_mut().save_access_token(token).await
    }

    /// Calls the provider API at `sub_url` (relative to `api_base_url`, or absolute).
    async fn api(
        &mut self,
        sub_url: &str,
        method: HttpMethod,
        params: Vec<(String, String)>,
        headers: Vec<(String, String)>,
    ) -> Result<Value> {
        let token = match self.access_token().await? {
            Some(token) if token.is_valid() => token,
            _ => return Err(OAuthError::Client("invalid access token".into())),
        };
        let core = self.core();
        let url = join_api_url(core.config().api_base_url.as_deref(), sub_url)?;
        let mut request = core.new_request(method, url).with_params(params);
        for (name, value) in headers {
            request.set_header(name, value);
        }
        if core.config().has_quirk(Quirk::AppSecretProof) {
            let access = token.token().unwrap_or_default();
            request.set_param("appsecret_proof", hmac_sha256_hex(core.config().client_secret.as_bytes(), access.as_bytes()));
        }
        let request = self.apply_access_token_to_request(request, &token)?;
        let response = self.core().send(request).await?;
        parse_response_value(&response)
    }
}
