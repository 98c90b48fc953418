//! OpenID Connect relying party layered on [`OAuth2Client`].

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::oauth2::client::{ClientAuthMethod, OAuth2Client};
use crate::oauth_core::client::{AuthClient, ClientCore, STATE_AUTH_NONCE, STATE_AUTH_STATE, STATE_CODE_VERIFIER};
use crate::oauth_core::config::ProviderConfig;
use crate::oauth_core::crypto::{random_string, secure_compare};
use crate::oauth_core::http_client::{HttpMethod, HttpRequest, OAuthHttpClient};
use crate::oauth_core::state_store::StateStore;
use crate::oauth_core::token::Token;
use crate::oauth_core::types::{AuthOutcome, IncomingRequest, OAuthError, Result, callback_error};

use super::discovery::{OidcCache, ProviderMetadata, discovery_url};
use super::jwks::JwkSet;
use super::jws::{Jws, validate_claims};

/// OpenID Connect client.
///
/// Endpoints missing from the configuration are taken from the provider's
/// discovery document, as is the token endpoint auth method unless one
/// was fixed with [`OpenIdConnectClient::with_client_auth`].
pub struct OpenIdConnectClient {
    oauth2: OAuth2Client,
    cache: OidcCache,
    prepared: bool,
}

impl OpenIdConnectClient {
    pub fn new(config: ProviderConfig, http: Arc<dyn OAuthHttpClient>, store: Arc<dyn StateStore>) -> Result<Self> {
        Ok(Self { oauth2: OAuth2Client::new(config, http, store)?, cache: OidcCache::new(), prepared: false })
    }

    /// Shares a discovery/JWKS cache with other clients.
    pub fn with_cache(mut self, cache: OidcCache) -> Self {
        self.cache = cache;
        self
    }

    /// Fixes the token endpoint auth method instead of picking one from discovery.
    pub fn with_client_auth(mut self, method: ClientAuthMethod) -> Self {
        self.oauth2.set_client_auth(method);
        self
    }

    pub fn cache(&self) -> &OidcCache {
        &self.cache
    }

    pub fn oauth2(&self) -> &OAuth2Client {
        &self.oauth2
    }

    fn config(&self) -> &ProviderConfig {
        self.oauth2.core().config()
    }

    fn issuer_url(&self) -> Result<&str> {
        let config = self.config();
        config.require(&config.issuer_url, "issuer_url")
    }

    /// Provider metadata, from the cache or fetched from the issuer.
    #[instrument(skip(self), level = "debug", fields(provider = %self.config().id))]
    pub async fn discover_provider_config(&self) -> Result<ProviderMetadata> {
        let id = &self.config().id;
        if let Some(metadata) = self.cache.config(id) {
            return Ok(metadata);
        }
        let url = discovery_url(self.issuer_url()?);
        let core = self.oauth2.core();
        let params = core.send_for_params(core.new_request(HttpMethod::GET, url)).await?;
        let metadata = ProviderMetadata::new(params);
        self.cache.set_config(id, metadata.clone());
        debug!("provider configuration discovered");
        Ok(metadata)
    }

    /// One value from the provider metadata.
    pub async fn config_param(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.discover_provider_config().await?.get(name).cloned())
    }

    /// Whether id tokens must carry the nonce issued with the authorization request.
    pub async fn validate_auth_nonce(&self) -> Result<bool> {
        if let Some(enabled) = self.config().validate_auth_nonce {
            return Ok(enabled);
        }
        Ok(self.discover_provider_config().await?.claims_supported().iter().any(|c| c == "nonce"))
    }

    /// Resolves endpoints once, and the token endpoint auth method unless one was chosen.
    async fn prepare(&mut self) -> Result<()> {
        if self.prepared {
            return Ok(());
        }
        let metadata = self.discover_provider_config().await?;
        self.oauth2.resolve_endpoints(
            metadata.authorization_endpoint().map(str::to_string),
            metadata.token_endpoint().map(str::to_string),
        );
        if !self.oauth2.has_client_auth() {
            self.oauth2.set_client_auth(ClientAuthMethod::select(&metadata.token_endpoint_auth_methods_supported())?);
        }
        self.prepared = true;
        Ok(())
    }

    /// Authorization URL with `scope=openid` by default and a persisted nonce
    /// when nonce validation is on.
    pub async fn build_authorization_url(&mut self, params: Vec<(String, String)>) -> Result<String> {
        self.prepare().await?;
        let mut defaults = Vec::new();
        if self.config().scope.is_none() {
            defaults.push(("scope".to_string(), "openid".to_string()));
        }
        if self.validate_auth_nonce().await? {
            let nonce = random_string(32)?;
            self.oauth2.core().set_state(STATE_AUTH_NONCE, nonce.clone()).await?;
            defaults.push(("nonce".to_string(), nonce));
        }
        defaults.extend(params);
        self.oauth2.build_authorization_url(defaults).await
    }

    /// Redeems `code`, verifies the id token and persists the access token.
    ///
    /// The nonce is consumed on every path, including failures.
    #[instrument(skip_all, level = "debug", fields(provider = %self.config().id))]
    pub async fn fetch_access_token(
        &mut self,
        request: &IncomingRequest,
        code: &str,
        params: Vec<(String, String)>,
    ) -> Result<Token> {
        let token = match self.exchange_and_verify(request, code, params).await {
            Ok(token) => token,
            Err(e) => {
                self.oauth2.core().remove_state(STATE_AUTH_NONCE).await?;
                return Err(e);
            }
        };
        self.oauth2.core_mut().save_access_token(token.clone()).await?;
        Ok(token)
    }

    async fn exchange_and_verify(
        &mut self,
        request: &IncomingRequest,
        code: &str,
        params: Vec<(String, String)>,
    ) -> Result<Token> {
        self.prepare().await?;
        let response = self.oauth2.exchange_authorization_code(request, code, params).await?;
        self.create_token(response, true).await
    }

    /// Builds a token from a token endpoint response.
    ///
    /// With JWS validation on, the `id_token` is verified, its claims are
    /// checked and merged into the token parameters, and when `check_nonce`
    /// is set its `nonce` must match the stored one.
    pub async fn create_token(&self, mut params: Map<String, Value>, check_nonce: bool) -> Result<Token> {
        let nonce_enabled = check_nonce && self.validate_auth_nonce().await?;
        let stored_nonce = if nonce_enabled { self.oauth2.core().take_state(STATE_AUTH_NONCE).await? } else { None };

        if self.config().validate_jws {
            let id_token = params
                .get("id_token")
                .and_then(Value::as_str)
                .ok_or_else(|| OAuthError::Client("token response has no id_token".into()))?
                .to_string();
            let claims = self.load_jws(&id_token).await?;
            validate_claims(&claims, self.issuer_url()?, &self.config().client_id, chrono::Utc::now().timestamp())?;
            if nonce_enabled {
                let claimed = claims.get("nonce").and_then(Value::as_str).unwrap_or_default();
                if !stored_nonce.as_deref().is_some_and(|stored| secure_compare(stored, claimed)) {
                    warn!("id token nonce mismatch");
                    return Err(OAuthError::Client("invalid auth nonce".into()));
                }
            }
            params.extend(claims);
        }
        self.oauth2.create_token(params)
    }

    /// Verifies a compact JWS against the provider keys and returns its claims.
    #[instrument(skip_all, level = "debug", fields(provider = %self.config().id))]
    pub async fn load_jws(&self, token: &str) -> Result<Map<String, Value>> {
        let jws = Jws::parse(token)?;
        let algorithm = jws.algorithm(&self.config().allowed_jws_algorithms)?;
        let key = self.verification_key(&jws, algorithm).await?;
        jws.verify(&key, algorithm)?;
        Ok(jws.payload)
    }

    async fn verification_key(&self, jws: &Jws<'_>, algorithm: Algorithm) -> Result<DecodingKey> {
        if matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            let secret = &self.config().client_secret;
            if secret.is_empty() {
                warn!(alg = ?algorithm, "HMAC signed id token for a client without a secret");
                return Err(OAuthError::Client("HMAC signed id tokens require a client secret".into()));
            }
            return Ok(DecodingKey::from_secret(secret.as_bytes()));
        }
        let kid = jws.kid();
        let keys = self.jwks(false).await?;
        if let Some(jwk) = keys.find(kid) {
            return jwk.decoding_key();
        }
        info!(kid = ?kid, "signing key not in cached JWKS, refetching");
        let keys = self.jwks(true).await?;
        match keys.find(kid) {
            Some(jwk) => jwk.decoding_key(),
            None => {
                warn!(kid = ?kid, "no JWKS key matches the id token");
                Err(OAuthError::Client(format!("no JWKS key matches kid {kid:?}")))
            }
        }
    }

    /// Provider key set; `refresh` bypasses the cache.
    pub async fn jwks(&self, refresh: bool) -> Result<JwkSet> {
        let id = &self.config().id;
        if !refresh {
            if let Some(keys) = self.cache.jwks(id) {
                return Ok(keys);
            }
        }
        let url = match &self.config().jwks_url {
            Some(url) => url.clone(),
            None => self
                .discover_provider_config()
                .await?
                .jwks_uri()
                .map(str::to_string)
                .ok_or_else(|| OAuthError::Configuration("provider metadata has no jwks_uri".into()))?,
        };
        let core = self.oauth2.core();
        let response = core.send(core.new_request(HttpMethod::GET, url)).await?;
        let keys = JwkSet::from_slice(&response.body)?;
        self.cache.set_jwks(id, keys.clone());
        Ok(keys)
    }

    /// Claims from the provider's `userinfo_endpoint`.
    pub async fn fetch_user_info(&mut self) -> Result<Value> {
        self.prepare().await?;
        let url = self
            .discover_provider_config()
            .await?
            .userinfo_endpoint()
            .map(str::to_string)
            .ok_or_else(|| OAuthError::Configuration("provider metadata has no userinfo_endpoint".into()))?;
        self.api(&url, HttpMethod::GET, Vec::new(), Vec::new()).await
    }
}

#[async_trait]
impl AuthClient for OpenIdConnectClient {
    fn core(&self) -> &ClientCore {
        self.oauth2.core()
    }

    fn core_mut(&mut self) -> &mut ClientCore {
        self.oauth2.core_mut()
    }

    fn apply_access_token_to_request(&self, mut request: HttpRequest, token: &Token) -> Result<HttpRequest> {
        request.set_header("Authorization", format!("Bearer {}", token.token().unwrap_or_default()));
        Ok(request)
    }

    #[instrument(skip_all, level = "debug", fields(provider = %self.config().id))]
    async fn refresh_access_token(&mut self, token: &Token) -> Result<Token> {
        self.prepare().await?;
        let mut response = self.oauth2.token_request(OAuth2Client::refresh_params(token)?, true).await?;
        OAuth2Client::carry_refresh_token(token, &mut response);
        let refreshed = if response.contains_key("id_token") {
            self.create_token(response, false).await?
        } else {
            self.oauth2.create_token(response)?
        };
        self.oauth2.core_mut().save_access_token(refreshed.clone()).await?;
        Ok(refreshed)
    }

    async fn authenticate(&mut self, request: &IncomingRequest) -> Result<AuthOutcome> {
        if let Some(cancelled) = callback_error(request)? {
            let core = self.oauth2.core();
            for key in [STATE_AUTH_STATE, STATE_AUTH_NONCE, STATE_CODE_VERIFIER] {
                core.remove_state(key).await?;
            }
            return Ok(cancelled);
        }
        match request.param("code") {
            Some(code) => Ok(AuthOutcome::Authenticated(self.fetch_access_token(request, code, Vec::new()).await?)),
            None => Ok(AuthOutcome::Redirect(self.build_authorization_url(Vec::new()).await?)),
        }
    }
}
