//! OAuth 2.0 client (RFC 6749): authorization code with CSRF state and
//! optional PKCE, client credentials, password and JWT-bearer grants, refresh.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};

use crate::oauth_core::client::{AuthClient, ClientCore, STATE_AUTH_STATE, STATE_CODE_VERIFIER};
use crate::oauth_core::config::{AccessTokenPlacement, ProviderConfig, Quirk};
use crate::oauth_core::crypto::{pkce_code_challenge, pkce_code_verifier, random_string, secure_compare};
use crate::oauth_core::http_client::{HttpMethod, HttpRequest, OAuthHttpClient};
use crate::oauth_core::state_store::StateStore;
use crate::oauth_core::token::{OAUTH2_TOKEN_KEY, Token};
use crate::oauth_core::types::{AuthOutcome, IncomingRequest, OAuthError, Result, callback_error};
use crate::oauth_core::url_encoding::{compose_url, encode_url_owned};

use super::jwt::{JwtOptions, JwtSigner, assertion_claims, encode_jwt};

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
pub const GRANT_PASSWORD: &str = "password";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
pub const CLIENT_ASSERTION_TYPE_JWT: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// How the client authenticates itself at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// `client_secret_post`: credentials as form parameters.
    #[default]
    Post,
    /// `client_secret_basic`: HTTP Basic authentication.
    Basic,
    /// `client_secret_jwt`: HS256 assertion signed with the client secret.
    Jwt,
}

impl ClientAuthMethod {
    /// Picks the first supported method from the names a provider advertises,
    /// preferring Basic, then Post, then JWT.
    pub fn select<S: AsRef<str>>(supported: &[S]) -> Result<Self> {
        let has = |name: &str| supported.iter().any(|s| s.as_ref() == name);
        if has("client_secret_basic") {
            Ok(ClientAuthMethod::Basic)
        } else if has("client_secret_post") {
            Ok(ClientAuthMethod::Post)
        } else if has("client_secret_jwt") {
            Ok(ClientAuthMethod::Jwt)
        } else {
            let names: Vec<&str> = supported.iter().map(AsRef::as_ref).collect();
            Err(OAuthError::Configuration(format!(
                "no supported token endpoint auth method among {names:?}"
            )))
        }
    }
}

fn pair(k: &str, v: impl Into<String>) -> (String, String) {
    (k.to_string(), v.into())
}

/// Defaults overridden by caller supplied parameters of the same name.
fn merge_params(mut defaults: Vec<(String, String)>, extra: Vec<(String, String)>) -> Vec<(String, String)> {
    for (k, v) in extra {
        match defaults.iter_mut().find(|(name, _)| *name == k) {
            Some(entry) => entry.1 = v,
            None => defaults.push((k, v)),
        }
    }
    defaults
}

/// OAuth 2.0 client.
pub struct OAuth2Client {
    core: ClientCore,
    client_auth: Option<ClientAuthMethod>,
    auth_url: Option<String>,
    token_url: Option<String>,
}

impl OAuth2Client {
    pub fn new(config: ProviderConfig, http: Arc<dyn OAuthHttpClient>, store: Arc<dyn StateStore>) -> Result<Self> {
        let core = ClientCore::new(config, http, store)?;
        let auth_url = core.config().auth_url.clone();
        let token_url = core.config().token_url.clone();
        Ok(Self { core, client_auth: None, auth_url, token_url })
    }

    pub fn with_client_auth(mut self, method: ClientAuthMethod) -> Self {
        self.client_auth = Some(method);
        self
    }

    /// Token endpoint auth method in effect; `client_secret_post` until one is chosen.
    pub fn client_auth(&self) -> ClientAuthMethod {
        self.client_auth.unwrap_or_default()
    }

    /// Whether an auth method was chosen explicitly.
    pub fn has_client_auth(&self) -> bool {
        self.client_auth.is_some()
    }

    pub fn set_client_auth(&mut self, method: ClientAuthMethod) {
        self.client_auth = Some(method);
    }

    /// Fills endpoints that are still unset.
    pub fn resolve_endpoints(&mut self, auth_url: Option<String>, token_url: Option<String>) {
        if self.auth_url.is_none() {
            self.auth_url = auth_url;
        }
        if self.token_url.is_none() {
            self.token_url = token_url;
        }
    }

    pub fn has_endpoints(&self) -> bool {
        self.auth_url.is_some() && self.token_url.is_some()
    }

    pub fn auth_url(&self) -> Result<&str> {
        self.core.config().require(&self.auth_url, "auth_url")
    }

    pub fn token_url(&self) -> Result<&str> {
        self.core.config().require(&self.token_url, "token_url")
    }

    /// Authorization endpoint URL. Persists a fresh CSRF state (and PKCE
    /// verifier when enabled) before returning.
    #[instrument(skip(self, params), level = "debug", fields(provider = %self.core.config().id))]
    pub async fn build_authorization_url(&self, params: Vec<(String, String)>) -> Result<String> {
        let config = self.core.config();
        let auth_url = self.auth_url()?;
        let mut defaults = vec![pair("client_id", config.client_id.as_str()), pair("response_type", "code")];
        if let Some(redirect) = &config.return_url {
            defaults.push(pair("redirect_uri", redirect.as_str()));
        }
        if let Some(scope) = config.scope.as_deref().filter(|s| !s.is_empty()) {
            defaults.push(pair("scope", scope));
        }
        if config.validate_auth_state {
            let state = random_string(32)?;
            self.core.set_state(STATE_AUTH_STATE, state.clone()).await?;
            defaults.push(pair("state", state));
        }
        if config.enable_pkce {
            let verifier = pkce_code_verifier()?;
            defaults.push(pair("code_challenge", pkce_code_challenge(&verifier)));
            defaults.push(pair("code_challenge_method", "S256"));
            self.core.set_state(STATE_CODE_VERIFIER, verifier).await?;
        }
        debug!("authorization url built");
        compose_url(auth_url, &merge_params(defaults, params))
    }

    /// Validates the callback state and redeems `code` at the token endpoint.
    ///
    /// Returns the raw token response. The stored state and PKCE verifier are
    /// consumed even when validation fails.
    #[instrument(skip_all, level = "debug", fields(provider = %self.core.config().id))]
    pub async fn exchange_authorization_code(
        &self,
        request: &IncomingRequest,
        code: &str,
        params: Vec<(String, String)>,
    ) -> Result<Map<String, Value>> {
        let config = self.core.config();
        let stored_state = self.core.take_state(STATE_AUTH_STATE).await?;
        let verifier = if config.enable_pkce { self.core.take_state(STATE_CODE_VERIFIER).await? } else { None };

        if config.validate_auth_state {
            let incoming = request.param("state").unwrap_or_default();
            let valid = stored_state.as_deref().is_some_and(|stored| secure_compare(stored, incoming));
            if !valid {
                warn!(has_stored_state = stored_state.is_some(), "auth state validation failed");
                return Err(OAuthError::InvalidState("invalid auth state parameter".into()));
            }
        }

        let mut defaults = vec![pair("code", code), pair("grant_type", GRANT_AUTHORIZATION_CODE)];
        if let Some(redirect) = &config.return_url {
            defaults.push(pair("redirect_uri", redirect.as_str()));
        }
        if config.enable_pkce {
            let verifier =
                verifier.ok_or_else(|| OAuthError::InvalidState("missing PKCE code verifier".into()))?;
            defaults.push(pair("code_verifier", verifier));
        }
        self.token_request(merge_params(defaults, params), true).await
    }

    /// Authorization code grant: validates state, redeems `code`, persists the token.
    pub async fn fetch_access_token(
        &mut self,
        request: &IncomingRequest,
        code: &str,
        params: Vec<(String, String)>,
    ) -> Result<Token> {
        let response = self.exchange_authorization_code(request, code, params).await?;
        self.store_token(response).await
    }

    /// Client credentials grant.
    #[instrument(skip_all, level = "debug", fields(provider = %self.core.config().id))]
    pub async fn authenticate_client(&mut self, params: Vec<(String, String)>) -> Result<Token> {
        let mut defaults = vec![pair("grant_type", GRANT_CLIENT_CREDENTIALS)];
        if let Some(scope) = self.core.config().scope.as_deref().filter(|s| !s.is_empty()) {
            defaults.push(pair("scope", scope));
        }
        let response = self.token_request(merge_params(defaults, params), true).await?;
        self.store_token(response).await
    }

    /// Resource owner password credentials grant.
    #[instrument(skip_all, level = "debug", fields(provider = %self.core.config().id))]
    pub async fn authenticate_user(&mut self, username: &str, password: &str, params: Vec<(String, String)>) -> Result<Token> {
        let mut defaults = vec![
            pair("grant_type", GRANT_PASSWORD),
            pair("username", username),
            pair("password", password),
        ];
        if let Some(scope) = self.core.config().scope.as_deref().filter(|s| !s.is_empty()) {
            defaults.push(pair("scope", scope));
        }
        let response = self.token_request(merge_params(defaults, params), true).await?;
        self.store_token(response).await
    }

    /// JWT-bearer grant (RFC 7523) with an assertion issued for `username`.
    ///
    /// Without a signer the assertion is HS256 signed with the client secret.
    #[instrument(skip_all, level = "debug", fields(provider = %self.core.config().id))]
    pub async fn authenticate_user_jwt(
        &mut self,
        username: &str,
        signer: Option<JwtSigner>,
        options: JwtOptions,
        params: Vec<(String, String)>,
    ) -> Result<Token> {
        let config = self.core.config();
        let signer = signer.unwrap_or_else(|| JwtSigner::hmac_sha256(config.client_secret.as_str()));
        let mut extra = Map::new();
        if let Some(scope) = &config.scope {
            extra.insert("scope".into(), json!(scope));
        }
        extra.extend(options.payload);
        let claims = assertion_claims(username, self.token_url()?, chrono::Utc::now().timestamp(), &extra);
        let assertion = encode_jwt(&options.header, &claims, &signer)?;
        let defaults = vec![pair("grant_type", GRANT_JWT_BEARER), pair("assertion", assertion)];
        let response = self.token_request(merge_params(defaults, params), false).await?;
        self.store_token(response).await
    }

    /// Adds client credentials to a token endpoint request.
    pub fn apply_client_credentials(&self, mut request: HttpRequest) -> Result<HttpRequest> {
        let config = self.core.config();
        match self.client_auth() {
            ClientAuthMethod::Post => {
                request.set_param("client_id", config.client_id.as_str());
                request.set_param("client_secret", config.client_secret.as_str());
            }
            ClientAuthMethod::Basic => {
                let credentials =
                    format!("{}:{}", encode_url_owned(&config.client_id), encode_url_owned(&config.client_secret));
                request.set_header("Authorization", format!("Basic {}", STANDARD.encode(credentials)));
            }
            ClientAuthMethod::Jwt => {
                let mut extra = Map::new();
                extra.insert("sub".into(), json!(config.client_id));
                extra.insert("jti".into(), json!(uuid::Uuid::new_v4().to_string()));
                let claims =
                    assertion_claims(&config.client_id, self.token_url()?, chrono::Utc::now().timestamp(), &extra);
                let assertion =
                    encode_jwt(&Map::new(), &claims, &JwtSigner::hmac_sha256(config.client_secret.as_str()))?;
                request.set_param("client_assertion_type", CLIENT_ASSERTION_TYPE_JWT);
                request.set_param("client_assertion", assertion);
            }
        }
        Ok(request)
    }

    /// POSTs `params` to the token endpoint and returns the parsed response.
    pub async fn token_request(&self, params: Vec<(String, String)>, with_credentials: bool) -> Result<Map<String, Value>> {
        let request = self.core.new_request(HttpMethod::POST, self.token_url()?).with_params(params);
        let request = if with_credentials { self.apply_client_credentials(request)? } else { request };
        self.core.send_for_params(request).await
    }

    /// Wraps a token endpoint response.
    pub fn create_token(&self, params: Map<String, Value>) -> Result<Token> {
        let token = Token::from_params(params, OAUTH2_TOKEN_KEY);
        if token.token().is_none_or(str::is_empty) {
            return Err(OAuthError::Protocol("token response carries no access_token".into()));
        }
        Ok(token)
    }

    /// Wraps and persists a token endpoint response as the current access token.
    pub async fn store_token(&mut self, params: Map<String, Value>) -> Result<Token> {
        let token = self.create_token(params)?;
        self.core.save_access_token(token.clone()).await?;
        debug!("access token stored");
        Ok(token)
    }

    /// Grant parameters for refreshing `token`: its own scalar parameters
    /// plus `grant_type=refresh_token`.
    pub fn refresh_params(token: &Token) -> Result<Vec<(String, String)>> {
        if token.param_str(GRANT_REFRESH_TOKEN).is_none_or(|t| t.is_empty()) {
            return Err(OAuthError::Client("token has no refresh_token".into()));
        }
        let own: Vec<(String, String)> =
            token.params().keys().filter_map(|k| token.param_str(k).map(|v| (k.clone(), v))).collect();
        Ok(merge_params(own, vec![pair("grant_type", GRANT_REFRESH_TOKEN)]))
    }

    /// Keeps the previous refresh token when the provider did not rotate it.
    pub fn carry_refresh_token(previous: &Token, response: &mut Map<String, Value>) {
        if !response.contains_key(GRANT_REFRESH_TOKEN) {
            if let Some(refresh) = previous.param(GRANT_REFRESH_TOKEN) {
                response.insert(GRANT_REFRESH_TOKEN.into(), refresh.clone());
            }
        }
    }

    /// Handles a provider callback: cancellation, error, code exchange, or a
    /// redirect to the authorization endpoint when no code is present.
    pub async fn handle_callback(&mut self, request: &IncomingRequest) -> Result<AuthOutcome> {
        if let Some(cancelled) = callback_error(request)? {
            self.core.remove_state(STATE_AUTH_STATE).await?;
            self.core.remove_state(STATE_CODE_VERIFIER).await?;
            return Ok(cancelled);
        }
        match request.param("code") {
            Some(code) => {
                let token = self.fetch_access_token(request, code, Vec::new()).await?;
                Ok(AuthOutcome::Authenticated(token))
            }
            None => Ok(AuthOutcome::Redirect(self.build_authorization_url(Vec::new()).await?)),
        }
    }
}

#[async_trait]
impl AuthClient for OAuth2Client {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ClientCore {
        &mut self.core
    }

    fn apply_access_token_to_request(&self, mut request: HttpRequest, token: &Token) -> Result<HttpRequest> {
        let config = self.core.config();
        let access = token.token().unwrap_or_default();
        if config.has_quirk(Quirk::BearerHeader) || config.access_token_placement == AccessTokenPlacement::BearerHeader {
            request.set_header("Authorization", format!("Bearer {access}"));
        } else {
            request.set_param(OAUTH2_TOKEN_KEY, access);
        }
        Ok(request)
    }

    #[instrument(skip_all, level = "debug", fields(provider = %self.core.config().id))]
    async fn refresh_access_token(&mut self, token: &Token) -> Result<Token> {
        let mut response = self.token_request(Self::refresh_params(token)?, true).await?;
        Self::carry_refresh_token(token, &mut response);
        self.store_token(response).await
    }

    async fn authenticate(&mut self, request: &IncomingRequest) -> Result<AuthOutcome> {
        self.handle_callback(request).await
    }
}
