//! Three-legged OAuth 1.0a handshake (RFC 5849).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::oauth_core::client::{AuthClient, ClientCore, STATE_REQUEST_TOKEN};
use crate::oauth_core::config::ProviderConfig;
use crate::oauth_core::crypto::{generate_nonce, secure_compare};
use crate::oauth_core::http_client::{HttpRequest, OAuthHttpClient};
use crate::oauth_core::signature::SignatureMethod;
use crate::oauth_core::state_store::StateStore;
use crate::oauth_core::token::{OAUTH1_TOKEN_KEY, Token};
use crate::oauth_core::types::{AuthOutcome, IncomingRequest, OAuthError, Result};
use crate::oauth_core::url_encoding::compose_url;

use super::signing::{authorization_header, common_params, is_protocol_param, signature_base_string, signature_key};

/// OAuth 1.0a consumer.
pub struct OAuth1Client {
    core: ClientCore,
    signature_method: Arc<dyn SignatureMethod>,
}

impl OAuth1Client {
    pub fn new(config: ProviderConfig, http: Arc<dyn OAuthHttpClient>, store: Arc<dyn StateStore>) -> Result<Self> {
        let signature_method = config.signature_method()?;
        Ok(Self { core: ClientCore::new(config, http, store)?, signature_method })
    }

    /// Replaces the signature method resolved from configuration.
    pub fn with_signature_method(mut self, method: Arc<dyn SignatureMethod>) -> Self {
        self.signature_method = method;
        self
    }

    pub fn signature_method(&self) -> &dyn SignatureMethod {
        self.signature_method.as_ref()
    }

    /// Obtains temporary credentials and stores them as the pending request token.
    #[instrument(skip(self, params), level = "debug", fields(provider = %self.core.config().id))]
    pub async fn fetch_request_token(&mut self, params: Vec<(String, String)>) -> Result<Token> {
        self.core.clear_access_token().await?;
        let config = self.core.config();
        let url = config.require(&config.request_token_url, "request_token_url")?;
        let mut request = self
            .core
            .new_request(config.request_token_method, url)
            .with_param("oauth_consumer_key", config.client_id.as_str());
        if let Some(callback) = config.return_url.as_deref() {
            request.set_param("oauth_callback", callback);
        }
        let request = self.sign_request(request.with_params(params), None)?;
        let response = self.core.send_for_params(request).await?;
        let token = Token::from_params(response, OAUTH1_TOKEN_KEY);
        if token.token().is_none_or(str::is_empty) {
            return Err(OAuthError::Protocol("request token response carries no oauth_token".into()));
        }
        self.core.set_token_state(STATE_REQUEST_TOKEN, &token).await?;
        debug!("request token stored");
        Ok(token)
    }

    /// Authorize URL for the user, fetching a request token when none is pending.
    pub async fn build_authorize_url(&mut self, request_token: Option<&Token>, params: Vec<(String, String)>) -> Result<String> {
        let token = match request_token {
            Some(token) => token.clone(),
            None => {
                let pending = self.core.get_state(STATE_REQUEST_TOKEN).await?;
                match pending {
                    Some(json) => ClientCore::decode_token(&json)?,
                    None => self.fetch_request_token(Vec::new()).await?,
                }
            }
        };
        let config = self.core.config();
        let auth_url = config.require(&config.auth_url, "auth_url")?;
        let mut query = vec![("oauth_token".to_string(), token.token().unwrap_or_default().to_string())];
        query.extend(params);
        compose_url(auth_url, &query)
    }

    /// Exchanges the authorized request token for an access token.
    ///
    /// `oauth_token` and `verifier` default to the callback parameters of
    /// `request`. The pending request token is consumed whether or not it
    /// matches.
    #[instrument(skip_all, level = "debug", fields(provider = %self.core.config().id))]
    pub async fn fetch_access_token(
        &mut self,
        request: &IncomingRequest,
        oauth_token: Option<&str>,
        verifier: Option<&str>,
    ) -> Result<Token> {
        let returned = oauth_token.or_else(|| request.param("oauth_token")).unwrap_or_default();
        let request_token = match self.core.take_state(STATE_REQUEST_TOKEN).await? {
            Some(json) => ClientCore::decode_token(&json)?,
            None => {
                warn!("callback without a pending request token");
                return Err(OAuthError::InvalidState("no pending request token".into()));
            }
        };
        if !secure_compare(request_token.token().unwrap_or_default(), returned) {
            warn!("returned oauth_token does not match the pending request token");
            return Err(OAuthError::InvalidState("oauth_token mismatch".into()));
        }

        let config = self.core.config();
        let url = config.require(&config.access_token_url, "access_token_url")?;
        let mut http_request = self
            .core
            .new_request(config.access_token_method, url)
            .with_param("oauth_consumer_key", config.client_id.as_str())
            .with_param("oauth_token", returned);
        if let Some(verifier) = verifier.or_else(|| request.param("oauth_verifier")).filter(|v| !v.is_empty()) {
            http_request.set_param("oauth_verifier", verifier);
        }
        let http_request = self.sign_request(http_request, Some(&request_token))?;
        let response = self.core.send_for_params(http_request).await?;
        let token = Token::from_params(response, OAUTH1_TOKEN_KEY);
        self.core.save_access_token(token.clone()).await?;
        debug!("access token acquired");
        Ok(token)
    }

    /// Signs `request` with a fresh nonce and the current time.
    pub fn sign_request(&self, request: HttpRequest, token: Option<&Token>) -> Result<HttpRequest> {
        self.sign_request_with(request, token, &generate_nonce()?, chrono::Utc::now().timestamp())
    }

    /// Signs `request` with the given nonce and timestamp.
    ///
    /// Requests already carrying `oauth_signature_method` or an
    /// `Authorization` header are returned untouched.
    pub fn sign_request_with(
        &self,
        mut request: HttpRequest,
        token: Option<&Token>,
        nonce: &str,
        timestamp: i64,
    ) -> Result<HttpRequest> {
        let already_signed = request.param("oauth_signature_method").is_some()
            || request.query_params().iter().any(|(k, _)| k == "oauth_signature_method")
            || request.header("Authorization").is_some();
        if already_signed {
            return Ok(request);
        }

        for (k, v) in common_params(nonce, timestamp) {
            request.set_param(k, v);
        }
        request.set_param("oauth_signature_method", self.signature_method.name());
        let base = signature_base_string(request.method, &request.url, &request.params)?;
        let key = signature_key(&self.core.config().client_secret, token.and_then(Token::token_secret));
        let signature = self.signature_method.sign(&base, &key)?;
        request.set_param("oauth_signature", signature);

        let config = self.core.config();
        if config.authorization_header_methods.contains(request.method) {
            let header = authorization_header(&request.params, config.realm.as_deref());
            request.params.retain(|(k, _)| !is_protocol_param(k));
            request.set_header("Authorization", header);
        }
        Ok(request)
    }
}

#[async_trait]
impl AuthClient for OAuth1Client {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ClientCore {
        &mut self.core
    }

    fn apply_access_token_to_request(&self, request: HttpRequest, token: &Token) -> Result<HttpRequest> {
        let request = request
            .with_param("oauth_consumer_key", self.core.config().client_id.as_str())
            .with_param("oauth_token", token.token().unwrap_or_default());
        self.sign_request(request, Some(token))
    }

    async fn refresh_access_token(&mut self, _token: &Token) -> Result<Token> {
        Err(OAuthError::Configuration("OAuth 1.0a access tokens cannot be refreshed".into()))
    }

    async fn authenticate(&mut self, request: &IncomingRequest) -> Result<AuthOutcome> {
        if let Some(denied) = request.param("denied") {
            debug!("user denied the authorization request");
            self.core.remove_state(STATE_REQUEST_TOKEN).await?;
            return Ok(AuthOutcome::Cancelled { error: "denied".into(), description: Some(denied.to_string()) });
        }
        if request.param("oauth_token").is_some() {
            let token = self.fetch_access_token(request, None, None).await?;
            return Ok(AuthOutcome::Authenticated(token));
        }
        let request_token = self.fetch_request_token(Vec::new()).await?;
        let url = self.build_authorize_url(Some(&request_token), Vec::new()).await?;
        Ok(AuthOutcome::Redirect(url))
    }
}
