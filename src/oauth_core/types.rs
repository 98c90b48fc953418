//! Engine-wide primitives: the error taxonomy, the incoming callback request and
//! the outcome of an authentication step.

use std::collections::HashMap;

use super::http_client::HttpResponse;
use super::token::Token;
use super::url_encoding::parse_query;
use tracing::warn;

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, OAuthError>;

/// Core error kinds raised by the handshake engines.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// Missing or contradictory provider configuration. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// CSRF state or OAuth1 request token mismatch. Treat as a cancelled login.
    #[error("invalid auth state: {0}")]
    InvalidState(String),
    /// The provider's answer was well formed but rejected (nonce, claims, JWS).
    #[error("client error: {0}")]
    Client(String),
    /// The provider's answer could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The provider answered a protocol endpoint with a non-2xx status.
    #[error("provider responded with status {}", .0.status)]
    InvalidResponse(Box<HttpResponse>),
    /// Network failure or timeout. The caller may retry with backoff.
    #[error("transport error: {0}")]
    Transport(String),
    /// The state store failed.
    #[error("storage error: {0}")]
    Storage(String),
    /// Key material could not be loaded or a primitive failed.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl OAuthError {
    /// HTTP status a callback handler should answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            OAuthError::InvalidState(_) | OAuthError::Client(_) => 400,
            OAuthError::Protocol(_) | OAuthError::InvalidResponse(_) | OAuthError::Transport(_) => 502,
            OAuthError::Configuration(_) | OAuthError::Storage(_) | OAuthError::Crypto(_) => 500,
        }
    }

    /// RFC 6749 style error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidState(_) => "invalid_request",
            OAuthError::Client(_) => "invalid_grant",
            OAuthError::Protocol(_) | OAuthError::InvalidResponse(_) => "invalid_response",
            OAuthError::Transport(_) => "temporarily_unavailable",
            OAuthError::Configuration(_) | OAuthError::Storage(_) | OAuthError::Crypto(_) => "server_error",
        }
    }

    /// Returns true when the caller may retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OAuthError::Transport(_))
    }

    /// The raw provider response attached to this error, if any.
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            OAuthError::InvalidResponse(resp) => Some(resp),
            _ => None,
        }
    }
}

/// The inbound HTTP request a callback handler hands to the engine.
///
/// Only the parts the handshake reads are modelled: query parameters and
/// parsed body parameters.
#[derive(Debug, Clone, Default)]
pub struct IncomingRequest {
    query: HashMap<String, String>,
    body: HashMap<String, String>,
}

impl IncomingRequest {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a request from a raw query string (without the leading `?`).
    pub fn from_query(query: &str) -> Self {
        Self { query: parse_query(query).into_iter().collect(), body: HashMap::new() }
    }

    /// Builds a request from already parsed query and body parameters.
    pub fn from_parts(query: HashMap<String, String>, body: HashMap<String, String>) -> Self {
        Self { query, body }
    }

    /// Adds a query parameter.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Adds a body parameter.
    pub fn with_body(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.body.insert(name.into(), value.into());
        self
    }

    /// Query parameter by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Body parameter by name.
    pub fn post(&self, name: &str) -> Option<&str> {
        self.body.get(name).map(String::as_str)
    }

    /// Query parameter, falling back to the body (form_post callbacks).
    pub fn param(&self, name: &str) -> Option<&str> {
        self.get(name).or_else(|| self.post(name))
    }
}

/// Result of one [`authenticate`](crate::oauth_core::client::AuthClient::authenticate) step.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// Send the user agent to this URL to start (or continue) the handshake.
    Redirect(String),
    /// The handshake completed and the access token was persisted.
    Authenticated(Token),
    /// The user declined. Not an error.
    Cancelled {
        /// Provider error code, e.g. `access_denied`.
        error: String,
        /// Optional human readable description.
        description: Option<String>,
    },
}

/// OAuth2 `error` values that mean the user declined rather than a failure.
const CANCEL_ERRORS: [&str; 3] = ["access_denied", "user_cancelled_login", "user_cancelled_authorize"];

/// Inspects an OAuth2 callback for a provider `error` parameter.
///
/// Returns `Ok(Some(..))` for a user cancellation, `Err` for any other
/// provider error and `Ok(None)` when the callback carries no error.
pub(crate) fn callback_error(request: &IncomingRequest) -> Result<Option<AuthOutcome>> {
    let Some(error) = request.param("error") else {
        return Ok(None);
    };
    let description = request.param("error_description").map(str::to_string);
    if CANCEL_ERRORS.contains(&error) {
        return Ok(Some(AuthOutcome::Cancelled { error: error.to_string(), description }));
    }
    warn!(error_code = error, "provider returned an authorization error");
    Err(OAuthError::Client(format!(
        "authorization failed: {}{}",
        error,
        description.map(|d| format!(" ({d})")).unwrap_or_default()
    )))
}
