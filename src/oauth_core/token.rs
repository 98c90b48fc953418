//! Access credential issued by a provider.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameter holding the token value in OAuth 1.0a responses.
pub const OAUTH1_TOKEN_KEY: &str = "oauth_token";
/// Parameter holding the token value in OAuth 2.0 responses.
pub const OAUTH2_TOKEN_KEY: &str = "access_token";
const DEFAULT_TOKEN_SECRET_KEY: &str = "oauth_token_secret";
const DEFAULT_EXPIRE_DURATION_KEY: &str = "expires_in";

/// A credential plus every parameter the provider returned with it.
///
/// The creation time is fixed when the token is built. Expiry is derived from
/// the expire-duration parameter on each check rather than stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    params: Map<String, Value>,
    token_param_key: String,
    token_secret_param_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expire_duration_param_key: Option<String>,
    created_at: i64,
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl Token {
    /// Creates an empty OAuth 1.0a style token stamped with the current time.
    pub fn new() -> Self {
        Self {
            params: Map::new(),
            token_param_key: OAUTH1_TOKEN_KEY.to_string(),
            token_secret_param_key: DEFAULT_TOKEN_SECRET_KEY.to_string(),
            expire_duration_param_key: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Creates a token from a normalized provider response.
    pub fn from_params(params: Map<String, Value>, token_param_key: &str) -> Self {
        Self { params, token_param_key: token_param_key.to_string(), ..Self::new() }
    }

    /// Overrides the creation timestamp (unix seconds). Used when rebuilding a
    /// token whose issue time is known.
    pub fn issued_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_token_param_key(mut self, key: impl Into<String>) -> Self {
        self.token_param_key = key.into();
        self
    }

    pub fn with_token_secret_param_key(mut self, key: impl Into<String>) -> Self {
        self.token_secret_param_key = key.into();
        self
    }

    pub fn with_expire_duration_param_key(mut self, key: impl Into<String>) -> Self {
        self.expire_duration_param_key = Some(key.into());
        self
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn token_param_key(&self) -> &str {
        &self.token_param_key
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn set_params(&mut self, params: Map<String, Value>) {
        self.params = params;
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Parameter rendered as a string; numbers and booleans are stringified.
    pub fn param_str(&self, name: &str) -> Option<String> {
        match self.params.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other @ (Value::Number(_) | Value::Bool(_)) => Some(other.to_string()),
            _ => None,
        }
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(name.into(), value.into());
    }

    /// Merges `params` into this token, overwriting existing names.
    pub fn merge_params(&mut self, params: Map<String, Value>) {
        self.params.extend(params);
    }

    pub fn token(&self) -> Option<&str> {
        self.params.get(&self.token_param_key).and_then(Value::as_str)
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.params.insert(self.token_param_key.clone(), Value::String(token.into()));
    }

    pub fn token_secret(&self) -> Option<&str> {
        self.params.get(&self.token_secret_param_key).and_then(Value::as_str)
    }

    pub fn set_token_secret(&mut self, secret: impl Into<String>) {
        self.params.insert(self.token_secret_param_key.clone(), Value::String(secret.into()));
    }

    /// Name of the parameter holding the lifetime in seconds.
    ///
    /// Without an explicit key, the first parameter whose name contains
    /// `expir` is used, falling back to `expires_in`.
    pub fn expire_duration_param_key(&self) -> &str {
        if let Some(key) = &self.expire_duration_param_key {
            return key;
        }
        self.params
            .keys()
            .find(|k| k.contains("expir"))
            .map(String::as_str)
            .unwrap_or(DEFAULT_EXPIRE_DURATION_KEY)
    }

    /// Lifetime in seconds, if the provider sent one.
    pub fn expire_duration(&self) -> Option<i64> {
        match self.params.get(self.expire_duration_param_key())? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn set_expire_duration(&mut self, seconds: i64) {
        let key = self.expire_duration_param_key().to_string();
        self.params.insert(key, Value::from(seconds));
    }

    /// Whether the token has expired at `now` (unix seconds). A token without a
    /// positive lifetime never expires.
    pub fn is_expired_at(&self, now: i64) -> bool {
        match self.expire_duration() {
            Some(duration) if duration > 0 => now >= self.created_at + duration,
            _ => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }

    /// Non-empty token value and not expired at `now`.
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.token().is_some_and(|t| !t.is_empty()) && !self.is_expired_at(now)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(chrono::Utc::now().timestamp())
    }
}
