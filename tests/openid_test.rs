use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Map, Value, json};
use starberry_authclient::oauth_core::http_client::{HttpMethod, HttpResponse, InMemoryHttpClient};
use starberry_authclient::oauth_core::memory::InMemoryStateStore;
use starberry_authclient::oauth_core::state_store::StateStore;
use starberry_authclient::oauth_core::token::OAUTH2_TOKEN_KEY;
use starberry_authclient::oauth_core::url_encoding::parse_query;
use starberry_authclient::openid::jwks::JwkSet;
use starberry_authclient::{
    AuthClient, AuthOutcome, ClientAuthMethod, IncomingRequest, OAuthError, OidcCache, OpenIdConnectClient,
    ProviderConfig, Token,
};

const ISSUER: &str = "https://id.example.com";
const DISCOVERY_URL: &str = "https://id.example.com/.well-known/openid-configuration";
const TOKEN_URL: &str = "https://id.example.com/oauth2/token";
const JWKS_URL: &str = "https://id.example.com/oauth2/jwks";
const USERINFO_URL: &str = "https://id.example.com/oauth2/userinfo";
const DISCOVERY: &str = include_str!("fixtures/openid-configuration.json");
const JWKS: &str = include_str!("fixtures/jwks.json");
const PRIVATE_PEM: &str = include_str!("fixtures/rsa_private.pem");

fn config() -> ProviderConfig {
    ProviderConfig::builder("idp")
        .client_id("cid")
        .client_secret("csecret")
        .issuer_url(ISSUER)
        .return_url("https://app.example.com/cb")
        .build()
        .unwrap()
}

fn provider() -> InMemoryHttpClient {
    let http = InMemoryHttpClient::new();
    http.insert_response(DISCOVERY_URL, HttpResponse::new(200, DISCOVERY));
    http.insert_response(JWKS_URL, HttpResponse::new(200, JWKS));
    http
}

fn client(config: ProviderConfig, http: &InMemoryHttpClient, store: &InMemoryStateStore) -> OpenIdConnectClient {
    OpenIdConnectClient::new(config, Arc::new(http.clone()), Arc::new(store.clone())).unwrap()
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn claims(nonce: Option<&str>) -> Value {
    let mut claims = json!({
        "iss": ISSUER,
        "aud": "cid",
        "sub": "user-1",
        "email": "ferris@example.com",
        "iat": now(),
        "exp": now() + 300,
    });
    if let Some(nonce) = nonce {
        claims["nonce"] = json!(nonce);
    }
    claims
}

fn rs256_token(claims: &Value, kid: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(PRIVATE_PEM.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

fn token_response(id_token: &str) -> HttpResponse {
    HttpResponse::json(&json!({
        "access_token": "AT1",
        "token_type": "Bearer",
        "expires_in": 3600,
        "id_token": id_token,
    }))
}

fn query(url: &str) -> Vec<(String, String)> {
    parse_query(url.split_once('?').map(|(_, q)| q).unwrap_or_default())
}

fn find(params: &[(String, String)], name: &str) -> Option<String> {
    params.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
}

/// Starts a login and returns the `state` and `nonce` sent to the provider.
async fn start_login(client: &mut OpenIdConnectClient) -> (String, String) {
    let url = match client.authenticate(&IncomingRequest::new()).await.unwrap() {
        AuthOutcome::Redirect(url) => url,
        other => panic!("expected redirect, got {other:?}"),
    };
    assert!(url.starts_with("https://id.example.com/oauth2/authorize?"));
    let params = query(&url);
    assert_eq!(find(&params, "scope").as_deref(), Some("openid"));
    (find(&params, "state").unwrap(), find(&params, "nonce").unwrap())
}

#[tokio::test]
async fn discovery_is_fetched_once() {
    let http = provider();
    let client = client(config(), &http, &InMemoryStateStore::new());

    let metadata = client.discover_provider_config().await.unwrap();
    let expected: Map<String, Value> = serde_json::from_str(DISCOVERY).unwrap();
    assert_eq!(metadata.as_map(), &expected);
    assert_eq!(metadata.issuer(), Some(ISSUER));

    client.discover_provider_config().await.unwrap();
    assert_eq!(client.config_param("jwks_uri").await.unwrap(), Some(json!(JWKS_URL)));
    assert_eq!(http.request_count(DISCOVERY_URL), 1);
}

#[tokio::test]
async fn discovery_requires_issuer() {
    let config = ProviderConfig::builder("idp").client_id("cid").build().unwrap();
    let client = client(config, &provider(), &InMemoryStateStore::new());
    let err = client.discover_provider_config().await.unwrap_err();
    assert!(matches!(err, OAuthError::Configuration(_)));
}

#[tokio::test]
async fn shared_cache_serves_every_client() {
    let http = provider();
    let cache = OidcCache::new();
    let first = client(config(), &http, &InMemoryStateStore::new()).with_cache(cache.clone());
    let second = client(config(), &http, &InMemoryStateStore::new()).with_cache(cache.clone());

    first.discover_provider_config().await.unwrap();
    second.discover_provider_config().await.unwrap();
    assert_eq!(http.request_count(DISCOVERY_URL), 1);

    cache.invalidate("idp");
    second.discover_provider_config().await.unwrap();
    assert_eq!(http.request_count(DISCOVERY_URL), 2);
}

#[tokio::test]
async fn full_login_verifies_id_token_and_merges_claims() {
    init_logging();
    let http = provider();
    let store = InMemoryStateStore::new();
    let mut client = client(config(), &http, &store);

    let (state, nonce) = start_login(&mut client).await;
    assert_eq!(store.get("idp_authNonce").await.unwrap(), Some(nonce.clone()));
    assert_eq!(client.oauth2().client_auth(), ClientAuthMethod::Basic);

    http.insert_response(TOKEN_URL, token_response(&rs256_token(&claims(Some(&nonce)), "test-key-1")));
    let callback = IncomingRequest::new().with_query("code", "CODE1").with_query("state", state);
    let token = match client.authenticate(&callback).await.unwrap() {
        AuthOutcome::Authenticated(token) => token,
        other => panic!("expected token, got {other:?}"),
    };
    assert_eq!(token.token(), Some("AT1"));
    assert_eq!(token.param_str("sub").as_deref(), Some("user-1"));
    assert_eq!(token.param_str("email").as_deref(), Some("ferris@example.com"));
    assert!(store.get("idp_authNonce").await.unwrap().is_none());
    assert!(store.get("idp_authState").await.unwrap().is_none());
    assert!(store.get("idp_token").await.unwrap().is_some());

    let call = http.last_request(TOKEN_URL).unwrap();
    let expected = format!("Basic {}", STANDARD.encode("cid:csecret"));
    assert_eq!(call.header("Authorization"), Some(expected.as_str()));
    assert_eq!(find(&call.body_params(), "code").as_deref(), Some("CODE1"));
    assert_eq!(http.request_count(JWKS_URL), 1);
}

#[tokio::test]
async fn nonce_mismatch_is_rejected() {
    let http = provider();
    let store = InMemoryStateStore::new();
    let mut client = client(config(), &http, &store);
    let (state, _nonce) = start_login(&mut client).await;

    http.insert_response(TOKEN_URL, token_response(&rs256_token(&claims(Some("replayed")), "test-key-1")));
    let callback = IncomingRequest::new().with_query("code", "c").with_query("state", state);
    let err = client.authenticate(&callback).await.unwrap_err();
    assert!(matches!(err, OAuthError::Client(ref msg) if msg.contains("nonce")));
    assert!(store.get("idp_authNonce").await.unwrap().is_none());
    assert!(store.get("idp_token").await.unwrap().is_none());
}

#[tokio::test]
async fn failed_exchange_still_consumes_nonce() {
    let http = provider();
    let store = InMemoryStateStore::new();
    let mut client = client(config(), &http, &store);
    start_login(&mut client).await;

    let callback = IncomingRequest::new().with_query("code", "c").with_query("state", "forged");
    let err = client.authenticate(&callback).await.unwrap_err();
    assert!(matches!(err, OAuthError::InvalidState(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn tampered_signature_is_rejected() {
    let http = provider();
    let client = client(config(), &http, &InMemoryStateStore::new());
    let id_token = rs256_token(&claims(None), "test-key-1");
    assert_eq!(client.load_jws(&id_token).await.unwrap()["sub"], "user-1");

    let (signing_input, signature) = id_token.rsplit_once('.').unwrap();
    let mut bytes = URL_SAFE_NO_PAD.decode(signature).unwrap();
    bytes[0] ^= 0x01;
    let tampered = format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(bytes));
    let err = client.load_jws(&tampered).await.unwrap_err();
    assert!(matches!(err, OAuthError::Client(_)));
}

#[tokio::test]
async fn foreign_issuer_and_audience_are_rejected() {
    let http = provider();
    let client = client(config(), &http, &InMemoryStateStore::new());

    let mut wrong_aud = claims(None);
    wrong_aud["aud"] = json!(["someone-else"]);
    let response = token_response(&rs256_token(&wrong_aud, "test-key-1"));
    let params: Map<String, Value> = serde_json::from_slice(&response.body).unwrap();
    let err = client.create_token(params, false).await.unwrap_err();
    assert!(matches!(err, OAuthError::Client(ref msg) if msg.contains("aud")));

    let mut wrong_iss = claims(None);
    wrong_iss["iss"] = json!("https://evil.example.com");
    let response = token_response(&rs256_token(&wrong_iss, "test-key-1"));
    let params: Map<String, Value> = serde_json::from_slice(&response.body).unwrap();
    let err = client.create_token(params, false).await.unwrap_err();
    assert!(matches!(err, OAuthError::Client(ref msg) if msg.contains("iss")));
}

#[tokio::test]
async fn audience_array_and_trailing_slash_issuer_are_accepted() {
    let http = provider();
    let client = client(config(), &http, &InMemoryStateStore::new());
    let mut claims = claims(None);
    claims["aud"] = json!(["other", "cid"]);
    claims["iss"] = json!(format!("{ISSUER}/"));
    let response = token_response(&rs256_token(&claims, "test-key-1"));
    let params: Map<String, Value> = serde_json::from_slice(&response.body).unwrap();
    let token = client.create_token(params, false).await.unwrap();
    assert_eq!(token.param_str("sub").as_deref(), Some("user-1"));
}

#[tokio::test]
async fn missing_id_token_is_rejected() {
    let http = provider();
    let client = client(config(), &http, &InMemoryStateStore::new());
    let params = json!({"access_token": "AT1"}).as_object().cloned().unwrap();
    assert!(matches!(client.create_token(params, false).await, Err(OAuthError::Client(_))));
}

#[tokio::test]
async fn disallowed_algorithm_is_rejected() {
    let http = provider();
    let mut config = config();
    config.allowed_jws_algorithms = vec!["ES256".into()];
    let client = client(config, &http, &InMemoryStateStore::new());
    let err = client.load_jws(&rs256_token(&claims(None), "test-key-1")).await.unwrap_err();
    assert!(matches!(err, OAuthError::Client(ref msg) if msg.contains("not allowed")));
    assert_eq!(http.request_count(JWKS_URL), 0);
}

#[tokio::test]
async fn rotated_key_triggers_one_jwks_refetch() {
    init_logging();
    let http = provider();
    let client = client(config(), &http, &InMemoryStateStore::new());
    let stale = JwkSet::from_slice(JWKS.replace("test-key-1", "retired-key").as_bytes()).unwrap();
    client.cache().set_jwks("idp", stale);

    let claims = client.load_jws(&rs256_token(&claims(None), "test-key-1")).await.unwrap();
    assert_eq!(claims["sub"], "user-1");
    assert_eq!(http.request_count(JWKS_URL), 1);
    assert!(client.cache().jwks("idp").unwrap().find(Some("test-key-1")).is_some());

    let err = client.load_jws(&rs256_token(&json!({"iss": ISSUER}), "unknown-key")).await.unwrap_err();
    assert!(matches!(err, OAuthError::Client(_)));
    assert_eq!(http.request_count(JWKS_URL), 2);
}

#[tokio::test]
async fn hmac_id_token_uses_client_secret() {
    let http = provider();
    let client = client(config(), &http, &InMemoryStateStore::new());
    let id_token =
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims(None), &EncodingKey::from_secret(b"csecret")).unwrap();
    assert_eq!(client.load_jws(&id_token).await.unwrap()["email"], "ferris@example.com");
    assert_eq!(http.request_count(JWKS_URL), 0);

    let forged =
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims(None), &EncodingKey::from_secret(b"guess")).unwrap();
    assert!(client.load_jws(&forged).await.is_err());
}

#[tokio::test]
async fn hmac_id_token_needs_a_client_secret() {
    let http = provider();
    let public = ProviderConfig::builder("idp")
        .client_id("cid")
        .issuer_url(ISSUER)
        .return_url("https://app.example.com/cb")
        .enable_pkce(true)
        .build()
        .unwrap();
    let client = client(public, &http, &InMemoryStateStore::new());

    let unkeyed =
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims(None), &EncodingKey::from_secret(b"")).unwrap();
    assert!(matches!(client.load_jws(&unkeyed).await, Err(OAuthError::Client(_))));
    assert_eq!(http.request_count(JWKS_URL), 0);

    let id_token = rs256_token(&claims(None), "test-key-1");
    assert_eq!(client.load_jws(&id_token).await.unwrap()["sub"], "user-1");
}

#[tokio::test]
async fn disabled_jws_validation_skips_checks_but_consumes_nonce() {
    let http = provider();
    let store = InMemoryStateStore::new();
    let mut config = config();
    config.validate_jws = false;
    let mut client = client(config, &http, &store);
    let (state, _nonce) = start_login(&mut client).await;

    http.insert_response(TOKEN_URL, token_response("not-even-a-jwt"));
    let callback = IncomingRequest::new().with_query("code", "c").with_query("state", state);
    let token = client.fetch_access_token(&callback, "c", Vec::new()).await.unwrap();
    assert_eq!(token.token(), Some("AT1"));
    assert!(token.param("sub").is_none());
    assert!(store.get("idp_authNonce").await.unwrap().is_none());
    assert_eq!(http.request_count(JWKS_URL), 0);
}

#[tokio::test]
async fn client_secret_jwt_is_selected_when_only_option() {
    let http = provider();
    let mut discovery: Value = serde_json::from_str(DISCOVERY).unwrap();
    discovery["token_endpoint_auth_methods_supported"] = json!(["client_secret_jwt"]);
    http.insert_response(DISCOVERY_URL, HttpResponse::json(&discovery));
    let mut client = client(config(), &http, &InMemoryStateStore::new());

    start_login(&mut client).await;
    assert_eq!(client.oauth2().client_auth(), ClientAuthMethod::Jwt);
}

#[tokio::test]
async fn explicit_client_auth_survives_discovery() {
    let http = provider();
    let store = InMemoryStateStore::new();
    let mut client = client(config(), &http, &store).with_client_auth(ClientAuthMethod::Post);

    let (state, nonce) = start_login(&mut client).await;
    assert_eq!(client.oauth2().client_auth(), ClientAuthMethod::Post);

    http.insert_response(TOKEN_URL, token_response(&rs256_token(&claims(Some(&nonce)), "test-key-1")));
    let callback = IncomingRequest::new().with_query("code", "c").with_query("state", state);
    client.fetch_access_token(&callback, "c", Vec::new()).await.unwrap();

    let call = http.last_request(TOKEN_URL).unwrap();
    assert!(call.header("Authorization").is_none());
    let body = call.body_params();
    assert_eq!(find(&body, "client_id").as_deref(), Some("cid"));
    assert_eq!(find(&body, "client_secret").as_deref(), Some("csecret"));
}

#[tokio::test]
async fn explicit_client_auth_skips_unsupported_discovery_methods() {
    let http = provider();
    let mut discovery: Value = serde_json::from_str(DISCOVERY).unwrap();
    discovery["token_endpoint_auth_methods_supported"] = json!(["private_key_jwt"]);
    http.insert_response(DISCOVERY_URL, HttpResponse::json(&discovery));

    let mut chosen = client(config(), &http, &InMemoryStateStore::new()).with_client_auth(ClientAuthMethod::Basic);
    start_login(&mut chosen).await;
    assert_eq!(chosen.oauth2().client_auth(), ClientAuthMethod::Basic);

    let mut automatic = client(config(), &http, &InMemoryStateStore::new());
    let err = automatic.build_authorization_url(Vec::new()).await.unwrap_err();
    assert!(matches!(err, OAuthError::Configuration(_)));
}

#[tokio::test]
async fn user_info_is_fetched_with_bearer_token() {
    let http = provider();
    http.insert_response(USERINFO_URL, HttpResponse::json(&json!({"sub": "user-1", "name": "Ferris"})));
    let mut client = client(config(), &http, &InMemoryStateStore::new());
    let mut params = Map::new();
    params.insert("access_token".into(), json!("AT9"));
    client.set_access_token(Token::from_params(params, OAUTH2_TOKEN_KEY)).await.unwrap();

    let info = client.fetch_user_info().await.unwrap();
    assert_eq!(info["name"], "Ferris");
    let call = http.last_request(USERINFO_URL).unwrap();
    assert_eq!(call.method, HttpMethod::GET);
    assert_eq!(call.header("Authorization"), Some("Bearer AT9"));
    assert!(call.query_params().is_empty());
}

#[tokio::test]
async fn cancellation_clears_pending_handshake_state() {
    let http = provider();
    let store = InMemoryStateStore::new();
    let mut config = config();
    config.enable_pkce = true;
    let mut client = client(config, &http, &store);
    start_login(&mut client).await;
    assert_eq!(store.len(), 3);

    let outcome = client.authenticate(&IncomingRequest::from_query("error=access_denied")).await.unwrap();
    assert!(matches!(outcome, AuthOutcome::Cancelled { .. }));
    assert!(store.is_empty());
}
