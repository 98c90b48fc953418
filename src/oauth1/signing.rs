//! RFC 5849 signing primitives: base string, signing key and the
//! `Authorization: OAuth` header.

use crate::oauth_core::http_client::HttpMethod;
use crate::oauth_core::types::Result;
use crate::oauth_core::url_encoding::{encode_url_owned, split_url};

pub const OAUTH_VERSION: &str = "1.0";

/// Parameters added to every signed request.
pub fn common_params(nonce: &str, timestamp: i64) -> [(String, String); 3] {
    [
        ("oauth_version".to_string(), OAUTH_VERSION.to_string()),
        ("oauth_nonce".to_string(), nonce.to_string()),
        ("oauth_timestamp".to_string(), timestamp.to_string()),
    ]
}

/// Normalized parameter string (RFC 5849 section 3.4.1.3.2): every pair
/// encoded, sorted by name then value, `oauth_signature` excluded.
pub fn normalize_params<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut pairs: Vec<(String, String)> = params
        .into_iter()
        .filter(|(k, _)| *k != "oauth_signature")
        .map(|(k, v)| (encode_url_owned(k), encode_url_owned(v)))
        .collect();
    pairs.sort();
    pairs.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&")
}

/// `METHOD&encoded-base-url&encoded-normalized-params`.
///
/// Query parameters of `url` take part in the signature alongside `params`.
pub fn signature_base_string(method: HttpMethod, url: &str, params: &[(String, String)]) -> Result<String> {
    let (base_url, query) = split_url(url)?;
    let all = query.iter().chain(params.iter()).map(|(k, v)| (k.as_str(), v.as_str()));
    Ok([method.as_str().to_string(), base_url, normalize_params(all)]
        .iter()
        .map(|part| encode_url_owned(part))
        .collect::<Vec<_>>()
        .join("&"))
}

/// `encode(consumer_secret)&encode(token_secret)`; the token secret may be empty.
pub fn signature_key(consumer_secret: &str, token_secret: Option<&str>) -> String {
    format!("{}&{}", encode_url_owned(consumer_secret), encode_url_owned(token_secret.unwrap_or_default()))
}

pub fn is_protocol_param(name: &str) -> bool {
    name.starts_with("oauth_")
}

/// `OAuth realm="..", oauth_x="..", ...` built from the `oauth_*` parameters in order.
pub fn authorization_header(params: &[(String, String)], realm: Option<&str>) -> String {
    let mut parts = Vec::new();
    if let Some(realm) = realm.filter(|r| !r.is_empty()) {
        parts.push(format!("realm=\"{}\"", encode_url_owned(realm)));
    }
    parts.extend(
        params
            .iter()
            .filter(|(k, _)| is_protocol_param(k))
            .map(|(k, v)| format!("{}=\"{}\"", encode_url_owned(k), encode_url_owned(v))),
    );
    if parts.is_empty() { "OAuth".to_string() } else { format!("OAuth {}", parts.join(", ")) }
}
