//! Percent-encoding and URL helpers.
//!
//! OAuth 1.0a signatures need strict RFC 3986 encoding (only unreserved
//! characters pass through, space becomes `%20`), which is what
//! [`encode_url_owned`] produces.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_encode};
use url::Url;

use super::types::{OAuthError, Result};

/// RFC 3986 unreserved characters: ALPHA / DIGIT / "-" / "." / "_" / "~"
const RFC3986_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encodes a string for URL safety and returns an owned `String`
///
/// # Example
/// ```
/// use starberry_authclient::oauth_core::url_encoding::encode_url_owned;
/// let encoded = encode_url_owned("Hello World!");
/// assert_eq!(encoded, "Hello%20World%21");
/// ```
pub fn encode_url_owned(input: &str) -> String {
    percent_encode(input.as_bytes(), RFC3986_ENCODE_SET).to_string()
}

/// Joins parameters as `k=v&k=v` with both sides RFC 3986 encoded, in the given order.
pub fn build_query<K, V>(params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    params
        .iter()
        .map(|(k, v)| format!("{}={}", encode_url_owned(k.as_ref()), encode_url_owned(v.as_ref())))
        .collect::<Vec<_>>()
        .join("&")
}

/// Parses an `application/x-www-form-urlencoded` string into ordered pairs.
pub fn parse_query(input: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(input.trim_start_matches('?').as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Appends parameters to a URL, keeping any query it already has.
pub fn compose_url<K, V>(base: &str, params: &[(K, V)]) -> Result<String>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut url = Url::parse(base).map_err(|e| OAuthError::Configuration(format!("invalid URL {base:?}: {e}")))?;
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in params {
            pairs.append_pair(k.as_ref(), v.as_ref());
        }
    }
    Ok(url.to_string())
}

/// Splits a URL into its normalized base (no query, no fragment) and its query pairs.
///
/// The base keeps scheme and host lower-cased and drops default ports, as the
/// OAuth 1.0a base string URI requires.
pub fn split_url(input: &str) -> Result<(String, Vec<(String, String)>)> {
    let mut url = Url::parse(input).map_err(|e| OAuthError::Configuration(format!("invalid URL {input:?}: {e}")))?;
    let query = url.query().map(parse_query).unwrap_or_default();
    url.set_query(None);
    url.set_fragment(None);
    Ok((url.to_string(), query))
}

/// Joins an API base URL with a relative path. Absolute URLs pass through.
pub fn join_api_url(base: Option<&str>, sub_url: &str) -> Result<String> {
    if sub_url.starts_with("http://") || sub_url.starts_with("https://") {
        return Ok(sub_url.to_string());
    }
    let base = base.ok_or_else(|| OAuthError::Configuration("api_base_url is required for relative API calls".into()))?;
    Ok(format!("{}/{}", base.trim_end_matches('/'), sub_url.trim_start_matches('/')))
}
