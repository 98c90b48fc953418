pub mod oauth_core;

#[cfg(feature = "oauth1")]
pub mod oauth1;

#[cfg(feature = "oauth2")]
pub mod oauth2;

#[cfg(feature = "openid")]
pub mod openid;

pub use oauth_core::client::{AuthClient, ClientCore};
pub use oauth_core::config::{AccessTokenPlacement, AuthorizationHeaderMethods, ProviderConfig, ProviderConfigBuilder, Quirk};
pub use oauth_core::http_client::{HttpClientError, HttpMethod, HttpRequest, HttpResponse, InMemoryHttpClient, OAuthHttpClient};
#[cfg(feature = "reqwest")]
pub use oauth_core::http_client::ReqwestHttpClient;
pub use oauth_core::memory::InMemoryStateStore;
pub use oauth_core::signature::{HmacSha, PlainText, RsaSha, SignatureMethod};
pub use oauth_core::state_store::StateStore;
pub use oauth_core::token::Token;
pub use oauth_core::types::{AuthOutcome, IncomingRequest, OAuthError, Result};

#[cfg(feature = "oauth1")]
pub use oauth1::OAuth1Client;
#[cfg(feature = "oauth2")]
pub use oauth2::{ClientAuthMethod, JwtOptions, JwtSigner, OAuth2Client};
#[cfg(feature = "openid")]
pub use openid::{OidcCache, OpenIdConnectClient, ProviderMetadata};
