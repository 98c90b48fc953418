#![cfg(feature = "openid")]
//! OpenID Connect relying party (discovery, JWKS, id_token verification, userinfo).

pub mod client;
pub mod discovery;
pub mod jwks;
pub mod jws;

pub use client::OpenIdConnectClient;
pub use discovery::{OidcCache, ProviderMetadata};
