#![cfg(feature = "oauth2")]
//! OAuth 2.0 client: grants, refresh and JWT assertions.

pub mod client;
pub mod jwt;

pub use client::{ClientAuthMethod, OAuth2Client};
pub use jwt::{JwtOptions, JwtSigner};
