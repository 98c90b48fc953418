#![cfg(feature = "oauth1")]
//! OAuth 1.0a consumer: request signing and the three-legged handshake.

pub mod client;
pub mod signing;

pub use client::OAuth1Client;
