pub mod client;
pub mod config;
pub mod crypto;
pub mod http_client;
pub mod memory;
pub mod signature;
pub mod state_store;
pub mod token;
pub mod types;
pub mod url_encoding;
