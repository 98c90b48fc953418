//! Per-session key/value persistence bridging the legs of a handshake.

use async_trait::async_trait;

use super::types::Result;

/// Session scoped storage injected by the host application.
///
/// Implementations must isolate end users from each other. The engine
/// namespaces its keys as `{provider id}_{logical key}`.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn set(&self, key: &str, value: String) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Reads and deletes `key`. Stores that can do this atomically should
    /// override the default, so that racing consumers see at most one value.
    async fn take(&self, key: &str) -> Result<Option<String>> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.remove(key).await?;
        }
        Ok(value)
    }
}
