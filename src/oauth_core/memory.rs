//! In-memory default implementations for OAuth core traits.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::state_store::StateStore;
use super::types::Result;

/// DashMap backed [`StateStore`]. Clones share the same map.
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    entries: Arc<DashMap<String, String>>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_owned(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.remove(key).map(|(_, value)| value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn take_is_single_use() {
        let store = InMemoryStateStore::new();
        store.set("p_authState", "abc".into()).await.unwrap();
        assert_eq!(store.take("p_authState").await.unwrap().as_deref(), Some("abc"));
        assert_eq!(store.take("p_authState").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn concurrent_take_yields_one_winner() {
        let store = InMemoryStateStore::new();
        store.set("k", "v".into()).await.unwrap();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.take("k").await.unwrap() })
            })
            .collect();
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
