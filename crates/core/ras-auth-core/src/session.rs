//! Session storage seam.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ras_identity_core::IdentityResult;
use tokio::sync::RwLock;

/// Key/value state that belongs to one caller's session and outlives any
/// single provider instance.
///
/// Atomicity across concurrent requests of the same session is the store's
/// concern.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> IdentityResult<Option<serde_json::Value>>;

    async fn set(&self, key: &str, value: serde_json::Value) -> IdentityResult<()>;

    async fn remove(&self, key: &str) -> IdentityResult<()>;
}

/// In-memory session, for tests and single-process hosts.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    values: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> IdentityResult<Option<serde_json::Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> IdentityResult<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> IdentityResult<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_session_store() {
        let store = MemorySessionStore::new();
        assert!(store.is_empty().await);

        store.set("auth.id", json!(42)).await.unwrap();
        assert_eq!(store.get("auth.id").await.unwrap(), Some(json!(42)));

        // clones share state
        let other = store.clone();
        other.remove("auth.id").await.unwrap();
        assert_eq!(store.get("auth.id").await.unwrap(), None);
        assert_eq!(store.len().await, 0);
    }
}
