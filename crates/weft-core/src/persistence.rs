//! Persistence interface boundary.
//!
//! Platform storage (Room, CoreData, flat files) lives outside this core;
//! the engine only needs get/put by key to survive restarts with its peer
//! table and identity seed intact. [`MemoryStore`] backs tests and
//! ephemeral nodes.

use std::collections::HashMap;
use tokio::sync::RwLock;

/// Key under which the peer-table snapshot is stored.
pub const PEERS_KEY: &str = "weft.peers";

/// Key under which the identity seed is stored.
pub const IDENTITY_KEY: &str = "weft.identity";

/// Capability the engine requires from platform storage.
pub trait Persistence: Send + Sync + 'static {
    /// Fetch the value stored under `key`, if any.
    fn get(&self, key: &str) -> impl Future<Output = Option<Vec<u8>>> + Send;

    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: Vec<u8>) -> impl Future<Output = ()> + Send;
}

/// Volatile in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for MemoryStore {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.read().await.get(key).cloned()
    }

    async fn put(&self, key: &str, value: Vec<u8>) {
        self.inner.write().await.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await, None);

        store.put("k", b"v1".to_vec()).await;
        assert_eq!(store.get("k").await, Some(b"v1".to_vec()));

        store.put("k", b"v2".to_vec()).await;
        assert_eq!(store.get("k").await, Some(b"v2".to_vec()));
    }
}
