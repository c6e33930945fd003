//! Shared cache driver on [`moka`].
//!
//! Entries live in process memory with optional capacity and TTL bounds,
//! so this driver sits in front of a durable one rather than replacing it.

use async_trait::async_trait;
use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use parley_core::error::Result;
use parley_core::storage::{Records, StorageDriver};
use parley_core::SessionIdentity;

/// Default maximum number of cached keys
pub const DEFAULT_CAPACITY: u64 = 10_000;

#[derive(Clone)]
pub struct CacheStorage {
    cache: Cache<String, Arc<Records>>,
}

impl CacheStorage {
    /// Cache bounded to `capacity` keys, optionally expiring entries
    /// `ttl` after they were written.
    pub fn new(capacity: u64, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().max_capacity(capacity);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            cache: builder.build(),
        }
    }

    /// Approximate number of live entries
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Flush pending maintenance so counts and expirations are current.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for CacheStorage {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, None)
    }
}

impl std::fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStorage")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[async_trait]
impl StorageDriver for CacheStorage {
    fn name(&self) -> &str {
        "cache"
    }

    async fn read(&self, identity: &SessionIdentity) -> Result<Option<Records>> {
        Ok(self
            .cache
            .get(&identity.key())
            .await
            .map(|records| records.as_ref().clone()))
    }

    async fn write(&self, identity: &SessionIdentity, records: &[Value]) -> Result<bool> {
        self.cache
            .insert(identity.key(), Arc::new(records.to_vec()))
            .await;
        Ok(true)
    }

    async fn remove(&self, identity: &SessionIdentity) -> Result<bool> {
        Ok(self.cache.remove(&identity.key()).await.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_cache_round_trip() {
        let cache = CacheStorage::default();
        let id = SessionIdentity::new("bot").with_chat("c1").with_scope("chatHistory");

        assert!(cache.read(&id).await.unwrap().is_none());
        cache.write(&id, &[json!({"type": "user", "content": "hi"})]).await.unwrap();
        assert_eq!(cache.read(&id).await.unwrap().unwrap().len(), 1);

        assert!(cache.remove(&id).await.unwrap());
        assert!(!cache.remove(&id).await.unwrap());
        assert!(cache.read(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = CacheStorage::new(10, Some(Duration::from_millis(50)));
        let id = SessionIdentity::new("bot").with_scope("usage");
        cache.write(&id, &[json!({})]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        cache.sync().await;
        assert!(cache.read(&id).await.unwrap().is_none());
    }
}
