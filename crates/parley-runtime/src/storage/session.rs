//! Web-session backed driver
//!
//! The host application supplies its session through [`SessionStore`];
//! records are kept under the identity key as one JSON array.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use parley_core::error::Result;
use parley_core::storage::{Records, StorageDriver};
use parley_core::SessionIdentity;

use super::storage_error;

/// Key-value view of a request-scoped session
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Returns whether the key existed.
    async fn forget(&self, key: &str) -> Result<bool>;
}

/// Process-local session, for tests and single-process hosts
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        Ok(self.values.write().await.remove(key).is_some())
    }
}

#[derive(Clone)]
pub struct SessionStorage {
    store: Arc<dyn SessionStore>,
}

impl SessionStorage {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

impl std::fmt::Debug for SessionStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStorage").finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageDriver for SessionStorage {
    fn name(&self) -> &str {
        "session"
    }

    async fn read(&self, identity: &SessionIdentity) -> Result<Option<Records>> {
        match self.store.get(&identity.key()).await? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(records)) => Ok(Some(records)),
            Some(other) => Err(storage_error(
                self.name(),
                format!("expected an array under '{}', found {other}", identity.key()),
            )),
        }
    }

    async fn write(&self, identity: &SessionIdentity, records: &[Value]) -> Result<bool> {
        self.store
            .set(&identity.key(), Value::Array(records.to_vec()))
            .await?;
        Ok(true)
    }

    async fn remove(&self, identity: &SessionIdentity) -> Result<bool> {
        self.store.forget(&identity.key()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = Arc::new(MemorySessionStore::new());
        let driver = SessionStorage::new(store.clone());
        let id = SessionIdentity::new("bot").with_user("u1").with_scope("chatHistory");

        driver.write(&id, &[json!({"type": "user", "content": "hi"})]).await.unwrap();
        assert!(store.get(&id.key()).await.unwrap().unwrap().is_array());
        assert_eq!(driver.read(&id).await.unwrap().unwrap().len(), 1);

        assert!(driver.remove(&id).await.unwrap());
        assert!(driver.read(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_foreign_value_is_an_error() {
        let store = Arc::new(MemorySessionStore::new());
        let id = SessionIdentity::new("bot");
        store.set(&id.key(), json!("not records")).await.unwrap();

        assert!(SessionStorage::new(store).read(&id).await.is_err());
    }
}
