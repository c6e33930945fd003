//! In-memory storage driver (for development/testing)

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{Records, StorageDriver};
use crate::error::{AgentError, Result};
use crate::session::SessionIdentity;

/// Process-local driver; contents live as long as the instance.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: RwLock<HashMap<String, Records>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned<E: std::fmt::Display>(err: E) -> AgentError {
    AgentError::Storage(format!("memory store lock poisoned: {err}"))
}

#[async_trait]
impl StorageDriver for InMemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read(&self, identity: &SessionIdentity) -> Result<Option<Records>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(&identity.key()).cloned())
    }

    async fn write(&self, identity: &SessionIdentity, records: &[Value]) -> Result<bool> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(identity.key(), records.to_vec());
        Ok(true)
    }

    async fn remove(&self, identity: &SessionIdentity) -> Result<bool> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        Ok(entries.remove(&identity.key()).is_some())
    }
}
