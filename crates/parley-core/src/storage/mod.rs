//! Session Storage
//!
//! Raw keyed drivers, the fan-out [`StorageManager`] over them, and the typed
//! aggregates (chat history, identity tracking, usage) built on top.
//!
//! ```text
//! ChatHistoryStorage ─┐
//! IdentityStorage ────┼─► Storage<T> ─► StorageManager ─► [driver 0, driver 1, ...]
//! UsageStorage ───────┘   (dirty/lazy)   (write all, read first)
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::events::Listener;
use crate::session::SessionIdentity;

pub mod aggregate;
pub mod chat_history;
pub mod identity;
pub mod memory;
pub mod usage;

pub use aggregate::{Storage, StorageRecord};
pub use chat_history::ChatHistoryStorage;
pub use identity::IdentityStorage;
pub use memory::InMemoryStorage;
pub use usage::{UsageRecord, UsageStorage};

/// Serialized contents of one storage key: a list of flat records.
pub type Records = Vec<Value>;

/// A single storage backend
///
/// Missing data is `Ok(None)`; errors are reserved for genuine I/O failures.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver name used in logs
    fn name(&self) -> &str;

    async fn read(&self, identity: &SessionIdentity) -> Result<Option<Records>>;

    /// Replace everything stored under the identity's key.
    async fn write(&self, identity: &SessionIdentity, records: &[Value]) -> Result<bool>;

    async fn remove(&self, identity: &SessionIdentity) -> Result<bool>;
}

/// Fans writes out to every driver and reads from the first that has data.
///
/// Writes and removes are best effort: a failing driver is logged and
/// skipped, and no partial-failure result is reported.
#[derive(Clone)]
pub struct StorageManager {
    drivers: Vec<Arc<dyn StorageDriver>>,
}

impl StorageManager {
    /// Manager over a non-empty, ordered driver list (index 0 is primary).
    pub fn new(drivers: Vec<Arc<dyn StorageDriver>>) -> Result<Self> {
        if drivers.is_empty() {
            return Err(AgentError::Config(
                "Storage requires at least one storage driver".into(),
            ));
        }
        Ok(Self { drivers })
    }

    pub fn drivers(&self) -> &[Arc<dyn StorageDriver>] {
        &self.drivers
    }

    pub fn driver_names(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    /// First non-empty result in driver order.
    ///
    /// `Ok(None)` when every driver answered without data; an error when no
    /// driver had data and at least one of them failed.
    pub async fn read(&self, identity: &SessionIdentity) -> Result<Option<Records>> {
        let key = identity.key();
        let mut failures = Vec::new();

        for driver in &self.drivers {
            match driver.read(identity).await {
                Ok(Some(records)) => {
                    tracing::debug!(driver = driver.name(), key = %key, "storage read hit");
                    return Ok(Some(records));
                }
                Ok(None) => {
                    tracing::debug!(driver = driver.name(), key = %key, "storage read miss");
                }
                Err(e) => {
                    tracing::warn!(driver = driver.name(), key = %key, error = %e, "storage read failed, trying next driver");
                    failures.push(format!("{}: {e}", driver.name()));
                }
            }
        }

        if failures.is_empty() {
            Ok(None)
        } else {
            Err(AgentError::StorageUnavailable {
                key,
                reason: failures.join("; "),
            })
        }
    }

    /// Write to every driver.
    pub async fn save(&self, identity: &SessionIdentity, records: &[Value]) {
        let key = identity.key();
        for driver in &self.drivers {
            match driver.write(identity, records).await {
                Ok(_) => {
                    tracing::debug!(driver = driver.name(), key = %key, records = records.len(), "storage write");
                }
                Err(e) => {
                    tracing::warn!(driver = driver.name(), key = %key, error = %e, "storage write failed");
                }
            }
        }
    }

    /// Remove from every driver.
    pub async fn remove(&self, identity: &SessionIdentity) {
        let key = identity.key();
        for driver in &self.drivers {
            if let Err(e) = driver.remove(identity).await {
                tracing::warn!(driver = driver.name(), key = %key, error = %e, "storage remove failed");
            }
        }
    }
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("drivers", &self.driver_names())
            .finish()
    }
}

/// Storage as seen by a [`crate::context::Context`]
#[async_trait]
pub trait ManagedStorage: Send + Sync {
    /// Registry prefix (e.g. "chatHistory")
    fn prefix(&self) -> &str;

    /// Type identifier accepted by context lookups
    fn type_name(&self) -> &'static str;

    /// Scoped identity this storage persists under
    fn identity(&self) -> &SessionIdentity;

    async fn save(&mut self) -> Result<()>;

    async fn read(&mut self) -> Result<()>;

    fn clear(&mut self);

    async fn remove(&mut self) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Storage types a context can construct with [`crate::context::Context::make`]
pub trait StorageKind: ManagedStorage + Sized + 'static {
    /// Prefix, also used as the identity scope
    const PREFIX: &'static str;

    const TYPE_NAME: &'static str;

    /// Whether the history driver list applies instead of the default one
    const USES_HISTORY_DRIVERS: bool = false;

    /// Build for an unscoped session identity.
    fn build(session: &SessionIdentity, manager: StorageManager, listener: Listener) -> Self;
}


#[cfg(test)]
mod tests {
    use super::testing::FailingDriver;
    use super::*;
    use serde_json::json;

    fn identity() -> SessionIdentity {
        SessionIdentity::new("agent").with_chat("c1").with_scope("chatHistory")
    }

    #[test]
    fn test_empty_driver_list_rejected() {
        assert!(StorageManager::new(Vec::new()).unwrap_err().is_config());
    }

    #[tokio::test]
    async fn test_read_falls_back_on_empty_primary() {
        let primary = Arc::new(InMemoryStorage::new());
        let secondary = Arc::new(InMemoryStorage::new());
        secondary.write(&identity(), &[json!({"msg": "hi"})]).await.unwrap();

        let manager = StorageManager::new(vec![primary, secondary]).unwrap();
        let records = manager.read(&identity()).await.unwrap().unwrap();
        assert_eq!(records, vec![json!({"msg": "hi"})]);
    }

    #[tokio::test]
    async fn test_read_falls_back_on_failing_primary() {
        let secondary = Arc::new(InMemoryStorage::new());
        secondary.write(&identity(), &[json!({"msg": "hi"})]).await.unwrap();

        let manager = StorageManager::new(vec![Arc::new(FailingDriver), secondary]).unwrap();
        let records = manager.read(&identity()).await.unwrap().unwrap();
        assert_eq!(records[0]["msg"], "hi");
    }

    #[tokio::test]
    async fn test_read_prefers_primary_even_if_stale() {
        let primary = Arc::new(InMemoryStorage::new());
        let secondary = Arc::new(InMemoryStorage::new());
        primary.write(&identity(), &[json!({"v": 1})]).await.unwrap();
        secondary.write(&identity(), &[json!({"v": 2})]).await.unwrap();

        let manager = StorageManager::new(vec![primary, secondary]).unwrap();
        assert_eq!(manager.read(&identity()).await.unwrap().unwrap()[0]["v"], 1);
    }

    #[tokio::test]
    async fn test_read_distinguishes_missing_from_unavailable() {
        let manager = StorageManager::new(vec![Arc::new(InMemoryStorage::new())]).unwrap();
        assert!(manager.read(&identity()).await.unwrap().is_none());

        let manager = StorageManager::new(vec![
            Arc::new(FailingDriver) as Arc<dyn StorageDriver>,
            Arc::new(InMemoryStorage::new()),
        ])
        .unwrap();
        assert!(matches!(
            manager.read(&identity()).await,
            Err(AgentError::StorageUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_save_reaches_healthy_driver_after_failure() {
        let healthy = Arc::new(InMemoryStorage::new());
        let manager =
            StorageManager::new(vec![Arc::new(FailingDriver), healthy.clone()]).unwrap();

        manager.save(&identity(), &[json!({"msg": "hi"})]).await;
        assert_eq!(
            healthy.read(&identity()).await.unwrap(),
            Some(vec![json!({"msg": "hi"})])
        );

        manager.remove(&identity()).await;
        assert!(healthy.read(&identity()).await.unwrap().is_none());
    }
}
