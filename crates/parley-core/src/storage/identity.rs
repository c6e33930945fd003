//! Tracking of the storage identities a context has registered

use async_trait::async_trait;
use std::any::Any;

use super::{ManagedStorage, Storage, StorageManager};
use crate::error::Result;
use crate::events::{Event, Listener};
use crate::session::{SessionIdentity, SessionIdentityArray};

/// Scope suffix keeping the tracking record apart from the storages it lists.
pub const IDENTITY_SCOPE: &str = "context";

/// Persisted set of [`SessionIdentity`] values, unique by key.
pub struct IdentityStorage {
    inner: Storage<SessionIdentity>,
    listener: Listener,
}

impl IdentityStorage {
    pub fn new(owner: &SessionIdentity, manager: StorageManager, listener: Listener) -> Self {
        Self {
            inner: Storage::new(owner.with_scope(IDENTITY_SCOPE), manager, listener.clone()),
            listener,
        }
    }

    /// Track an identity. Returns `false` if its key was already tracked.
    pub async fn add(&mut self, identity: SessionIdentity) -> Result<bool> {
        let key = identity.key();
        self.listener.on_event(&Event::IdentityAdding { key: key.clone() });

        if self.contains(&key).await? {
            return Ok(false);
        }
        self.inner.push(identity).await?;
        self.listener.on_event(&Event::IdentityAdded { key });
        Ok(true)
    }

    pub async fn contains(&mut self, key: &str) -> Result<bool> {
        Ok(self.inner.get().await?.iter().any(|i| i.key() == key))
    }

    /// Stop tracking a key. An untracked key leaves the record clean.
    pub async fn forget(&mut self, key: &str) -> Result<bool> {
        if !self.contains(key).await? {
            return Ok(false);
        }
        self.inner.get_mut().await?.retain(|i| i.key() != key);
        Ok(true)
    }

    pub async fn keys(&mut self) -> Result<Vec<String>> {
        Ok(self.inner.get().await?.iter().map(SessionIdentity::key).collect())
    }

    pub async fn tracked(&mut self) -> Result<SessionIdentityArray> {
        Ok(self.inner.get().await?.iter().cloned().collect())
    }

    pub async fn len(&mut self) -> Result<usize> {
        Ok(self.inner.get().await?.len())
    }

    pub const fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }
}

impl std::fmt::Debug for IdentityStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStorage")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ManagedStorage for IdentityStorage {
    fn prefix(&self) -> &str {
        IDENTITY_SCOPE
    }

    fn type_name(&self) -> &'static str {
        "IdentityStorage"
    }

    fn identity(&self) -> &SessionIdentity {
        self.inner.identity()
    }

    async fn save(&mut self) -> Result<()> {
        self.inner.save().await
    }

    async fn read(&mut self) -> Result<()> {
        self.inner.read().await
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    async fn remove(&mut self) -> Result<()> {
        self.inner.remove().await;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
