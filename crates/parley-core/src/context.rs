//! Storage Context
//!
//! Owns the storages of one session, tracks their identities so they can be
//! discovered later, and fans lifecycle operations out to all of them.

use std::sync::Arc;

use crate::config::StorageConfig;
use crate::error::{AgentError, Result};
use crate::events::{Event, Listener};
use crate::session::SessionIdentity;
use crate::storage::{IdentityStorage, ManagedStorage, StorageDriver, StorageKind, StorageManager};

/// Registry of the storages belonging to one session
pub struct Context {
    session: SessionIdentity,
    config: StorageConfig,
    storages: Vec<Box<dyn ManagedStorage>>,
    identities: IdentityStorage,
    listener: Listener,
}

impl Context {
    /// Context for `session` using the driver lists in `config`.
    ///
    /// Identity tracking is kept per agent, so every chat of the same agent
    /// shares one tracking record.
    pub fn new(session: SessionIdentity, config: StorageConfig, listener: Listener) -> Result<Self> {
        if config.history_drivers.is_empty() {
            return Err(AgentError::Config(
                "History storage requires at least one storage driver".into(),
            ));
        }
        let manager = StorageManager::new(config.default_drivers.clone())?;
        let owner = SessionIdentity::new(session.agent_name.clone());
        let identities = IdentityStorage::new(&owner, manager, listener.clone());

        Ok(Self {
            session: session.unscoped(),
            config,
            storages: Vec::new(),
            identities,
            listener,
        })
    }

    pub fn session(&self) -> &SessionIdentity {
        &self.session
    }

    pub fn identities(&self) -> &IdentityStorage {
        &self.identities
    }

    fn key(&self) -> String {
        self.session.key()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.storages
            .iter()
            .position(|s| s.prefix() == name || s.type_name() == name)
    }

    /// Register a storage under its prefix, replacing any previous one.
    pub async fn register<S: ManagedStorage + 'static>(&mut self, storage: S) -> Result<&mut Self> {
        self.register_boxed(Box::new(storage)).await
    }

    pub async fn register_boxed(&mut self, storage: Box<dyn ManagedStorage>) -> Result<&mut Self> {
        let prefix = storage.prefix().to_string();
        let identity = storage.identity().clone();
        let key = identity.key();

        self.identities.add(identity).await?;
        match self.position(&prefix) {
            Some(i) => self.storages[i] = storage,
            None => self.storages.push(storage),
        }

        tracing::debug!(prefix = %prefix, key = %key, "storage registered");
        self.listener.on_event(&Event::StorageRegistered { prefix, key });
        Ok(self)
    }

    /// Build and register a storage for this session.
    ///
    /// Without `drivers` the configured defaults apply (history drivers for
    /// chat history, default drivers otherwise).
    pub async fn make<S: StorageKind>(
        &mut self,
        drivers: Option<Vec<Arc<dyn StorageDriver>>>,
    ) -> Result<&mut S> {
        let drivers = drivers.unwrap_or_else(|| {
            if S::USES_HISTORY_DRIVERS {
                self.config.history_drivers.clone()
            } else {
                self.config.default_drivers.clone()
            }
        });
        let manager = StorageManager::new(drivers)?;
        let storage = S::build(&self.session, manager, self.listener.clone());
        self.register(storage).await?;

        self.get_mut::<S>().ok_or_else(|| {
            AgentError::Storage(format!("storage '{}' missing after registration", S::PREFIX))
        })
    }

    /// Lookup by prefix or type name.
    pub fn storage(&self, name: &str) -> Option<&dyn ManagedStorage> {
        self.position(name).map(|i| self.storages[i].as_ref())
    }

    pub fn storage_mut(&mut self, name: &str) -> Option<&mut (dyn ManagedStorage + 'static)> {
        let i = self.position(name)?;
        Some(self.storages[i].as_mut())
    }

    pub fn has(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn get<S: StorageKind>(&self) -> Option<&S> {
        self.storage(S::PREFIX)?.as_any().downcast_ref::<S>()
    }

    pub fn get_mut<S: StorageKind>(&mut self) -> Option<&mut S> {
        self.storage_mut(S::PREFIX)?.as_any_mut().downcast_mut::<S>()
    }

    /// Prefixes of every registered storage, in registration order.
    pub fn prefixes(&self) -> Vec<&str> {
        self.storages.iter().map(|s| s.prefix()).collect()
    }

    /// Save every storage, then the identity tracking record.
    pub async fn save(&mut self) -> Result<()> {
        let key = self.key();
        self.listener.on_event(&Event::ContextSaving { key: key.clone() });

        for storage in &mut self.storages {
            storage.save().await?;
        }
        for storage in &self.storages {
            self.identities.add(storage.identity().clone()).await?;
        }
        self.identities.save().await?;

        tracing::debug!(key = %key, storages = self.storages.len(), "context saved");
        self.listener.on_event(&Event::ContextSaved { key });
        Ok(())
    }

    /// Re-fetch every storage and the identity tracking record.
    pub async fn read(&mut self) -> Result<()> {
        let key = self.key();
        self.listener.on_event(&Event::ContextReading { key: key.clone() });

        for storage in &mut self.storages {
            storage.read().await?;
        }
        self.identities.read().await?;

        self.listener.on_event(&Event::ContextRead { key });
        Ok(())
    }

    /// Empty every storage in memory; nothing is persisted until `save`.
    pub fn clear(&mut self) {
        let key = self.key();
        self.listener.on_event(&Event::ContextClearing { key: key.clone() });

        for storage in &mut self.storages {
            storage.clear();
        }
        self.identities.clear();

        self.listener.on_event(&Event::ContextCleared { key });
    }

    /// Delete every storage's data and drop the tracking record.
    ///
    /// Both the persisted tracking record and the in-memory keys go, so a
    /// context recreated afterwards reports no tracked keys.
    pub async fn remove(&mut self) -> Result<()> {
        let key = self.key();
        self.listener.on_event(&Event::ContextRemoving { key: key.clone() });

        for storage in &mut self.storages {
            storage.remove().await?;
        }
        self.identities.clear();
        self.identities.remove().await?;

        tracing::info!(key = %key, "context removed");
        self.listener.on_event(&Event::ContextRemoved { key });
        Ok(())
    }

    /// Keys of every tracked storage identity.
    pub async fn tracked_keys(&mut self) -> Result<Vec<String>> {
        self.identities.keys().await
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("session", &self.session.key())
            .field("storages", &self.prefixes())
            .finish_non_exhaustive()
    }
}
