//! Dirty-tracked, lazily loaded collection persisted through a [`StorageManager`].

use serde_json::Value;

use super::StorageManager;
use crate::error::Result;
use crate::events::{Event, Listener};
use crate::message::Message;
use crate::session::SessionIdentity;

/// Element type that can be stored as one flat record.
pub trait StorageRecord: Sized + Send + Sync {
    fn to_record(&self) -> Result<Value>;

    fn from_record(record: Value) -> Result<Self>;
}

impl StorageRecord for Message {
    fn to_record(&self) -> Result<Value> {
        Self::to_record(self)
    }

    fn from_record(record: Value) -> Result<Self> {
        Self::from_record(record)
    }
}

impl StorageRecord for SessionIdentity {
    fn to_record(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_record(record: Value) -> Result<Self> {
        Ok(serde_json::from_value(record)?)
    }
}

/// Ordered items under one scoped identity.
///
/// Nothing is fetched until the first access. `clear` only touches memory
/// and needs a `save` to persist; `remove` deletes from the backends at once.
pub struct Storage<T> {
    identity: SessionIdentity,
    manager: StorageManager,
    items: Vec<T>,
    loaded: bool,
    dirty: bool,
    listener: Listener,
}

impl<T: StorageRecord> Storage<T> {
    /// `identity` should already carry the storage's scope.
    pub fn new(identity: SessionIdentity, manager: StorageManager, listener: Listener) -> Self {
        Self {
            identity,
            manager,
            items: Vec::new(),
            loaded: false,
            dirty: false,
            listener,
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn manager(&self) -> &StorageManager {
        &self.manager
    }

    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Items currently in memory, without loading.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Load once; later calls are no-ops.
    pub async fn load(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        self.read().await
    }

    /// Re-fetch from the backends, discarding in-memory changes.
    ///
    /// Missing data loads as an empty collection.
    pub async fn read(&mut self) -> Result<()> {
        let records = self.manager.read(&self.identity).await?.unwrap_or_default();
        self.items = records
            .into_iter()
            .map(T::from_record)
            .collect::<Result<Vec<_>>>()?;
        self.loaded = true;
        self.dirty = false;
        tracing::debug!(key = %self.identity, items = self.items.len(), "storage loaded");
        Ok(())
    }

    pub async fn get(&mut self) -> Result<&[T]> {
        self.load().await?;
        Ok(&self.items)
    }

    /// Mutable access; the collection is assumed changed.
    pub async fn get_mut(&mut self) -> Result<&mut Vec<T>> {
        self.load().await?;
        self.dirty = true;
        Ok(&mut self.items)
    }

    /// Replace everything in memory.
    pub fn set(&mut self, items: Vec<T>) {
        self.items = items;
        self.loaded = true;
        self.dirty = true;
    }

    pub async fn push(&mut self, item: T) -> Result<()> {
        self.load().await?;
        self.items.push(item);
        self.dirty = true;
        Ok(())
    }

    /// Empty in memory only.
    pub fn clear(&mut self) {
        self.items.clear();
        self.loaded = true;
        self.dirty = true;
    }

    pub async fn save(&mut self) -> Result<()> {
        self.save_with(T::to_record).await
    }

    /// Persist with a custom record encoder. No-op unless dirty.
    pub async fn save_with<F>(&mut self, encode: F) -> Result<()>
    where
        F: Fn(&T) -> Result<Value> + Send,
    {
        if !self.dirty {
            return Ok(());
        }
        let key = self.identity.key();
        let records = self.items.iter().map(encode).collect::<Result<Vec<_>>>()?;

        self.listener.on_event(&Event::StorageSaving { key: key.clone() });
        self.manager.save(&self.identity, &records).await;
        self.dirty = false;
        self.listener.on_event(&Event::StorageSaved { key });
        Ok(())
    }

    /// Delete from every backend and reset to an empty, clean state.
    pub async fn remove(&mut self) {
        self.manager.remove(&self.identity).await;
        self.items.clear();
        self.loaded = true;
        self.dirty = false;
    }
}

impl<T> std::fmt::Debug for Storage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("key", &self.identity.key())
            .field("items", &self.items.len())
            .field("loaded", &self.loaded)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}
