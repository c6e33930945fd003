//! Lifecycle Events
//!
//! Fire-and-forget notifications emitted by contexts, storages, and the
//! agent. Listeners are injected; nothing in the core depends on a bus.

use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A storage was registered with a context
    StorageRegistered { prefix: String, key: String },
    ContextSaving { key: String },
    ContextSaved { key: String },
    ContextReading { key: String },
    ContextRead { key: String },
    ContextClearing { key: String },
    ContextCleared { key: String },
    ContextRemoving { key: String },
    ContextRemoved { key: String },
    /// Emitted for every add attempt on identity tracking
    IdentityAdding { key: String },
    /// Emitted only when the identity was not tracked yet
    IdentityAdded { key: String },
    StorageSaving { key: String },
    StorageSaved { key: String },
    /// A provider attempt failed and the sequence moved on
    ProviderFailed { provider: String, error: String },
    ProviderResolved { provider: String },
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Listener that ignores everything
#[derive(Debug, Default)]
pub struct NoopListener;

impl EventListener for NoopListener {
    fn on_event(&self, _event: &Event) {}
}

/// Listener that keeps every event, in order
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Shared listener handle
pub type Listener = Arc<dyn EventListener>;

pub fn noop() -> Listener {
    Arc::new(NoopListener)
}
