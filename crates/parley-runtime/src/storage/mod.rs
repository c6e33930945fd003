//! Persistent and shared storage drivers
//!
//! Each backend implements [`parley_core::StorageDriver`] and can be placed
//! anywhere in a [`parley_core::StorageManager`] driver list.

pub mod cache;
pub mod file;
pub mod session;
pub mod sqlite;

pub use cache::CacheStorage;
pub use file::FileStorage;
pub use session::{MemorySessionStore, SessionStorage, SessionStore};
pub use sqlite::{Database, NormalizedSqliteStorage, SqliteStorage};

use parley_core::error::AgentError;

/// Backend failure tagged with the driver that hit it.
pub(crate) fn storage_error(driver: &str, err: impl std::fmt::Display) -> AgentError {
    AgentError::Storage(format!("{driver}: {err}"))
}
