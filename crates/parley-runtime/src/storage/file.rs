//! JSON file per key
//!
//! Layout: `{folder}/{sanitized key}.json`, pretty-printed.

use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parley_core::error::Result;
use parley_core::storage::{Records, StorageDriver};
use parley_core::SessionIdentity;

use super::storage_error;

#[derive(Clone, Debug)]
pub struct FileStorage {
    folder: PathBuf,
}

impl FileStorage {
    /// The folder is created on first write.
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// File backing an identity
    pub fn path_for(&self, identity: &SessionIdentity) -> PathBuf {
        self.folder
            .join(format!("{}.json", sanitize_key(&identity.key())))
    }
}

/// Replace everything outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl StorageDriver for FileStorage {
    fn name(&self) -> &str {
        "file"
    }

    async fn read(&self, identity: &SessionIdentity) -> Result<Option<Records>> {
        let path = self.path_for(identity);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error(self.name(), format!("{}: {e}", path.display()))),
        };

        let records = serde_json::from_slice(&bytes)
            .map_err(|e| storage_error(self.name(), format!("{}: {e}", path.display())))?;
        Ok(Some(records))
    }

    async fn write(&self, identity: &SessionIdentity, records: &[Value]) -> Result<bool> {
        tokio::fs::create_dir_all(&self.folder)
            .await
            .map_err(|e| storage_error(self.name(), format!("{}: {e}", self.folder.display())))?;

        let path = self.path_for(identity);
        let json = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| storage_error(self.name(), format!("{}: {e}", path.display())))?;

        tracing::debug!(path = %path.display(), records = records.len(), "wrote storage file");
        Ok(true)
    }

    async fn remove(&self, identity: &SessionIdentity) -> Result<bool> {
        let path = self.path_for(identity);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_error(self.name(), format!("{}: {e}", path.display()))),
        }
    }
}
