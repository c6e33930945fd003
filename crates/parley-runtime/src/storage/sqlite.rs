//! SQLite drivers
//!
//! Two layouts over the same [`Database`] handle:
//!
//! - [`SqliteStorage`]: one row per key holding the whole record list as a
//!   JSON blob.
//! - [`NormalizedSqliteStorage`]: one row per record with an explicit
//!   `position` column. Writes replace every row of the key in a single
//!   transaction.
//!
//! `rusqlite` is synchronous, so all statements run on the blocking pool.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

use parley_core::error::{AgentError, Result};
use parley_core::storage::{Records, StorageDriver};
use parley_core::SessionIdentity;

use super::storage_error;

const BLOB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS parley_storage (
        key        TEXT PRIMARY KEY,
        data       TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
";

const ITEM_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS parley_items (
        key      TEXT NOT NULL,
        position INTEGER NOT NULL,
        data     TEXT NOT NULL,
        PRIMARY KEY (key, position)
    );
";

fn sqlite_error(err: impl std::fmt::Display) -> AgentError {
    storage_error("sqlite", err)
}

/// Thread-safe handle to a SQLite connection
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path).map_err(sqlite_error)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(sqlite_error)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(sqlite_error)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sqlite_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` on the calling thread; for setup before entering async code.
    fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| sqlite_error(format!("mutex poisoned: {e}")))?;
        f(&mut conn).map_err(sqlite_error)
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.blocking(f))
            .await
            .map_err(|e| sqlite_error(format!("blocking task failed: {e}")))?
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

fn decode(key: &str, data: &str) -> Result<Value> {
    serde_json::from_str(data).map_err(|e| sqlite_error(format!("corrupt row for '{key}': {e}")))
}

/// Whole record list per key, replaced on every write
#[derive(Clone, Debug)]
pub struct SqliteStorage {
    db: Database,
}

impl SqliteStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_database(Database::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_database(Database::open_in_memory()?)
    }

    pub fn with_database(db: Database) -> Result<Self> {
        db.blocking(|conn| conn.execute_batch(BLOB_SCHEMA))?;
        Ok(Self { db })
    }
}

#[async_trait]
impl StorageDriver for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn read(&self, identity: &SessionIdentity) -> Result<Option<Records>> {
        let key = identity.key();
        let lookup = key.clone();
        let data: Option<String> = self
            .db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT data FROM parley_storage WHERE key = ?1",
                    params![lookup],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;

        match data {
            None => Ok(None),
            Some(data) => match decode(&key, &data)? {
                Value::Array(records) => Ok(Some(records)),
                _ => Err(sqlite_error(format!("row for '{key}' is not a list"))),
            },
        }
    }

    async fn write(&self, identity: &SessionIdentity, records: &[Value]) -> Result<bool> {
        let key = identity.key();
        let data = serde_json::to_string(records)?;
        let now = chrono::Utc::now().to_rfc3339();

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO parley_storage (key, data, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                    params![key, data, now],
                )
            })
            .await?;
        Ok(true)
    }

    async fn remove(&self, identity: &SessionIdentity) -> Result<bool> {
        let key = identity.key();
        let removed = self
            .db
            .execute(move |conn| conn.execute("DELETE FROM parley_storage WHERE key = ?1", params![key]))
            .await?;
        Ok(removed > 0)
    }
}

/// One row per record, ordered by `position`
///
/// A key written with an empty list has no rows and reads back as missing.
#[derive(Clone, Debug)]
pub struct NormalizedSqliteStorage {
    db: Database,
}

impl NormalizedSqliteStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_database(Database::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_database(Database::open_in_memory()?)
    }

    pub fn with_database(db: Database) -> Result<Self> {
        db.blocking(|conn| conn.execute_batch(ITEM_SCHEMA))?;
        Ok(Self { db })
    }

    /// Record at one position, without loading the rest of the key.
    pub async fn item(&self, identity: &SessionIdentity, position: usize) -> Result<Option<Value>> {
        let key = identity.key();
        let lookup = key.clone();
        let position = i64::try_from(position).map_err(sqlite_error)?;
        let data: Option<String> = self
            .db
            .execute(move |conn| {
                conn.query_row(
                    "SELECT data FROM parley_items WHERE key = ?1 AND position = ?2",
                    params![lookup, position],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;

        data.map(|data| decode(&key, &data)).transpose()
    }
}

#[async_trait]
impl StorageDriver for NormalizedSqliteStorage {
    fn name(&self) -> &str {
        "sqlite_normalized"
    }

    async fn read(&self, identity: &SessionIdentity) -> Result<Option<Records>> {
        let key = identity.key();
        let lookup = key.clone();
        let rows: Vec<String> = self
            .db
            .execute(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT data FROM parley_items WHERE key = ?1 ORDER BY position")?;
                let rows = stmt.query_map(params![lookup], |row| row.get(0))?;
                rows.collect()
            })
            .await?;

        if rows.is_empty() {
            return Ok(None);
        }
        rows.iter()
            .map(|data| decode(&key, data))
            .collect::<Result<Records>>()
            .map(Some)
    }

    async fn write(&self, identity: &SessionIdentity, records: &[Value]) -> Result<bool> {
        let key = identity.key();
        let rows = records
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.db
            .execute(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM parley_items WHERE key = ?1", params![key])?;
                {
                    let mut insert = tx.prepare(
                        "INSERT INTO parley_items (key, position, data) VALUES (?1, ?2, ?3)",
                    )?;
                    for (position, data) in (0_i64..).zip(&rows) {
                        insert.execute(params![key, position, data])?;
                    }
                }
                tx.commit()
            })
            .await?;
        Ok(true)
    }

    async fn remove(&self, identity: &SessionIdentity) -> Result<bool> {
        let key = identity.key();
        let removed = self
            .db
            .execute(move |conn| conn.execute("DELETE FROM parley_items WHERE key = ?1", params![key]))
            .await?;
        Ok(removed > 0)
    }
}
