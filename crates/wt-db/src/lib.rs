//! Storage layer for watch-time tracking.
//!
//! Persists the tracker's key-value state in a single `SQLite` table using
//! `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! [`SqliteStore`] serializes access through a `Mutex<Database>` so it can be
//! shared as an `Arc<dyn KeyValueStore>`.
//!
//! # Schema
//!
//! ```sql
//! kv (key TEXT PRIMARY KEY, value TEXT NOT NULL, updated_at TEXT NOT NULL)
//! ```
//!
//! `value` holds the JSON encoding of the stored value. `updated_at` is an
//! ISO 8601 UTC timestamp (e.g., `2024-01-15T10:30:00.000Z`) of the last write.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params, params_from_iter};
use serde_json::{Map, Value};
use thiserror::Error;
use wt_core::{KeyValueStore, StoreError};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored value is not valid JSON.
    #[error("invalid value for {key}: {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::InvalidValue { key, source } => Self::Corrupt {
                key,
                message: source.to_string(),
            },
            DbError::Sqlite(err) => Self::Unavailable(err.to_string()),
        }
    }
}

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Reads the given keys. Missing keys are absent from the result.
    pub fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, DbError> {
        if keys.is_empty() {
            return Ok(Map::new());
        }
        let placeholders = vec!["?"; keys.len()].join(", ");
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT key, value FROM kv WHERE key IN ({placeholders})"))?;
        let rows = stmt.query_map(params_from_iter(keys.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut values = Map::new();
        for row in rows {
            let (key, raw) = row?;
            let value = serde_json::from_str(&raw)
                .map_err(|source| DbError::InvalidValue { key: key.clone(), source })?;
            values.insert(key, value);
        }
        Ok(values)
    }

    /// Upserts every entry in a single transaction.
    pub fn set(&mut self, entries: &Map<String, Value>) -> Result<(), DbError> {
        if entries.is_empty() {
            return Ok(());
        }
        let updated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                ",
            )?;
            for (key, value) in entries {
                stmt.execute(params![key, value.to_string(), updated_at])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Lists stored keys in order.
    pub fn keys(&self) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare("SELECT key FROM kv ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    /// Deletes the given keys and returns how many rows were removed.
    pub fn clear(&mut self, keys: &[&str]) -> Result<usize, DbError> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        for key in keys {
            removed += tx.execute("DELETE FROM kv WHERE key = ?", params![key])?;
        }
        tx.commit()?;
        Ok(removed)
    }
}

/// [`KeyValueStore`] backed by a [`Database`].
pub struct SqliteStore {
    db: Mutex<Database>,
}

impl SqliteStore {
    pub const fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open(path: &Path) -> Result<Self, DbError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn keys(&self) -> Result<Vec<String>, DbError> {
        self.lock().keys()
    }

    pub fn clear(&self, keys: &[&str]) -> Result<usize, DbError> {
        self.lock().clear(keys)
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        match self.db.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StoreError> {
        let values = self.lock().get(keys)?;
        Ok(values)
    }

    async fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError> {
        self.lock().set(&entries)?;
        tracing::trace!(keys = entries.len(), "stored entries");
        Ok(())
    }
}
