//! Key-value persistence seam.
//!
//! The tracker only ever needs two primitives from its backing store: read a
//! set of keys and write a set of keys. Values are JSON so the persisted layout
//! stays identical across backends:
//!
//! ```text
//! watchAggregate:   { "YYYY-MM-DD": minutes, ... }
//! listenAggregate:  { "YYYY-MM-DD": minutes, ... }
//! lastWatchUpdate:  epoch millis
//! lastListenUpdate: epoch millis
//! ```
//!
//! Neither primitive is atomic across keys or across callers. Serializing
//! read-modify-write cycles is the job of [`crate::Aggregates`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be read or written. Worth retrying later.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// A stored value could not be decoded.
    #[error("corrupt value under {key}: {message}")]
    Corrupt { key: String, message: String },
}

impl StoreError {
    /// Whether the failed operation may succeed on a later attempt.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Asynchronous key-value store holding JSON values.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the given keys. Keys that are not stored are absent from the result.
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StoreError>;

    /// Writes every entry, replacing existing values.
    async fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError>;
}

/// In-process store.
///
/// Can be switched offline to simulate a backend outage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Returns a copy of the raw value under `key`.
    pub fn raw(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Stores a raw value, bypassing the offline switch.
    pub fn insert_raw(&self, key: &str, value: Value) {
        self.lock().insert(key.to_string(), value);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        match self.values.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StoreError> {
        self.check_online()?;
        let values = self.lock();
        Ok(keys
            .iter()
            .filter_map(|key| values.get(*key).map(|v| ((*key).to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError> {
        self.check_online()?;
        self.lock().extend(entries);
        Ok(())
    }
}
