//! In-Memory Storage Driver
//!
//! The reference driver: a `HashMap` behind a `RwLock`. It is the default
//! backend of the client and the cache layer of the file-backed driver.

use crate::storage::{DriverResult, Entry, EntryMap, StorageDriver};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A non-persistent driver holding every entry in memory.
///
/// # Example
///
/// ```
/// use storebox::storage::{Entry, MemoryDriver, StorageDriver};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let driver = MemoryDriver::new();
/// driver.set("name", Entry::Scalar(json!("Ariz"))).await.unwrap();
/// assert_eq!(driver.get("name").await.unwrap(), Some(Entry::Scalar(json!("Ariz"))));
/// # });
/// ```
#[derive(Default)]
pub struct MemoryDriver {
    data: RwLock<HashMap<String, Entry>>,

    /// Statistics: total write operations (set, del, clear)
    write_count: AtomicU64,
}

impl std::fmt::Debug for MemoryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDriver")
            .field("keys", &self.len())
            .field("write_count", &self.write_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl MemoryDriver {
    /// Creates an empty driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a driver pre-populated with `entries`.
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Entry)>,
        K: Into<String>,
    {
        let data = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            data: RwLock::new(data),
            write_count: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns the number of write operations performed so far.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Returns a key-ordered copy of every entry.
    pub fn snapshot(&self) -> EntryMap {
        self.read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Replaces all entries with `entries`.
    pub fn replace(&self, entries: EntryMap) {
        *self.write() = entries.into_iter().collect();
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn get(&self, key: &str) -> DriverResult<Option<Entry>> {
        Ok(self.read().get(key).cloned())
    }

    async fn set(&self, key: &str, entry: Entry) -> DriverResult<()> {
        self.write().insert(key.to_string(), entry);
        Ok(())
    }

    async fn del(&self, key: &str) -> DriverResult<()> {
        self.write().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> DriverResult<bool> {
        Ok(self.read().contains_key(key))
    }

    async fn keys(&self) -> DriverResult<Vec<String>> {
        Ok(self.read().keys().cloned().collect())
    }

    async fn clear(&self) -> DriverResult<()> {
        self.write().clear();
        Ok(())
    }
}
