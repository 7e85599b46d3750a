//! The storage client.
//!
//! [`Client`] exposes scalar, hash and list operations over any
//! [`StorageDriver`]. Hashes and lists are stored as single driver entries
//! and every mutation is a read-modify-write of the whole structure.
//!
//! ## Readiness
//!
//! Construction spawns a task that runs [`StorageDriver::prepare`] and then
//! restores the TTL registry. Every public method waits on a watch channel
//! until that task reports success or failure.
//!
//! ## Locking
//!
//! One async mutex guards the TTL registry. It is held for the whole of every
//! operation, including the driver calls, so timer callbacks and concurrent
//! callers never interleave a read-modify-write.

use super::expiry::{deadline, now_ms, Expiry, Registry, TtlKind, TtlRecord};
use crate::storage::{
    DriverError, Entry, EntryKind, HashValue, ListValue, MemoryDriver, StorageDriver, Value,
};
use crate::TTL_REGISTRY_KEY;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, error, info};

/// Errors returned by [`Client`] operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("WRONGTYPE key {key} holds a {found}, expected a {expected}")]
    WrongType {
        key: String,
        expected: EntryKind,
        found: EntryKind,
    },

    #[error("malformed TTL record for key {key}: {reason}")]
    MalformedTtl { key: String, reason: String },

    #[error("key is reserved for the TTL registry: {0}")]
    ReservedKey(String),

    #[error("storage preparation failed: {0}")]
    PrepareFailed(String),

    #[error("value conversion failed: {0}")]
    Conversion(#[from] serde_json::Error),

    #[error("index {index} out of range for list {key} of length {len}")]
    IndexOutOfRange { key: String, index: usize, len: usize },
}

impl ClientError {
    pub(crate) fn wrong_type(key: &str, expected: EntryKind, found: &Entry) -> Self {
        ClientError::WrongType {
            key: key.to_string(),
            expected,
            found: found.kind(),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Most `null` slots `lset` may pad a list with when writing past its end.
pub const MAX_LIST_PADDING: usize = 1 << 20;

/// Progress of the preparation task.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Readiness {
    Pending,
    Ready,
    Failed(String),
}

/// State shared by every clone of a [`Client`] and by its timer tasks.
pub(crate) struct Inner {
    pub(crate) driver: Arc<dyn StorageDriver>,
    pub(crate) registry: Mutex<Registry>,
    ready: watch::Sender<Readiness>,
}

impl Inner {
    async fn prepare(self: &Arc<Self>) -> ClientResult<()> {
        self.driver.prepare().await?;
        let mut registry = self.registry.lock().await;
        self.load(&mut registry).await
    }

    async fn wait_ready(&self) -> ClientResult<()> {
        let mut rx = self.ready.subscribe();
        let state = match rx
            .wait_for(|state| *state != Readiness::Pending)
            .await
        {
            Ok(state) => state.clone(),
            Err(_) => Readiness::Failed("preparation task stopped".to_string()),
        };
        match state {
            Readiness::Failed(reason) => Err(ClientError::PrepareFailed(reason)),
            _ => Ok(()),
        }
    }

    /// Reads `key` as a hash, creating an empty one if the key is missing.
    ///
    /// A scalar `null` counts as an empty hash.
    pub(crate) async fn read_hash(&self, key: &str) -> ClientResult<HashValue> {
        match self.driver.get(key).await? {
            Some(Entry::Hash(map)) => Ok(map),
            Some(entry) if entry.is_null() => Ok(HashValue::new()),
            Some(entry) => Err(ClientError::wrong_type(key, EntryKind::Hash, &entry)),
            None => {
                self.driver.set(key, Entry::Hash(HashValue::new())).await?;
                Ok(HashValue::new())
            }
        }
    }

    /// Reads `key` as a list, creating an empty one if the key is missing.
    ///
    /// A scalar `null` counts as an empty list.
    pub(crate) async fn read_list(&self, key: &str) -> ClientResult<ListValue> {
        match self.driver.get(key).await? {
            Some(Entry::List(list)) => Ok(list),
            Some(entry) if entry.is_null() => Ok(ListValue::new()),
            Some(entry) => Err(ClientError::wrong_type(key, EntryKind::List, &entry)),
            None => {
                self.driver.set(key, Entry::List(ListValue::new())).await?;
                Ok(ListValue::new())
            }
        }
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("ready", &*self.ready.borrow())
            .finish_non_exhaustive()
    }
}

/// Rejects the reserved registry key.
fn check_key(key: &str) -> ClientResult<()> {
    if key == TTL_REGISTRY_KEY {
        return Err(ClientError::ReservedKey(key.to_string()));
    }
    Ok(())
}

/// Returns `value` unless it is `null`.
fn non_null(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null())
}

/// Resolves a slice bound: negative counts from the end, then clamps to `len`.
fn slice_bound(index: i64, len: usize) -> usize {
    let len = len as i64;
    let resolved = if index < 0 { (len + index).max(0) } else { index.min(len) };
    resolved as usize
}

/// A key-value client with hashes, lists and TTLs over a flat driver.
///
/// Cloning is cheap; clones share the driver, the registry and the timers.
/// Timers are cancelled once the last clone is dropped.
///
/// # Example
///
/// ```
/// use storebox::Client;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let client = Client::in_memory();
/// client.set("foo", "bar").await.unwrap();
/// client.hset("user", "name", "Ariz").await.unwrap();
/// client.lpush("queue", 1).await.unwrap();
/// client.setex("session", "token", Duration::from_secs(60)).await.unwrap();
///
/// assert_eq!(client.get("foo").await.unwrap(), Some("bar".into()));
/// assert!(client.ttl("session").await.unwrap() > 0);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Creates a client over `driver` and starts preparing it in the background.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new<D: StorageDriver>(driver: Arc<D>) -> Self {
        let driver: Arc<dyn StorageDriver> = driver;
        let (ready, _) = watch::channel(Readiness::Pending);
        let inner = Arc::new(Inner {
            driver,
            registry: Mutex::new(Registry::default()),
            ready,
        });

        let task = inner.clone();
        tokio::spawn(async move {
            let state = match task.prepare().await {
                Ok(()) => {
                    info!("Client ready");
                    Readiness::Ready
                }
                Err(e) => {
                    error!(error = %e, "Client preparation failed");
                    Readiness::Failed(e.to_string())
                }
            };
            task.ready.send_replace(state);
        });

        Self { inner }
    }

    /// Creates a client over `driver` and waits until it is ready.
    pub async fn open<D: StorageDriver>(driver: Arc<D>) -> ClientResult<Self> {
        let client = Self::new(driver);
        client.inner.wait_ready().await?;
        Ok(client)
    }

    /// Creates a client over a fresh [`MemoryDriver`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryDriver::new()))
    }

    /// Waits until preparation has finished.
    pub async fn ready(&self) -> ClientResult<()> {
        self.inner.wait_ready().await
    }

    /// Returns the underlying driver.
    pub fn driver(&self) -> &Arc<dyn StorageDriver> {
        &self.inner.driver
    }

    /// Waits for readiness, then takes the client lock.
    async fn lock(&self) -> ClientResult<MutexGuard<'_, Registry>> {
        self.inner.wait_ready().await?;
        Ok(self.inner.registry.lock().await)
    }

    /// Forces the driver to write pending changes.
    pub async fn flush(&self) -> ClientResult<()> {
        let _guard = self.lock().await?;
        self.inner.driver.flush().await?;
        Ok(())
    }

    // ========================================================================
    // Scalar Operations
    // ========================================================================

    /// Gets the value of `key`.
    ///
    /// # Returns
    ///
    /// - `Some(value)` if the key is set and not expired
    /// - `None` if the key is missing, expired or holds `null`
    pub async fn get(&self, key: &str) -> ClientResult<Option<Value>> {
        check_key(key)?;
        let mut registry = self.lock().await?;
        self.get_locked(&mut registry, key).await
    }

    async fn get_locked(&self, registry: &mut Registry, key: &str) -> ClientResult<Option<Value>> {
        let expiry = self
            .inner
            .expire_elapsed(registry, key, |kind| *kind == TtlKind::Scalar)
            .await?;
        if expiry != Expiry::Live {
            return Ok(None);
        }
        let value = self.inner.driver.get(key).await?.map(Entry::into_value);
        Ok(non_null(value))
    }

    /// Sets `key` to `value`.
    ///
    /// An existing TTL on the key is kept.
    pub async fn set(&self, key: &str, value: impl Into<Value>) -> ClientResult<()> {
        check_key(key)?;
        let _registry = self.lock().await?;
        self.inner
            .driver
            .set(key, Entry::Scalar(value.into()))
            .await?;
        Ok(())
    }

    /// Sets `key` to `value` and deletes the key after `ttl`.
    pub async fn setex(
        &self,
        key: &str,
        value: impl Into<Value>,
        ttl: Duration,
    ) -> ClientResult<()> {
        check_key(key)?;
        let mut registry = self.lock().await?;
        self.inner
            .driver
            .set(key, Entry::Scalar(value.into()))
            .await?;

        let record = TtlRecord {
            key: key.to_string(),
            kind: TtlKind::Scalar,
            dat: deadline(ttl),
        };
        self.inner.schedule(&mut registry, record).await
    }

    /// Deletes `key` along with any TTL it has. Deleting a missing key is a no-op.
    pub async fn del(&self, key: &str) -> ClientResult<()> {
        check_key(key)?;
        let mut registry = self.lock().await?;
        self.inner.driver.del(key).await?;
        if registry.remove(key).is_some() {
            self.inner.persist(&registry).await?;
        }
        Ok(())
    }

    /// Returns true if `key` exists.
    pub async fn exists(&self, key: &str) -> ClientResult<bool> {
        check_key(key)?;
        let _registry = self.lock().await?;
        Ok(self.inner.driver.exists(key).await?)
    }

    /// Alias of [`Client::exists`].
    pub async fn has(&self, key: &str) -> ClientResult<bool> {
        self.exists(key).await
    }

    /// Returns every key except the TTL registry.
    pub async fn keys(&self) -> ClientResult<Vec<String>> {
        let _registry = self.lock().await?;
        self.visible_keys().await
    }

    async fn visible_keys(&self) -> ClientResult<Vec<String>> {
        let mut keys = self.inner.driver.keys().await?;
        keys.retain(|k| k != TTL_REGISTRY_KEY);
        Ok(keys)
    }

    /// Returns the value of every key, as [`Client::get`] would, in key order.
    ///
    /// Expired keys yield `null`.
    pub async fn values(&self) -> ClientResult<Vec<Value>> {
        let mut registry = self.lock().await?;
        let mut values = Vec::new();
        for key in self.visible_keys().await? {
            let value = self.get_locked(&mut registry, &key).await?;
            values.push(value.unwrap_or(Value::Null));
        }
        Ok(values)
    }

    /// Returns every key with its value, as [`Client::get`] would.
    pub async fn getall(&self) -> ClientResult<HashValue> {
        let mut registry = self.lock().await?;
        let mut all = HashValue::new();
        for key in self.visible_keys().await? {
            let value = self.get_locked(&mut registry, &key).await?;
            all.insert(key, value.unwrap_or(Value::Null));
        }
        Ok(all)
    }

    /// Removes every key and cancels every TTL.
    pub async fn clear(&self) -> ClientResult<()> {
        let mut registry = self.lock().await?;
        registry.clear();
        self.inner.driver.clear().await?;
        debug!("Cleared store");
        Ok(())
    }

    /// Returns the whole seconds left before `key` expires, or -1 if it has no TTL.
    pub async fn ttl(&self, key: &str) -> ClientResult<i64> {
        let ms = self.pttl(key).await?;
        Ok(if ms < 0 { -1 } else { ms / 1000 })
    }

    /// Returns the milliseconds left before `key` expires, or -1 if it has no TTL.
    pub async fn pttl(&self, key: &str) -> ClientResult<i64> {
        check_key(key)?;
        let registry = self.lock().await?;
        let remaining = registry
            .get(key)
            .map(|record| record.remaining_ms(now_ms()))
            .filter(|ms| *ms >= 0);
        Ok(remaining.unwrap_or(-1))
    }

    // ========================================================================
    // Hash Operations
    // ========================================================================

    /// Gets `field` of the hash at `key`.
    ///
    /// An elapsed field TTL is applied first.
    pub async fn hget(&self, key: &str, field: &str) -> ClientResult<Option<Value>> {
        check_key(key)?;
        let mut registry = self.lock().await?;
        let expiry = self
            .inner
            .expire_elapsed(&mut registry, key, |kind| {
                matches!(kind, TtlKind::HashField(_))
            })
            .await?;
        if expiry == Expiry::Mismatch {
            return Ok(None);
        }
        let mut map = self.inner.read_hash(key).await?;
        Ok(non_null(map.remove(field)))
    }

    /// Sets `field` of the hash at `key`.
    pub async fn hset(&self, key: &str, field: &str, value: impl Into<Value>) -> ClientResult<()> {
        check_key(key)?;
        let _registry = self.lock().await?;
        self.hset_locked(key, field, value.into()).await
    }

    async fn hset_locked(&self, key: &str, field: &str, value: Value) -> ClientResult<()> {
        let mut map = self.inner.read_hash(key).await?;
        map.insert(field.to_string(), value);
        self.inner.driver.set(key, Entry::Hash(map)).await?;
        Ok(())
    }

    /// Sets `field` of the hash at `key` and nulls it after `ttl`.
    pub async fn hsetex(
        &self,
        key: &str,
        field: &str,
        value: impl Into<Value>,
        ttl: Duration,
    ) -> ClientResult<()> {
        check_key(key)?;
        let mut registry = self.lock().await?;
        self.hset_locked(key, field, value.into()).await?;

        let record = TtlRecord {
            key: key.to_string(),
            kind: TtlKind::HashField(field.to_string()),
            dat: deadline(ttl),
        };
        self.inner.schedule(&mut registry, record).await
    }

    /// Removes `field` from the hash at `key`, along with its TTL.
    pub async fn hdel(&self, key: &str, field: &str) -> ClientResult<()> {
        check_key(key)?;
        let mut registry = self.lock().await?;
        let mut map = self.inner.read_hash(key).await?;
        if map.remove(field).is_some() {
            self.inner.driver.set(key, Entry::Hash(map)).await?;
        }

        let dropped = registry.remove_if(key, |kind| {
            matches!(kind, TtlKind::HashField(f) if f == field)
        });
        if dropped.is_some() {
            self.inner.persist(&registry).await?;
        }
        Ok(())
    }

    /// Returns true if the hash at `key` has `field`.
    pub async fn hexists(&self, key: &str, field: &str) -> ClientResult<bool> {
        check_key(key)?;
        let _registry = self.lock().await?;
        Ok(self.inner.read_hash(key).await?.contains_key(field))
    }

    /// Returns the number of fields in the hash at `key`.
    pub async fn hsize(&self, key: &str) -> ClientResult<usize> {
        check_key(key)?;
        let _registry = self.lock().await?;
        Ok(self.inner.read_hash(key).await?.len())
    }

    /// Empties the hash at `key`, dropping its field TTL.
    pub async fn hclear(&self, key: &str) -> ClientResult<()> {
        check_key(key)?;
        let mut registry = self.lock().await?;
        // Validates the type before overwriting
        self.inner.read_hash(key).await?;
        self.inner
            .driver
            .set(key, Entry::Hash(HashValue::new()))
            .await?;

        if registry
            .remove_if(key, |kind| matches!(kind, TtlKind::HashField(_)))
            .is_some()
        {
            self.inner.persist(&registry).await?;
        }
        Ok(())
    }

    /// Returns the fields of the hash at `key`.
    pub async fn hkeys(&self, key: &str) -> ClientResult<Vec<String>> {
        check_key(key)?;
        let _registry = self.lock().await?;
        Ok(self.inner.read_hash(key).await?.into_iter().map(|(k, _)| k).collect())
    }

    /// Returns the values of the hash at `key`, expired fields included as `null`.
    pub async fn hvalues(&self, key: &str) -> ClientResult<Vec<Value>> {
        check_key(key)?;
        let _registry = self.lock().await?;
        Ok(self.inner.read_hash(key).await?.into_iter().map(|(_, v)| v).collect())
    }

    /// Returns the whole hash at `key`.
    pub async fn hgetall(&self, key: &str) -> ClientResult<HashValue> {
        check_key(key)?;
        let _registry = self.lock().await?;
        self.inner.read_hash(key).await
    }

    // ========================================================================
    // List Operations
    // ========================================================================

    /// Returns the whole list at `key`.
    pub async fn lgetall(&self, key: &str) -> ClientResult<ListValue> {
        check_key(key)?;
        let _registry = self.lock().await?;
        self.inner.read_list(key).await
    }

    /// Sets slot `index` of the list at `key`, padding with `null` past the end.
    ///
    /// Fails with [`ClientError::IndexOutOfRange`] if that would take more
    /// than [`MAX_LIST_PADDING`] padding slots.
    pub async fn lset(&self, key: &str, index: usize, value: impl Into<Value>) -> ClientResult<()> {
        check_key(key)?;
        let _registry = self.lock().await?;
        self.lset_locked(key, index, value.into()).await
    }

    async fn lset_locked(&self, key: &str, index: usize, value: Value) -> ClientResult<()> {
        let mut list = self.inner.read_list(key).await?;
        if index >= list.len() {
            let out_of_range = || ClientError::IndexOutOfRange {
                key: key.to_string(),
                index,
                len: list.len(),
            };
            if index - list.len() > MAX_LIST_PADDING {
                return Err(out_of_range());
            }
            let new_len = index.checked_add(1).ok_or_else(out_of_range)?;
            list.resize(new_len, Value::Null);
        }
        list[index] = value;
        self.inner.driver.set(key, Entry::List(list)).await?;
        Ok(())
    }

    /// Sets slot `index` of the list at `key` and nulls it after `ttl`.
    pub async fn lsetex(
        &self,
        key: &str,
        index: usize,
        value: impl Into<Value>,
        ttl: Duration,
    ) -> ClientResult<()> {
        check_key(key)?;
        let mut registry = self.lock().await?;
        self.lset_locked(key, index, value.into()).await?;

        let record = TtlRecord {
            key: key.to_string(),
            kind: TtlKind::ListIndex(index),
            dat: deadline(ttl),
        };
        self.inner.schedule(&mut registry, record).await
    }

    /// Gets slot `index` of the list at `key`.
    ///
    /// An elapsed slot TTL is applied first. Out of range yields `None`.
    pub async fn lget(&self, key: &str, index: usize) -> ClientResult<Option<Value>> {
        check_key(key)?;
        let mut registry = self.lock().await?;
        let expiry = self
            .inner
            .expire_elapsed(&mut registry, key, |kind| {
                matches!(kind, TtlKind::ListIndex(_))
            })
            .await?;
        if expiry == Expiry::Mismatch {
            return Ok(None);
        }
        let mut list = self.inner.read_list(key).await?;
        if index >= list.len() {
            return Ok(None);
        }
        Ok(non_null(Some(list.swap_remove(index))))
    }

    /// Removes slot `index` from the list at `key`, shifting later slots down.
    ///
    /// Out of range is a no-op. A TTL on a later slot follows its slot.
    pub async fn ldel(&self, key: &str, index: usize) -> ClientResult<()> {
        check_key(key)?;
        let mut registry = self.lock().await?;
        let mut list = self.inner.read_list(key).await?;
        if index >= list.len() {
            return Ok(());
        }
        list.remove(index);
        self.inner.driver.set(key, Entry::List(list)).await?;

        if registry.shift_list_index(key, index) {
            self.inner.persist(&registry).await?;
        }
        Ok(())
    }

    /// Appends `value` to the list at `key`, returning the new length.
    pub async fn lpush(&self, key: &str, value: impl Into<Value>) -> ClientResult<usize> {
        check_key(key)?;
        let _registry = self.lock().await?;
        self.lpush_locked(key, value.into()).await
    }

    async fn lpush_locked(&self, key: &str, value: Value) -> ClientResult<usize> {
        let mut list = self.inner.read_list(key).await?;
        list.push(value);
        let len = list.len();
        self.inner.driver.set(key, Entry::List(list)).await?;
        Ok(len)
    }

    /// Appends `value` to the list at `key` and nulls its slot after `ttl`.
    pub async fn lpushex(
        &self,
        key: &str,
        value: impl Into<Value>,
        ttl: Duration,
    ) -> ClientResult<usize> {
        check_key(key)?;
        let mut registry = self.lock().await?;
        let len = self.lpush_locked(key, value.into()).await?;

        let record = TtlRecord {
            key: key.to_string(),
            kind: TtlKind::ListIndex(len - 1),
            dat: deadline(ttl),
        };
        self.inner.schedule(&mut registry, record).await?;
        Ok(len)
    }

    /// Removes and returns the last slot of the list at `key`.
    pub async fn lpop(&self, key: &str) -> ClientResult<Option<Value>> {
        check_key(key)?;
        let mut registry = self.lock().await?;
        let mut list = self.inner.read_list(key).await?;
        let Some(value) = list.pop() else {
            return Ok(None);
        };
        let len = list.len();
        self.inner.driver.set(key, Entry::List(list)).await?;

        if registry
            .remove_if(key, |kind| *kind == TtlKind::ListIndex(len))
            .is_some()
        {
            self.inner.persist(&registry).await?;
        }
        Ok(non_null(Some(value)))
    }

    /// Returns the length of the list at `key`.
    pub async fn lsize(&self, key: &str) -> ClientResult<usize> {
        check_key(key)?;
        let _registry = self.lock().await?;
        Ok(self.inner.read_list(key).await?.len())
    }

    /// Empties the list at `key`, dropping its slot TTL.
    pub async fn lclear(&self, key: &str) -> ClientResult<()> {
        check_key(key)?;
        let mut registry = self.lock().await?;
        self.inner.read_list(key).await?;
        self.inner
            .driver
            .set(key, Entry::List(ListValue::new()))
            .await?;

        if registry
            .remove_if(key, |kind| matches!(kind, TtlKind::ListIndex(_)))
            .is_some()
        {
            self.inner.persist(&registry).await?;
        }
        Ok(())
    }

    /// Returns slots `[start, stop)` of the list at `key`.
    ///
    /// Negative bounds count from the end and both are clamped to the list.
    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> ClientResult<ListValue> {
        check_key(key)?;
        let _registry = self.lock().await?;
        let list = self.inner.read_list(key).await?;
        let start = slice_bound(start, list.len());
        let stop = slice_bound(stop, list.len());
        if start >= stop {
            return Ok(ListValue::new());
        }
        Ok(list[start..stop].to_vec())
    }

    /// Returns true if the list at `key` contains `value`.
    pub async fn lexists(&self, key: &str, value: impl Into<Value>) -> ClientResult<bool> {
        check_key(key)?;
        let _registry = self.lock().await?;
        let value = value.into();
        Ok(self.inner.read_list(key).await?.contains(&value))
    }
}
