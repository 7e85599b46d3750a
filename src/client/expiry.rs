//! TTL Engine
//!
//! Expiring writes (`setex`, `hsetex`, `lsetex`, `lpushex`) leave a
//! [`TtlRecord`] in the client's registry and arm one timer task per record.
//!
//! ## Lazy + Active Expiry
//!
//! Records are applied in two ways:
//! 1. **Active**: the timer wakes at the deadline and applies the record
//! 2. **Lazy**: `get`, `hget` and `lget` apply an elapsed record before reading
//!
//! Applying a record deletes a scalar key, or writes `null` into a list slot
//! or hash field. Slots and fields are never removed, so list length is
//! stable under expiry.
//!
//! ## Registry
//!
//! ```text
//!   key ──> Armed { record, id, timer }      (one record per key)
//!
//!   unset ──*ex──> active ──deadline──> fired
//!                    │
//!                    ├──*ex on same key──> superseded (timer aborted)
//!                    └──key/slot/field deleted──> dropped (timer aborted)
//! ```
//!
//! After every change the whole registry is written into the driver under
//! [`TTL_REGISTRY_KEY`](crate::TTL_REGISTRY_KEY). On startup [`Inner::load`]
//! reads it back, applies records that elapsed while the process was down
//! and re-arms the rest.

use super::facade::{ClientError, ClientResult, Inner};
use crate::storage::{Entry, EntryKind, Value};
use crate::TTL_REGISTRY_KEY;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

/// Returns the current time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Latest representable deadline; keeps `dat` within `i64` for `remaining_ms`.
const MAX_DEADLINE: u64 = i64::MAX as u64;

/// Returns the epoch-millisecond deadline `ttl` from now, saturating at [`MAX_DEADLINE`].
pub(crate) fn deadline(ttl: Duration) -> u64 {
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    now_ms().saturating_add(ttl_ms).min(MAX_DEADLINE)
}

/// What an expiring record removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtlKind {
    /// The whole scalar key is deleted
    Scalar,
    /// One list slot is set to `null`
    ListIndex(usize),
    /// One hash field is set to `null`
    HashField(String),
}

impl fmt::Display for TtlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TtlKind::Scalar => f.write_str("scalar"),
            TtlKind::ListIndex(index) => write!(f, "list[{}]", index),
            TtlKind::HashField(field) => write!(f, "hash[{}]", field),
        }
    }
}

/// A pending expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlRecord {
    /// Driver key the record belongs to
    pub key: String,
    /// What expires
    pub kind: TtlKind,
    /// Absolute deadline in epoch milliseconds
    pub dat: u64,
}

impl TtlRecord {
    /// Returns true once the deadline has been reached.
    #[inline]
    pub fn is_elapsed(&self, now: u64) -> bool {
        self.dat <= now
    }

    /// Returns the milliseconds left until the deadline (negative once elapsed).
    pub fn remaining_ms(&self, now: u64) -> i64 {
        let dat = i64::try_from(self.dat).unwrap_or(i64::MAX);
        let now = i64::try_from(now).unwrap_or(i64::MAX);
        dat.saturating_sub(now)
    }
}

/// On-disk form of a record, as stored under the registry key.
#[derive(Debug, Serialize, Deserialize)]
struct SerializedTtl {
    key: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    dat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

impl From<&TtlRecord> for SerializedTtl {
    fn from(record: &TtlRecord) -> Self {
        let (kind, index, field) = match &record.kind {
            TtlKind::Scalar => ("key", None, None),
            TtlKind::ListIndex(index) => ("list", Some(*index), None),
            TtlKind::HashField(field) => ("hash", None, Some(field.clone())),
        };
        Self {
            key: record.key.clone(),
            kind: kind.to_string(),
            dat: Some(record.dat),
            index,
            field,
        }
    }
}

impl TryFrom<SerializedTtl> for TtlRecord {
    type Error = ClientError;

    fn try_from(raw: SerializedTtl) -> Result<Self, Self::Error> {
        let kind = match (raw.kind.as_str(), raw.index, raw.field) {
            ("key", _, _) => TtlKind::Scalar,
            ("list", Some(index), _) => TtlKind::ListIndex(index),
            ("hash", _, Some(field)) => TtlKind::HashField(field),
            (other, _, _) => {
                return Err(ClientError::MalformedTtl {
                    key: raw.key,
                    reason: format!("unrecognized or incomplete record type {:?}", other),
                })
            }
        };
        Ok(Self {
            key: raw.key,
            kind,
            // A record without a deadline counts as already expired
            dat: raw.dat.unwrap_or(0),
        })
    }
}

/// A record together with the timer that will apply it.
#[derive(Debug)]
struct Armed {
    record: TtlRecord,
    id: u64,
    timer: AbortHandle,
}

/// The in-memory TTL registry: at most one armed record per key.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    armed: HashMap<String, Armed>,
    next_id: u64,
}

impl Registry {
    pub(crate) fn get(&self, key: &str) -> Option<&TtlRecord> {
        self.armed.get(key).map(|armed| &armed.record)
    }

    pub(crate) fn len(&self) -> usize {
        self.armed.len()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert(&mut self, record: TtlRecord, id: u64, timer: AbortHandle) {
        let key = record.key.clone();
        if let Some(previous) = self.armed.insert(key, Armed { record, id, timer }) {
            trace!(key = %previous.record.key, kind = %previous.record.kind, "TTL superseded");
            previous.timer.abort();
        }
    }

    /// Removes the record for `key` and cancels its timer.
    pub(crate) fn remove(&mut self, key: &str) -> Option<TtlRecord> {
        self.armed.remove(key).map(|armed| {
            armed.timer.abort();
            armed.record
        })
    }

    /// Removes the record for `key` if `matches` accepts it.
    pub(crate) fn remove_if(
        &mut self,
        key: &str,
        matches: impl FnOnce(&TtlKind) -> bool,
    ) -> Option<TtlRecord> {
        match self.get(key) {
            Some(record) if matches(&record.kind) => self.remove(key),
            _ => None,
        }
    }

    /// Shifts a list-index record down by one after `removed` was spliced out.
    ///
    /// Returns true if the registry changed.
    pub(crate) fn shift_list_index(&mut self, key: &str, removed: usize) -> bool {
        let Some(armed) = self.armed.get_mut(key) else {
            return false;
        };
        match armed.record.kind {
            TtlKind::ListIndex(index) if index == removed => {
                self.remove(key);
                true
            }
            TtlKind::ListIndex(index) if index > removed => {
                armed.record.kind = TtlKind::ListIndex(index - 1);
                true
            }
            _ => false,
        }
    }

    /// Removes the record armed as `id`, from inside its own timer.
    ///
    /// The timer is not aborted since it is the caller.
    fn take_fired(&mut self, key: &str, id: u64) -> Option<TtlRecord> {
        match self.armed.get(key) {
            Some(armed) if armed.id == id => self.armed.remove(key).map(|armed| armed.record),
            _ => None,
        }
    }

    /// Cancels every timer and forgets every record.
    pub(crate) fn clear(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.timer.abort();
        }
    }

    fn serialize(&self) -> ClientResult<Vec<Value>> {
        self.armed
            .values()
            .map(|armed| {
                serde_json::to_value(SerializedTtl::from(&armed.record)).map_err(ClientError::from)
            })
            .collect()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Outcome of checking a key for an elapsed record before a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiry {
    /// No record, or its deadline has not passed
    Live,
    /// An elapsed record of the expected kind was applied
    Applied,
    /// An elapsed record of another kind was applied; the caller's read misses
    Mismatch,
}

impl Inner {
    /// Arms `record` (replacing the key's previous record) and persists the registry.
    pub(crate) async fn schedule(
        self: &Arc<Self>,
        registry: &mut Registry,
        record: TtlRecord,
    ) -> ClientResult<()> {
        self.arm(registry, record);
        self.persist(registry).await
    }

    fn arm(self: &Arc<Self>, registry: &mut Registry, record: TtlRecord) {
        let id = registry.next_id();
        let delay = Duration::from_millis(record.dat.saturating_sub(now_ms()));
        let key = record.key.clone();
        let inner = Arc::downgrade(self);

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                inner.fire(&key, id).await;
            }
        });

        debug!(
            key = %record.key,
            kind = %record.kind,
            delay_ms = delay.as_millis() as u64,
            "TTL armed"
        );
        registry.insert(record, id, timer.abort_handle());
    }

    /// Timer callback: applies the record armed as `id`, if it is still current.
    async fn fire(&self, key: &str, id: u64) {
        let mut registry = self.registry.lock().await;
        let Some(record) = registry.take_fired(key, id) else {
            return;
        };

        if let Err(e) = self.apply(&record).await {
            warn!(key = %record.key, kind = %record.kind, error = %e, "Failed to apply TTL");
        }
        if let Err(e) = self.persist(&registry).await {
            warn!(error = %e, "Failed to persist TTL registry");
        }
        debug!(key = %record.key, kind = %record.kind, "TTL fired");
    }

    /// Performs the side effect of an expired record.
    ///
    /// A key that no longer exists, or a slot past the end of its list, is
    /// left alone.
    async fn apply(&self, record: &TtlRecord) -> ClientResult<()> {
        let key = record.key.as_str();
        match &record.kind {
            TtlKind::Scalar => self.driver.del(key).await?,
            TtlKind::ListIndex(index) => match self.driver.get(key).await? {
                Some(Entry::List(mut list)) => {
                    if let Some(slot) = list.get_mut(*index) {
                        *slot = Value::Null;
                        self.driver.set(key, Entry::List(list)).await?;
                    }
                }
                Some(entry) if !entry.is_null() => {
                    return Err(ClientError::wrong_type(key, EntryKind::List, &entry))
                }
                _ => {}
            },
            TtlKind::HashField(field) => match self.driver.get(key).await? {
                Some(Entry::Hash(mut map)) => {
                    map.insert(field.clone(), Value::Null);
                    self.driver.set(key, Entry::Hash(map)).await?;
                }
                Some(entry) if !entry.is_null() => {
                    return Err(ClientError::wrong_type(key, EntryKind::Hash, &entry))
                }
                _ => {}
            },
        }
        Ok(())
    }

    /// Applies an elapsed record for `key` ahead of its timer.
    ///
    /// `expected` tells whether the record is of the kind the caller is about
    /// to read. A record of any other kind is still applied, since its timer
    /// is cancelled here, but a failure to apply it is only logged.
    pub(crate) async fn expire_elapsed(
        &self,
        registry: &mut Registry,
        key: &str,
        expected: impl FnOnce(&TtlKind) -> bool,
    ) -> ClientResult<Expiry> {
        match registry.get(key) {
            Some(record) if record.is_elapsed(now_ms()) => {}
            _ => return Ok(Expiry::Live),
        }
        let Some(record) = registry.remove(key) else {
            return Ok(Expiry::Live);
        };

        let outcome = if expected(&record.kind) {
            self.apply(&record).await?;
            Expiry::Applied
        } else {
            if let Err(e) = self.apply(&record).await {
                warn!(key = %record.key, kind = %record.kind, error = %e, "Failed to apply TTL");
            }
            Expiry::Mismatch
        };
        trace!(key = %key, kind = %record.kind, outcome = ?outcome, "Lazily expired");

        self.persist(registry).await?;
        Ok(outcome)
    }

    /// Writes the whole registry into the driver under the reserved key.
    pub(crate) async fn persist(&self, registry: &Registry) -> ClientResult<()> {
        let records = registry.serialize()?;
        self.driver
            .set(TTL_REGISTRY_KEY, Entry::List(records))
            .await?;
        Ok(())
    }

    /// Restores the registry persisted by a previous client.
    ///
    /// A missing or malformed registry is reset rather than reported. A
    /// record of an unrecognized type is a fatal error.
    pub(crate) async fn load(self: &Arc<Self>, registry: &mut Registry) -> ClientResult<()> {
        let items = match self.driver.get(TTL_REGISTRY_KEY).await? {
            Some(Entry::List(items)) => items,
            None => return Ok(()),
            Some(entry) => {
                warn!(found = %entry.kind(), "TTL registry malformed, resetting");
                self.driver.del(TTL_REGISTRY_KEY).await?;
                return Ok(());
            }
        };

        let raw: Vec<SerializedTtl> = match items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "TTL registry malformed, resetting");
                self.driver.del(TTL_REGISTRY_KEY).await?;
                return Ok(());
            }
        };

        let now = now_ms();
        let (mut orphaned, mut expired) = (0usize, 0usize);

        for raw in raw {
            let record = TtlRecord::try_from(raw)?;

            if !self.driver.exists(&record.key).await? {
                orphaned += 1;
                continue;
            }

            if record.is_elapsed(now) {
                if let Err(e) = self.apply(&record).await {
                    warn!(key = %record.key, kind = %record.kind, error = %e, "Failed to apply TTL");
                }
                expired += 1;
                continue;
            }

            self.arm(registry, record);
        }

        debug!(
            armed = registry.len(),
            orphaned = orphaned,
            expired = expired,
            "TTL registry loaded"
        );
        self.persist(registry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryDriver, StorageDriver};
    use crate::Client;
    use serde_json::json;

    fn registry_entry(records: Value) -> Entry {
        match records {
            Value::Array(items) => Entry::List(items),
            other => Entry::Scalar(other),
        }
    }

    #[test]
    fn test_record_serialization() {
        let record = TtlRecord {
            key: "list".to_string(),
            kind: TtlKind::ListIndex(2),
            dat: 1_700_000_000_000,
        };
        let value = serde_json::to_value(SerializedTtl::from(&record)).unwrap();
        assert_eq!(
            value,
            json!({ "key": "list", "type": "list", "dat": 1_700_000_000_000u64, "index": 2 })
        );

        let raw: SerializedTtl = serde_json::from_value(value).unwrap();
        assert_eq!(TtlRecord::try_from(raw).unwrap(), record);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let raw: SerializedTtl =
            serde_json::from_value(json!({ "key": "foo", "type": "set", "dat": 1 })).unwrap();
        assert!(matches!(
            TtlRecord::try_from(raw),
            Err(ClientError::MalformedTtl { .. })
        ));

        // A list record must carry its index
        let raw: SerializedTtl =
            serde_json::from_value(json!({ "key": "foo", "type": "list", "dat": 1 })).unwrap();
        assert!(TtlRecord::try_from(raw).is_err());
    }

    #[test]
    fn test_remaining() {
        let record = TtlRecord {
            key: "k".to_string(),
            kind: TtlKind::Scalar,
            dat: 1_000,
        };
        assert_eq!(record.remaining_ms(400), 600);
        assert_eq!(record.remaining_ms(1_500), -500);

        let far = TtlRecord {
            dat: u64::MAX,
            ..record.clone()
        };
        assert_eq!(far.remaining_ms(1_000), i64::MAX - 1_000);
        assert!(!record.is_elapsed(999));
        assert!(record.is_elapsed(1_000));
    }

    #[tokio::test]
    async fn test_registry_is_persisted() {
        let driver = Arc::new(MemoryDriver::new());
        let client = Client::open(driver.clone()).await.unwrap();

        client
            .setex("foo", "bar", Duration::from_secs(60))
            .await
            .unwrap();

        let Some(Entry::List(items)) = driver.get(TTL_REGISTRY_KEY).await.unwrap() else {
            panic!("registry not persisted");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["key"], json!("foo"));
        assert_eq!(items[0]["type"], json!("key"));
    }

    #[tokio::test]
    async fn test_timer_fires_and_clears_registry() {
        let driver = Arc::new(MemoryDriver::new());
        let client = Client::open(driver.clone()).await.unwrap();

        client
            .setex("foo", "bar", Duration::from_millis(50))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Deleted by the timer, not by a read
        assert!(!driver.exists("foo").await.unwrap());
        assert_eq!(
            driver.get(TTL_REGISTRY_KEY).await.unwrap(),
            Some(Entry::List(Vec::new()))
        );
    }

    #[tokio::test]
    async fn test_superseded_timer_is_cancelled() {
        let client = Client::in_memory();

        client.lpush("list", "a").await.unwrap();
        client.lpush("list", "b").await.unwrap();
        client
            .lsetex("list", 0, "a", Duration::from_millis(50))
            .await
            .unwrap();
        client
            .lsetex("list", 1, "b", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        // Only the latest record of a key is kept, the first timer never fires
        assert_eq!(client.lget("list", 0).await.unwrap(), Some(json!("a")));
        assert_eq!(client.lget("list", 1).await.unwrap(), Some(json!("b")));
    }

    #[tokio::test]
    async fn test_load_drops_orphaned_records() {
        let dat = now_ms() + 60_000;
        let driver = Arc::new(MemoryDriver::with_entries([(
            TTL_REGISTRY_KEY,
            registry_entry(json!([{ "key": "gone", "type": "key", "dat": dat }])),
        )]));

        let client = Client::open(driver.clone()).await.unwrap();
        assert_eq!(client.ttl("gone").await.unwrap(), -1);
        assert_eq!(
            driver.get(TTL_REGISTRY_KEY).await.unwrap(),
            Some(Entry::List(Vec::new()))
        );
    }

    #[tokio::test]
    async fn test_load_applies_elapsed_records() {
        let past = now_ms() - 1_000;
        let driver = Arc::new(MemoryDriver::with_entries([
            ("session", Entry::Scalar(json!("token"))),
            ("list", Entry::List(vec![json!("a"), json!("b")])),
            (
                "user",
                Entry::Hash(
                    json!({ "name": "Mary", "token": "secret" })
                        .as_object()
                        .cloned()
                        .unwrap(),
                ),
            ),
            (
                TTL_REGISTRY_KEY,
                registry_entry(json!([
                    { "key": "session", "type": "key", "dat": past },
                    { "key": "list", "type": "list", "index": 1, "dat": past },
                    { "key": "user", "type": "hash", "field": "token", "dat": past },
                ])),
            ),
        ]));

        let client = Client::open(driver.clone()).await.unwrap();
        assert!(!client.exists("session").await.unwrap());
        assert_eq!(
            client.lgetall("list").await.unwrap(),
            vec![json!("a"), Value::Null]
        );

        // The field stays with a null value, its sibling is untouched
        let user = client.hgetall("user").await.unwrap();
        assert_eq!(user.get("token"), Some(&Value::Null));
        assert_eq!(user.get("name"), Some(&json!("Mary")));
        assert_eq!(client.hget("user", "token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_deadline_saturates() {
        assert_eq!(deadline(Duration::MAX), MAX_DEADLINE);

        let client = Client::in_memory();
        client.setex("forever", "v", Duration::MAX).await.unwrap();

        assert_eq!(client.get("forever").await.unwrap(), Some(json!("v")));
        assert!(client.pttl("forever").await.unwrap() > 0);
        assert!(client.ttl("forever").await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_elapsed_field_applied_by_scalar_read() {
        let client = Client::in_memory();

        client.hset("user", "name", "Mary").await.unwrap();
        client
            .hsetex("user", "token", "secret", Duration::from_millis(50))
            .await
            .unwrap();

        // Block the runtime so the timer cannot run before the reads below
        std::thread::sleep(Duration::from_millis(100));

        // A scalar read of a hash key sees the elapsed field record first
        assert_eq!(client.get("user").await.unwrap(), None);
        client.getall().await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(client.hget("user", "token").await.unwrap(), None);
        assert!(client.hexists("user", "token").await.unwrap());
        assert_eq!(client.hget("user", "name").await.unwrap(), Some(json!("Mary")));
        assert_eq!(client.ttl("user").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_load_rearms_pending_records() {
        let dat = now_ms() + 100;
        let driver = Arc::new(MemoryDriver::with_entries([
            ("session", Entry::Scalar(json!("token"))),
            (
                TTL_REGISTRY_KEY,
                registry_entry(json!([{ "key": "session", "type": "key", "dat": dat }])),
            ),
        ]));

        let client = Client::open(driver.clone()).await.unwrap();
        assert!(client.pttl("session").await.unwrap() > 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!driver.exists("session").await.unwrap());
    }

    #[tokio::test]
    async fn test_load_resets_malformed_registry() {
        let driver = Arc::new(MemoryDriver::with_entries([(
            TTL_REGISTRY_KEY,
            Entry::Scalar(json!("garbage")),
        )]));

        let client = Client::open(driver.clone()).await.unwrap();
        client.set("foo", "bar").await.unwrap();
        assert!(!driver.exists(TTL_REGISTRY_KEY).await.unwrap());

        let driver = Arc::new(MemoryDriver::with_entries([(
            TTL_REGISTRY_KEY,
            registry_entry(json!([42, "nope"])),
        )]));
        let client = Client::open(driver.clone()).await.unwrap();
        assert!(client.keys().await.unwrap().is_empty());
        assert!(!driver.exists(TTL_REGISTRY_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_fails_on_unknown_kind() {
        let driver = Arc::new(MemoryDriver::with_entries([
            ("foo", Entry::Scalar(json!("bar"))),
            (
                TTL_REGISTRY_KEY,
                registry_entry(json!([{ "key": "foo", "type": "set", "dat": 1 }])),
            ),
        ]));

        assert!(matches!(
            Client::open(driver).await,
            Err(ClientError::PrepareFailed(_))
        ));
    }
}
