//! Storage Driver Contract
//!
//! A driver is a flat key-value store. It knows nothing about hashes, lists
//! or expiry: the client layers those on top and only ever talks to a driver
//! through [`StorageDriver`].
//!
//! ## Lifecycle
//!
//! ```text
//!   construct ──> prepare() ──> get / set / del / exists / keys / clear ──> flush()
//!   (may fail      (once, may       (served only after prepare               (optional)
//!    Unavailable)   load state)       has completed)
//! ```
//!
//! Drivers that cannot work at all (missing runtime, unusable path) must fail
//! in their constructor with [`DriverError::Unavailable`] rather than on
//! every call.

use crate::parser::ParseError;
use crate::storage::Entry;
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by storage drivers.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The driver cannot be used in this environment
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// I/O failure while loading or persisting data
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted data could not be decoded or encoded
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// A flat, asynchronous key-value backend.
///
/// Implementations must be thread-safe (`Send + Sync`) so a client and its
/// timer tasks can share one driver.
#[async_trait]
pub trait StorageDriver: Send + Sync + 'static {
    /// Performs one-time asynchronous initialization.
    ///
    /// Called by the client before it serves any request. The default
    /// implementation does nothing.
    async fn prepare(&self) -> DriverResult<()> {
        Ok(())
    }

    /// Returns the entry stored at `key`, or `None` if there is none.
    async fn get(&self, key: &str) -> DriverResult<Option<Entry>>;

    /// Creates or overwrites the entry at `key`.
    async fn set(&self, key: &str, entry: Entry) -> DriverResult<()>;

    /// Removes the entry at `key`. Removing a missing key is a no-op.
    async fn del(&self, key: &str) -> DriverResult<()>;

    /// Returns true if an entry exists at `key`.
    async fn exists(&self, key: &str) -> DriverResult<bool>;

    /// Returns every stored key, in no particular order.
    async fn keys(&self) -> DriverResult<Vec<String>>;

    /// Removes all entries.
    async fn clear(&self) -> DriverResult<()>;

    /// Forces any pending durable writes. The default does nothing.
    async fn flush(&self) -> DriverResult<()> {
        Ok(())
    }
}
