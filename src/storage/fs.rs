//! File-Backed Storage Driver
//!
//! [`FsDriver`] keeps every entry in a [`MemoryDriver`] and mirrors the whole
//! store into a single file through a [`Parser`].
//!
//! ## Design
//!
//! ```text
//!  set / del / clear ──> MemoryDriver (authoritative)
//!          │
//!          └──> mark dirty + notify ──> writer task ──> parser.stringify ──> file
//!                                       (debounced)
//! ```
//!
//! The writer task:
//! 1. Sleeps until a mutation is signalled
//! 2. Waits for a quiet period (`FsOptions::debounce`) so bursts collapse into one write
//! 3. Snapshots the cache and writes it with `tokio::fs`
//! 4. Logs and counts failed writes instead of stopping
//!
//! A failed write is not fatal: the cache stays authoritative and the next
//! mutation (or an explicit [`StorageDriver::flush`]) writes it again.

use crate::parser::{JsonMap, Parser};
use crate::storage::{DriverError, DriverResult, Entry, MemoryDriver, StorageDriver};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, trace, warn};

/// Configuration for the file-backed driver.
#[derive(Clone)]
pub struct FsOptions {
    /// Snapshot format (default: JSON)
    pub parser: Arc<dyn Parser>,

    /// Quiet period after the last mutation before the file is written (default: 1ms)
    pub debounce: Duration,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            parser: Arc::new(JsonMap),
            debounce: Duration::from_millis(1),
        }
    }
}

impl std::fmt::Debug for FsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsOptions")
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

/// Flush statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    /// Successful snapshot writes
    pub flushes: u64,
    /// Failed snapshot writes
    pub failures: u64,
}

/// State shared between the driver and its writer task.
struct Shared {
    path: PathBuf,
    parser: Arc<dyn Parser>,
    cache: MemoryDriver,

    /// Set once `prepare` has loaded the file; no writes happen before that
    loaded: AtomicBool,
    /// Set by every mutation, cleared when a snapshot is taken
    dirty: AtomicBool,
    /// Serializes snapshot writes
    write_lock: Mutex<()>,

    flushes: AtomicU64,
    failures: AtomicU64,
}

impl Shared {
    async fn write_snapshot(&self) -> DriverResult<()> {
        if !self.loaded.load(Ordering::Acquire) {
            trace!(path = %self.path.display(), "Store not loaded yet, deferring write");
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        self.dirty.store(false, Ordering::Release);

        let result = async {
            let text = self.parser.stringify(&self.cache.snapshot())?;
            tokio::fs::write(&self.path, text).await?;
            Ok::<_, DriverError>(())
        }
        .await;

        match &result {
            Ok(()) => {
                self.flushes.fetch_add(1, Ordering::Relaxed);
                trace!(path = %self.path.display(), "Snapshot written");
            }
            Err(_) => {
                self.dirty.store(true, Ordering::Release);
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    /// Writes a pending snapshot from the background task, where failures are only reported.
    async fn flush_logged(&self) {
        if !self.dirty.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.write_snapshot().await {
            warn!(path = %self.path.display(), error = %e, "Failed to write snapshot");
        }
    }
}

/// A driver that persists its entries to one file.
///
/// # Example
///
/// ```ignore
/// use storebox::storage::{FsDriver, FsOptions};
/// use storebox::Client;
/// use std::sync::Arc;
///
/// let driver = Arc::new(FsDriver::new("data/store.json", FsOptions::default())?);
/// let client = Client::open(driver).await?;
/// client.set("name", "Ariz").await?;
/// client.flush().await?;
/// ```
pub struct FsDriver {
    shared: Arc<Shared>,

    /// Wakes the writer task after a mutation
    notify: Arc<Notify>,

    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for FsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsDriver")
            .field("path", &self.shared.path)
            .field("keys", &self.shared.cache.len())
            .field("flushes", &self.shared.flushes.load(Ordering::Relaxed))
            .finish()
    }
}

impl FsDriver {
    /// Creates a driver for the file at `path` and starts its writer task.
    ///
    /// The file itself is read by [`StorageDriver::prepare`]. A missing file
    /// is created on the first write.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Unavailable`] if no Tokio runtime is running,
    /// `path` is a directory, or its parent directory cannot be created.
    pub fn new(path: impl AsRef<Path>, options: FsOptions) -> DriverResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            DriverError::Unavailable("the file driver requires a Tokio runtime".to_string())
        })?;

        let path = std::path::absolute(path.as_ref()).map_err(|e| {
            DriverError::Unavailable(format!("cannot resolve {}: {}", path.as_ref().display(), e))
        })?;

        if path.is_dir() {
            return Err(DriverError::Unavailable(format!(
                "{} is a directory",
                path.display()
            )));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DriverError::Unavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let shared = Arc::new(Shared {
            path,
            parser: options.parser,
            cache: MemoryDriver::new(),
            loaded: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            write_lock: Mutex::new(()),
            flushes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });
        let notify = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        runtime.spawn(writer_loop(
            Arc::clone(&shared),
            Arc::clone(&notify),
            options.debounce,
            shutdown_rx,
        ));

        info!(path = %shared.path.display(), "File writer started");

        Ok(Self {
            shared,
            notify,
            shutdown_tx,
        })
    }

    /// Returns the resolved path of the backing file.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Returns flush statistics.
    pub fn stats(&self) -> FlushStats {
        FlushStats {
            flushes: self.shared.flushes.load(Ordering::Relaxed),
            failures: self.shared.failures.load(Ordering::Relaxed),
        }
    }

    fn mark_dirty(&self) {
        self.shared.dirty.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

impl Drop for FsDriver {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[async_trait]
impl StorageDriver for FsDriver {
    async fn prepare(&self) -> DriverResult<()> {
        let shared = &self.shared;

        match tokio::fs::read_to_string(&shared.path).await {
            Ok(text) => {
                let entries = shared.parser.parse(&text)?;
                debug!(
                    path = %shared.path.display(),
                    keys = entries.len(),
                    "Loaded snapshot"
                );
                shared.cache.replace(entries);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %shared.path.display(), "No snapshot yet, starting empty");
            }
            Err(e) => return Err(e.into()),
        }

        shared.loaded.store(true, Ordering::Release);
        if shared.dirty.load(Ordering::Acquire) {
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> DriverResult<Option<Entry>> {
        self.shared.cache.get(key).await
    }

    async fn set(&self, key: &str, entry: Entry) -> DriverResult<()> {
        self.shared.cache.set(key, entry).await?;
        self.mark_dirty();
        Ok(())
    }

    async fn del(&self, key: &str) -> DriverResult<()> {
        self.shared.cache.del(key).await?;
        self.mark_dirty();
        Ok(())
    }

    async fn exists(&self, key: &str) -> DriverResult<bool> {
        self.shared.cache.exists(key).await
    }

    async fn keys(&self) -> DriverResult<Vec<String>> {
        self.shared.cache.keys().await
    }

    async fn clear(&self) -> DriverResult<()> {
        self.shared.cache.clear().await?;
        self.mark_dirty();
        Ok(())
    }

    async fn flush(&self) -> DriverResult<()> {
        self.shared.write_snapshot().await
    }
}

/// The background writer loop.
async fn writer_loop(
    shared: Arc<Shared>,
    notify: Arc<Notify>,
    debounce: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            _ = notify.notified() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
        }

        // Collapse bursts: keep waiting while mutations keep arriving
        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => break,
                _ = notify.notified() => {}
                _ = shutdown_rx.changed() => break,
            }
        }

        shared.flush_logged().await;
    }

    shared.flush_logged().await;
    info!(path = %shared.path.display(), "File writer stopped");
}
