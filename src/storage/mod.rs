//! Storage Driver Module
//!
//! This module defines the flat key-value layer that the client builds on:
//! the [`StorageDriver`] contract, the tagged [`Entry`] type every driver
//! stores, and the two bundled drivers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  dyn StorageDriver                          │
//! │                                                             │
//! │   ┌──────────────┐        ┌──────────────────────────────┐  │
//! │   │ MemoryDriver │        │ FsDriver                     │  │
//! │   │ RwLock       │        │  ┌──────────────┐            │  │
//! │   │ HashMap      │        │  │ MemoryDriver │ (cache)    │  │
//! │   └──────────────┘        │  └──────┬───────┘            │  │
//! │                           │         ▼                    │  │
//! │                           │  writer task ──> Parser      │  │
//! │                           │  (debounced)     ──> file    │  │
//! │                           └──────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use storebox::storage::{Entry, MemoryDriver, StorageDriver};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let driver = MemoryDriver::new();
//! driver.set("queue", Entry::List(vec![json!("job-1")])).await.unwrap();
//! assert!(driver.exists("queue").await.unwrap());
//! # });
//! ```

pub mod driver;
pub mod entry;
pub mod fs;
pub mod memory;

// Re-export commonly used types
pub use driver::{DriverError, DriverResult, StorageDriver};
pub use entry::{Entry, EntryKind, EntryMap, HashValue, ListValue, Value};
pub use fs::{FlushStats, FsDriver, FsOptions};
pub use memory::MemoryDriver;
