//! # storebox - Hashes, Lists and TTLs over Any Key-Value Driver
//!
//! storebox turns a flat key-value store into a small Redis-flavoured data
//! store. A [`Client`] adds hashes, lists and per-key, per-field and
//! per-slot expiry on top of any [`StorageDriver`], and keeps its TTLs in the
//! driver itself so they survive a restart.
//!
//! ## Features
//!
//! - **Pluggable Drivers**: in-memory, or a file rewritten in the background
//! - **Structured Values**: hashes and lists stored as single entries
//! - **TTL Support**: scalar keys, hash fields and list slots can expire
//! - **Recovery**: pending TTLs are re-armed when a client is reopened
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              storebox                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ HashMapView │───>│   Client    │<───│  ListView   │                  │
//! │  └─────────────┘    └──────┬──────┘    └─────────────┘                  │
//! │                            │                                            │
//! │          ┌─────────────────┼─────────────────┐                          │
//! │          ▼                 ▼                 ▼                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐                   │
//! │  │  TTL engine  │  │ MemoryDriver │  │   FsDriver   │──> Parser ──> file│
//! │  │ (timer tasks)│  └──────────────┘  └──────────────┘   (JSON/MsgPack)  │
//! │  └──────────────┘                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use storebox::{Client, FsDriver, FsOptions};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let driver = Arc::new(FsDriver::new("db.json", FsOptions::default())?);
//!     let client = Client::open(driver).await?;
//!
//!     client.set("name", "Ariz").await?;
//!     client.hset("user:1", "email", "ariz@example.com").await?;
//!     client.lpush("jobs", "resize-images").await?;
//!     client.setex("session", "token", Duration::from_secs(30)).await?;
//!
//!     client.flush().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: The driver contract, entry model and bundled drivers
//! - [`parser`]: Snapshot formats used by the file driver
//! - [`client`]: The client, its TTL engine and bound views
//!
//! ## Design Highlights
//!
//! ### Lazy + Active Expiry
//!
//! Each TTL is armed as its own timer task. Reads of an expired key, field
//! or slot also apply the TTL immediately, so a read never observes a value
//! past its deadline even if the timer is late.
//!
//! ### Durable TTLs
//!
//! The TTL registry is stored under [`TTL_REGISTRY_KEY`] in the same driver
//! as the data. It is hidden from `keys()` and cannot be written directly.

pub mod client;
pub mod parser;
pub mod storage;

// Re-export commonly used types for convenience
pub use client::{Client, ClientError, ClientResult, HashMapView, ListView};
pub use parser::{JsonMap, MsgPack, ParseError, Parser};
pub use storage::{
    DriverError, Entry, EntryKind, FsDriver, FsOptions, MemoryDriver, StorageDriver, Value,
};

/// Driver key holding the persisted TTL registry
pub const TTL_REGISTRY_KEY: &str = "__storebox:ttl__";

/// Version of storebox
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
