//! Client Module
//!
//! This module layers hashes, lists and TTLs on top of a flat
//! [`StorageDriver`](crate::storage::StorageDriver).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Client                              │
//! │                                                              │
//! │  HashMapView ──┐                                             │
//! │  ListView ─────┼──> facade (get/set, h*, l*)                 │
//! │                │        │                                    │
//! │                │        ▼                                    │
//! │                │   Mutex<Registry> ◄──── timer tasks         │
//! │                │        │                (one per record)    │
//! │                │        ▼                                    │
//! │                │   dyn StorageDriver                         │
//! │                │        └── "__storebox:ttl__" (registry)    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod expiry;
pub mod facade;
pub mod views;

// Re-export commonly used types
pub use expiry::{TtlKind, TtlRecord};
pub use facade::{Client, ClientError, ClientResult, MAX_LIST_PADDING};
pub use views::{HashMapView, ListView};
