//! Snapshot Parsers
//!
//! File-backed drivers keep their whole store in one file. A [`Parser`]
//! converts between that file's text and an ordered key -> entry map.
//!
//! ## Modules
//!
//! - `json`: plain JSON object text ([`JsonMap`])
//! - `msgpack`: base64-encoded MessagePack ([`MsgPack`])
//!
//! ## Contract
//!
//! Both directions must round-trip: `parse(stringify(m)) == m` for every map
//! of entries. Empty (or whitespace-only) input parses to an empty map.

pub mod json;
pub mod msgpack;

use crate::storage::EntryMap;
use thiserror::Error;

pub use json::JsonMap;
pub use msgpack::{is_base64, MsgPack};

/// Errors that can occur while parsing or stringifying a snapshot.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Invalid JSON, or JSON that is not a map of entries
    #[error("invalid JSON snapshot: {0}")]
    Json(#[from] serde_json::Error),

    /// Input is not valid base64
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// MessagePack encoding failed
    #[error("MessagePack encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Invalid MessagePack, or MessagePack that is not a map of entries
    #[error("invalid MessagePack snapshot: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Result type for parser operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Converts a whole-store snapshot to and from its text form.
pub trait Parser: Send + Sync + 'static {
    /// Parses raw text into an ordered map of entries.
    fn parse(&self, raw: &str) -> ParseResult<EntryMap>;

    /// Serializes an ordered map of entries into raw text.
    fn stringify(&self, map: &EntryMap) -> ParseResult<String>;
}
