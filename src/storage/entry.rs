//! Stored Entry Types
//!
//! Every driver stores one [`Entry`] per key. An entry is tagged with the data
//! model it belongs to, so a hash operation that lands on a list (or the
//! other way around) is detected by matching on the variant instead of
//! inspecting the shape of a dynamic value.
//!
//! ## Representation
//!
//! ```text
//! ┌──────────────┬───────────────────────────────────────┐
//! │ Entry        │ Payload                               │
//! ├──────────────┼───────────────────────────────────────┤
//! │ Scalar       │ any JSON-compatible value             │
//! │ Hash         │ field name -> JSON-compatible value   │
//! │ List         │ ordered JSON-compatible values        │
//! └──────────────┴───────────────────────────────────────┘
//! ```
//!
//! Entries serialize externally tagged (`{"scalar": "bar"}`), which keeps a
//! scalar that happens to hold an array distinct from a real list when a
//! snapshot is written to disk and read back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A JSON-compatible value.
pub type Value = serde_json::Value;

/// The field map stored by a hash entry.
pub type HashValue = serde_json::Map<String, Value>;

/// The sequence stored by a list entry.
pub type ListValue = Vec<Value>;

/// A key-ordered set of entries, as exchanged with parsers.
pub type EntryMap = BTreeMap<String, Entry>;

/// A single value held by a storage driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entry {
    /// A plain value written with `set`/`setex`
    Scalar(Value),
    /// A field map managed by the hash operations
    Hash(HashValue),
    /// A sequence managed by the list operations
    List(ListValue),
}

/// The data model an [`Entry`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Scalar,
    Hash,
    List,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Scalar => f.write_str("scalar"),
            EntryKind::Hash => f.write_str("hash"),
            EntryKind::List => f.write_str("list"),
        }
    }
}

impl Entry {
    /// Returns the data model of this entry.
    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Scalar(_) => EntryKind::Scalar,
            Entry::Hash(_) => EntryKind::Hash,
            Entry::List(_) => EntryKind::List,
        }
    }

    /// Converts the entry into a plain value.
    ///
    /// Hashes become JSON objects and lists become JSON arrays, which is what
    /// the scalar `get` returns for keys that hold a structure.
    pub fn into_value(self) -> Value {
        match self {
            Entry::Scalar(value) => value,
            Entry::Hash(map) => Value::Object(map),
            Entry::List(list) => Value::Array(list),
        }
    }

    /// Returns true for a scalar `null`.
    ///
    /// Structured operations treat a null scalar like a missing key.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Entry::Scalar(Value::Null))
    }
}

impl From<Value> for Entry {
    fn from(value: Value) -> Self {
        Entry::Scalar(value)
    }
}

impl From<HashValue> for Entry {
    fn from(map: HashValue) -> Self {
        Entry::Hash(map)
    }
}

impl From<ListValue> for Entry {
    fn from(list: ListValue) -> Self {
        Entry::List(list)
    }
}
