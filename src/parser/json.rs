//! JSON snapshot parser.

use crate::parser::{ParseResult, Parser};
use crate::storage::EntryMap;

/// Stores the snapshot as a single JSON object, one member per key.
///
/// ```text
/// {"foo":{"scalar":"bar"},"users":{"hash":{"1":"Ariz"}},"queue":{"list":[1,2]}}
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMap;

impl Parser for JsonMap {
    fn parse(&self, raw: &str) -> ParseResult<EntryMap> {
        if raw.trim().is_empty() {
            return Ok(EntryMap::new());
        }
        Ok(serde_json::from_str(raw)?)
    }

    fn stringify(&self, map: &EntryMap) -> ParseResult<String> {
        Ok(serde_json::to_string(map)?)
    }
}
