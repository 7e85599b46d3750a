//! Base64 MessagePack snapshot parser.
//!
//! The snapshot is encoded as a MessagePack map and then base64-encoded so
//! the file stays plain text.

use crate::parser::{ParseResult, Parser};
use crate::storage::EntryMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Stores the snapshot as base64-encoded MessagePack.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPack;

impl Parser for MsgPack {
    fn parse(&self, raw: &str) -> ParseResult<EntryMap> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(EntryMap::new());
        }
        let bytes = STANDARD.decode(raw)?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }

    fn stringify(&self, map: &EntryMap) -> ParseResult<String> {
        let bytes = rmp_serde::to_vec_named(map)?;
        Ok(STANDARD.encode(bytes))
    }
}

/// Returns true if `data` is padded standard-alphabet base64.
///
/// The empty string counts as base64.
pub fn is_base64(data: &str) -> bool {
    let bytes = data.as_bytes();
    if bytes.len() % 4 != 0 {
        return false;
    }

    let padding = bytes.iter().rev().take_while(|&&b| b == b'=').count();
    if padding > 2 {
        return false;
    }

    bytes[..bytes.len() - padding]
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Entry, HashValue};
    use serde_json::json;

    fn sample() -> EntryMap {
        let mut map = EntryMap::new();
        map.insert("foo".to_string(), Entry::Scalar(json!("bar")));
        map.insert("bar".to_string(), Entry::Scalar(json!("baz")));
        map
    }

    #[test]
    fn test_stringify_is_base64() {
        let b64 = MsgPack.stringify(&sample()).unwrap();
        assert!(is_base64(&b64));
        assert!(b64.len() > 6, "{}", b64);
    }

    #[test]
    fn test_parse() {
        let b64 = MsgPack.stringify(&sample()).unwrap();

        let map = MsgPack.parse(&b64).unwrap();
        assert_eq!(map.get("foo"), Some(&Entry::Scalar(json!("bar"))));
        assert_eq!(map.get("bar"), Some(&Entry::Scalar(json!("baz"))));
    }

    #[test]
    fn test_structured_entries_survive() {
        let mut fields = HashValue::new();
        fields.insert("x".to_string(), json!(-3));
        fields.insert("y".to_string(), json!(4.5));

        let mut map = sample();
        map.insert("vertex".to_string(), Entry::Hash(fields));
        map.insert(
            "queue".to_string(),
            Entry::List(vec![json!("a"), serde_json::Value::Null, json!(true)]),
        );

        let b64 = MsgPack.stringify(&map).unwrap();
        assert_eq!(MsgPack.parse(&b64).unwrap(), map);
    }

    #[test]
    fn test_parse_errors() {
        assert!(MsgPack.parse("").unwrap().is_empty());
        assert!(MsgPack.parse("not base64!").is_err());
        // Valid base64, but "foo" is not a MessagePack map
        assert!(MsgPack.parse("Zm9v").is_err());
    }

    #[test]
    fn test_is_base64() {
        assert!(!is_base64("foo"));
        assert!(is_base64("Zm9v"));
        assert!(is_base64("Zm8="));
        assert!(is_base64("Zg=="));
        assert!(!is_base64("Z==="));
        assert!(!is_base64("Zm9v!A=="));
    }
}
