//! Canonical serialization and the snapshot checksum.
//!
//! `serde_json` maps keep insertion order, so two structurally equal values
//! can serialize differently. Canonical form sorts object keys recursively,
//! making the digest independent of how the maps were built.

use crate::{Edge, GraphError, Node};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Serialize a JSON value with object keys sorted at every level.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// 32-bit rolling hash (`h = h * 31 + unit`) over UTF-16 code units.
///
/// # Security Note
///
/// This is **NOT** a cryptographic hash. It detects accidental drift or
/// corruption of snapshot content; collisions are an accepted risk.
#[must_use]
pub fn rolling_hash(text: &str) -> u32 {
    text.encode_utf16().fold(0u32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(u32::from(unit))
    })
}

#[derive(Serialize)]
struct ChecksumInput<'a> {
    nodes: BTreeMap<&'a str, &'a Node>,
    edges: BTreeMap<&'a str, &'a Edge>,
    timestamp: i64,
}

/// Checksum over `{nodes, edges, timestamp}` as 8 lowercase hex digits.
pub(crate) fn snapshot_checksum<'a>(
    nodes: impl Iterator<Item = (&'a str, &'a Node)>,
    edges: impl Iterator<Item = (&'a str, &'a Edge)>,
    timestamp: i64,
) -> Result<String, GraphError> {
    let input = ChecksumInput {
        nodes: nodes.collect(),
        edges: edges.collect(),
        timestamp,
    };
    let value =
        serde_json::to_value(&input).map_err(|e| GraphError::SerializationError(e.to_string()))?;
    Ok(format!("{:08x}", rolling_hash(&canonical_json(&value))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    #[test]
    fn canonical_form_sorts_keys() {
        let mut a = Map::new();
        a.insert("b".into(), json!(1));
        a.insert("a".into(), json!({"y": 2, "x": [3, {"d": 4, "c": 5}]}));

        assert_eq!(
            canonical_json(&Value::Object(a)),
            r#"{"a":{"x":[3,{"c":5,"d":4}],"y":2},"b":1}"#
        );
    }

    #[test]
    fn insertion_order_does_not_change_digest() {
        let one = Node::new("n", "t").with_property("a", 1).with_property("b", 2);
        let two = Node::new("n", "t").with_property("b", 2).with_property("a", 1);

        let c1 = snapshot_checksum([("n", &one)].into_iter(), std::iter::empty(), 7).expect("c1");
        let c2 = snapshot_checksum([("n", &two)].into_iter(), std::iter::empty(), 7).expect("c2");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 8);
    }

    #[test]
    fn rolling_hash_matches_reference_values() {
        assert_eq!(rolling_hash(""), 0);
        assert_eq!(rolling_hash("a"), 97);
        // "ab" = 97 * 31 + 98
        assert_eq!(rolling_hash("ab"), 3105);
    }

    #[test]
    fn timestamp_changes_digest() {
        let c1 = snapshot_checksum(std::iter::empty(), std::iter::empty(), 1).expect("c1");
        let c2 = snapshot_checksum(std::iter::empty(), std::iter::empty(), 2).expect("c2");
        assert_ne!(c1, c2);
    }
}
