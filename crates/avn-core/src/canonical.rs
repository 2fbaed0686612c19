// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical JSON serialization and SHA-256 content addressing.
//!
//! Canonical form is the hashing substrate for the whole engine: version
//! hashes, commit addresses, and integrity verification all run over the
//! bytes produced here. Key order is imposed at serialization time rather
//! than inherited from any map implementation, so the output is stable no
//! matter how a value was built.
//!
//! Pretty printing is an output-layer concern and never affects hashes.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Serialize a JSON value into its canonical byte form.
///
/// Rules:
/// - object keys sorted ascending (recursively),
/// - array order preserved,
/// - no extraneous whitespace,
/// - forward slashes and non-ASCII characters left unescaped
///   (serde_json's default string encoding).
///
/// # Examples
///
/// ```
/// use serde_json::json;
///
/// let a = json!({"b": 1, "a": {"d": 2, "c": 3}});
/// assert_eq!(avn_core::canonical_json(&a), r#"{"a":{"c":3,"d":2},"b":1}"#);
/// ```
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_json_string(s, out),
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
        Value::Object(map) => {
            // Sort at serialization time; never trust the map's own order.
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, val)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    // serde_json string encoding: minimal escapes, no escaped slashes,
    // no ASCII-escaped unicode. Infallible for a plain string.
    match serde_json::to_string(s) {
        Ok(encoded) => out.push_str(&encoded),
        Err(_) => unreachable!("string serialization is infallible"),
    }
}

/// Hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Content address of a payload: `sha256_hex(canonical_json(value))`.
///
/// This doubles as the commit hash of a version.
#[must_use]
pub fn payload_hash(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn keys_sorted_recursively() {
        let v = json!({"z": {"b": 1, "a": 2}, "a": [{"y": 1, "x": 2}]});
        assert_eq!(
            canonical_json(&v),
            r#"{"a":[{"x":2,"y":1}],"z":{"a":2,"b":1}}"#
        );
    }

    #[test]
    fn arrays_keep_order() {
        let v = json!([3, 1, 2]);
        assert_eq!(canonical_json(&v), "[3,1,2]");
    }

    #[test]
    fn slashes_and_unicode_stay_raw() {
        let v = json!({"url": "https://a/b", "name": "Ärger"});
        let s = canonical_json(&v);
        assert!(s.contains("https://a/b"));
        assert!(s.contains("Ärger"));
        assert!(!s.contains("\\/"));
        assert!(!s.contains("\\u"));
    }

    #[test]
    fn control_chars_are_escaped() {
        let v = json!({"s": "a\nb\t\"c\""});
        assert_eq!(canonical_json(&v), r#"{"s":"a\nb\t\"c\""}"#);
    }

    #[test]
    fn hash_is_sha256_of_canonical_bytes() {
        let v = json!({"name": "Aria", "role": "Pilot"});
        let expected = sha256_hex(canonical_json(&v).as_bytes());
        assert_eq!(payload_hash(&v), expected);
        assert_eq!(expected.len(), 64);
    }

    #[test]
    fn hash_independent_of_construction_order() {
        let a = json!({"name": "Aria", "role": "Pilot"});
        let mut b = serde_json::Map::new();
        b.insert("role".into(), json!("Pilot"));
        b.insert("name".into(), json!("Aria"));
        assert_eq!(payload_hash(&a), payload_hash(&Value::Object(b)));
    }

    #[test]
    fn canonical_is_idempotent() {
        let v = json!({"b": [1, {"d": null, "c": true}], "a": "x"});
        let once = canonical_json(&v);
        let reparsed: Value = serde_json::from_str(&once).unwrap();
        assert_eq!(canonical_json(&reparsed), once);
    }

    fn arb_json(depth: u32) -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-zA-Z0-9 /\\.\"\n]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(depth, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_canonical_roundtrip_fixpoint(v in arb_json(3)) {
            let once = canonical_json(&v);
            let reparsed: Value = serde_json::from_str(&once).unwrap();
            prop_assert_eq!(canonical_json(&reparsed), once);
        }

        #[test]
        fn prop_canonical_parses_back_to_equal_value(v in arb_json(3)) {
            let reparsed: Value = serde_json::from_str(&canonical_json(&v)).unwrap();
            prop_assert_eq!(reparsed, v);
        }
    }
}
