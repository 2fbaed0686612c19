// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deep merge of JSON payloads.
//!
//! Partial-update idiom: objects merge recursively, any other incoming
//! value replaces, and an incoming empty string deletes the key.

use serde_json::Value;

/// Merge `incoming` onto `base` in place.
///
/// # Examples
///
/// ```
/// use serde_json::json;
///
/// let mut base = json!({"name": "Aria", "role": "Pilot", "callsign": "AR-1"});
/// avn_core::merge::deep_merge(&mut base, &json!({"role": "Commander", "callsign": ""}));
/// assert_eq!(base, json!({"name": "Aria", "role": "Commander"}));
/// ```
pub fn deep_merge(base: &mut Value, incoming: &Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                if value.as_str() == Some("") {
                    base_map.remove(key);
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(slot) if slot.is_object() && value.is_object() => {
                        deep_merge(slot, value);
                    }
                    Some(slot) => *slot = value.clone(),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, _) => *base_slot = incoming.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn disjoint_keys_union() {
        let mut base = json!({"a": 1});
        deep_merge(&mut base, &json!({"b": 2}));
        assert_eq!(base, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn nested_objects_merge_recursively() {
        let mut base = json!({"meta": {"a": 1, "b": 2}});
        deep_merge(&mut base, &json!({"meta": {"b": 3, "c": 4}}));
        assert_eq!(base, json!({"meta": {"a": 1, "b": 3, "c": 4}}));
    }

    #[test]
    fn empty_string_deletes_key() {
        let mut base = json!({"role": "Pilot", "callsign": "AR-1"});
        deep_merge(&mut base, &json!({"callsign": ""}));
        assert_eq!(base, json!({"role": "Pilot"}));
    }

    #[test]
    fn empty_string_for_absent_key_is_noop() {
        let mut base = json!({"a": 1});
        deep_merge(&mut base, &json!({"ghost": ""}));
        assert_eq!(base, json!({"a": 1}));
    }

    #[test]
    fn arrays_replace_wholesale() {
        let mut base = json!({"tags": ["a", "b"]});
        deep_merge(&mut base, &json!({"tags": ["c"]}));
        assert_eq!(base, json!({"tags": ["c"]}));
    }

    #[test]
    fn scalar_incoming_replaces_object_base() {
        let mut base = json!({"meta": {"a": 1}});
        deep_merge(&mut base, &json!({"meta": 7}));
        assert_eq!(base, json!({"meta": 7}));
    }

    #[test]
    fn non_object_base_is_replaced_entirely() {
        let mut base = json!([1, 2]);
        deep_merge(&mut base, &json!({"a": 1}));
        assert_eq!(base, json!({"a": 1}));
    }
}
