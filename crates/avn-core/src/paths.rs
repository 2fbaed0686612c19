// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dotted-path access into JSON payloads.
//!
//! Paths look like `meta.tags[2].label`: segments split on `.`, array
//! elements addressed with `[n]`. Used by the filter engine, the
//! resolver, and export transforms.

use serde_json::{Map, Value};

/// One parsed path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object key.
    Key(String),
    /// Array index.
    Index(usize),
}

/// Parse a dotted path into segments. Empty input yields no segments.
#[must_use]
pub fn parse(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        let mut rest = part;
        // Key portion before any `[n]` suffixes.
        if let Some(bracket) = rest.find('[') {
            let (key, indices) = rest.split_at(bracket);
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }
            rest = indices;
            while let Some(stripped) = rest.strip_prefix('[') {
                match stripped.find(']') {
                    Some(end) => {
                        if let Ok(idx) = stripped[..end].parse::<usize>() {
                            segments.push(Segment::Index(idx));
                        }
                        rest = &stripped[end + 1..];
                    }
                    None => break,
                }
            }
        } else {
            segments.push(Segment::Key(rest.to_string()));
        }
    }
    segments
}

/// Resolve `path` inside `value`, returning the referenced node.
#[must_use]
pub fn get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in parse(path) {
        current = match (&segment, current) {
            (Segment::Key(k), Value::Object(map)) => map.get(k)?,
            (Segment::Index(i), Value::Array(items)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Build a new value containing only the listed paths (deep
/// project-by-path). Paths that do not resolve are skipped.
#[must_use]
pub fn project(value: &Value, paths: &[String]) -> Value {
    let mut out = Value::Object(Map::new());
    for path in paths {
        if let Some(found) = get(value, path) {
            insert_at(&mut out, &parse(path), found.clone());
        }
    }
    out
}

/// Delete the listed paths from `value` in place (deep delete-by-path).
pub fn discard(value: &mut Value, paths: &[String]) {
    for path in paths {
        let segments = parse(path);
        if segments.is_empty() {
            continue;
        }
        remove_at(value, &segments);
    }
}

fn insert_at(target: &mut Value, segments: &[Segment], leaf: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *target = leaf;
        return;
    };
    match head {
        Segment::Key(k) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(map) = target {
                let slot = map.entry(k.clone()).or_insert(Value::Null);
                insert_at(slot, rest, leaf);
            }
        }
        Segment::Index(i) => {
            if !target.is_array() {
                *target = Value::Array(Vec::new());
            }
            if let Value::Array(items) = target {
                while items.len() <= *i {
                    items.push(Value::Null);
                }
                insert_at(&mut items[*i], rest, leaf);
            }
        }
    }
}

fn remove_at(target: &mut Value, segments: &[Segment]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        match (head, target) {
            (Segment::Key(k), Value::Object(map)) => {
                map.remove(k);
            }
            (Segment::Index(i), Value::Array(items)) => {
                if *i < items.len() {
                    items.remove(*i);
                }
            }
            _ => {}
        }
        return;
    }
    match (head, target) {
        (Segment::Key(k), Value::Object(map)) => {
            if let Some(next) = map.get_mut(k) {
                remove_at(next, rest);
            }
        }
        (Segment::Index(i), Value::Array(items)) => {
            if let Some(next) = items.get_mut(*i) {
                remove_at(next, rest);
            }
        }
        _ => {}
    }
}
