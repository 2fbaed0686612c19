// SPDX-License-Identifier: MIT OR Apache-2.0
//! Declarative entity filters.
//!
//! A filter set is a list of `{type, config}` definitions applied
//! conjunctively to a project's entities. Unknown types are logged at
//! debug level and ignored; the `include_references` type filters
//! nothing but surfaces as a derived directive.

use crate::conditions::stringify;
use avn_core::{Entity, paths};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

/// One filter definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDef {
    /// Filter type tag.
    #[serde(rename = "type")]
    pub filter_type: String,
    /// Type-specific configuration.
    #[serde(default)]
    pub config: Value,
}

impl FilterDef {
    /// Build a definition from a type tag and config.
    #[must_use]
    pub fn new(filter_type: impl Into<String>, config: Value) -> Self {
        Self {
            filter_type: filter_type.into(),
            config,
        }
    }
}

/// Result of a selection pass.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Slugs of entities satisfying every filter.
    pub slugs: Vec<String>,
    /// Derived directives (e.g. `include_references`).
    pub directives: BTreeSet<String>,
}

/// Evaluates selection predicates against entity payloads.
pub struct FilterEngine;

impl FilterEngine {
    /// Select the subset of `entities` satisfying all `filters`.
    #[must_use]
    pub fn select(entities: &[Entity], filters: &[FilterDef]) -> Selection {
        let mut selection = Selection::default();
        for filter in filters {
            if filter.filter_type == "include_references" {
                selection.directives.insert("include_references".into());
            }
        }
        for entity in entities {
            if Self::matches(entity, filters) {
                selection.slugs.push(entity.slug.clone());
            }
        }
        selection
    }

    /// Whether one entity passes every filter.
    #[must_use]
    pub fn matches(entity: &Entity, filters: &[FilterDef]) -> bool {
        let payload = entity
            .active()
            .map(|v| v.payload.clone())
            .unwrap_or(Value::Null);
        filters.iter().all(|f| apply(entity, &payload, f))
    }
}

fn apply(entity: &Entity, payload: &Value, filter: &FilterDef) -> bool {
    let config = &filter.config;
    match filter.filter_type.as_str() {
        "slug_equals" => config_str(config, "value").is_some_and(|v| entity.slug == v),
        "slug_in" => config
            .get("values")
            .and_then(Value::as_array)
            .is_some_and(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|v| entity.slug == v)
            }),
        "parent_contains" => match (config_str(config, "value"), &entity.parent) {
            (Some(needle), Some(parent)) => parent.contains(&needle),
            _ => false,
        },
        "payload_contains" => {
            let Some(path) = config_str(config, "path") else {
                return false;
            };
            let Some(target) = paths::get(payload, &path) else {
                return false;
            };
            match (target, config.get("value")) {
                (Value::String(s), Some(Value::String(needle))) => s.contains(needle.as_str()),
                (Value::Array(items), Some(needle)) => items.contains(needle),
                (found, Some(needle)) => found == needle,
                (_, None) => true,
            }
        }
        "payload_regex" => {
            let (Some(path), Some(pattern)) =
                (config_str(config, "path"), config_str(config, "pattern"))
            else {
                return false;
            };
            let Some(target) = paths::get(payload, &path) else {
                return false;
            };
            Regex::new(&pattern)
                .map(|re| re.is_match(&stringify(target)))
                .unwrap_or(false)
        }
        "payload_numeric" => {
            let (Some(path), Some(op)) = (config_str(config, "path"), config_str(config, "op"))
            else {
                return false;
            };
            let Some(rhs) = config.get("value").and_then(Value::as_f64) else {
                return false;
            };
            let lhs = match paths::get(payload, &path) {
                Some(Value::Number(n)) => n.as_f64(),
                Some(Value::String(s)) => s.parse().ok(),
                _ => None,
            };
            let Some(lhs) = lhs else { return false };
            match op.as_str() {
                "eq" => lhs == rhs,
                "ne" => lhs != rhs,
                "lt" => lhs < rhs,
                "lte" => lhs <= rhs,
                "gt" => lhs > rhs,
                "gte" => lhs >= rhs,
                _ => false,
            }
        }
        "payload_missing" => {
            let Some(path) = config_str(config, "path") else {
                return false;
            };
            matches!(paths::get(payload, &path), None | Some(Value::Null))
        }
        // Directive only; never filters.
        "include_references" => true,
        other => {
            debug!(filter = other, "ignoring unknown filter type");
            true
        }
    }
}

fn config_str(config: &Value, key: &str) -> Option<String> {
    config.get(key).and_then(Value::as_str).map(str::to_string)
}
