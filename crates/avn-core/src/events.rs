// SPDX-License-Identifier: MIT OR Apache-2.0
//! Synchronous named-event fan-out.
//!
//! Components publish telemetry (`storage.write_completed`,
//! `command.executed`, `security.lockdown`, …) through a shared bus.
//! Delivery is synchronous and in subscription order. Handlers may run
//! while the emitting component holds its own locks, so they must not
//! call back into it.

use serde_json::Value;
use std::sync::RwLock;

type Handler = Box<dyn Fn(&str, &Value) + Send + Sync>;

struct Subscription {
    pattern: String,
    handler: Handler,
}

/// Named-event bus with wildcard suffix matching.
///
/// A pattern is either an exact event name, a prefix ending in `*`
/// (`storage.*` matches `storage.write_completed`), or `*` for
/// everything.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events matching `pattern`.
    pub fn subscribe<F>(&self, pattern: impl Into<String>, handler: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        subs.push(Subscription {
            pattern: pattern.into(),
            handler: Box::new(handler),
        });
    }

    /// Deliver `payload` to every matching subscriber, synchronously.
    pub fn emit(&self, name: &str, payload: &Value) {
        let subs = self
            .subscriptions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for sub in subs.iter() {
            if pattern_matches(&sub.pattern, name) {
                (sub.handler)(name, payload);
            }
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return name.starts_with(prefix);
    }
    pattern == name
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn exact_match_delivers() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.subscribe("storage.write_completed", move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit("storage.write_completed", &json!({}));
        bus.emit("storage.integrity_failed", &json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wildcard_suffix_matches_prefix() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.subscribe("command.*", move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit("command.executed", &json!({}));
        bus.emit("command.failed", &json!({}));
        bus.emit("storage.write_completed", &json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn star_matches_everything() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.subscribe("*", move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit("a", &json!({}));
        bus.emit("b.c", &json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let o = order.clone();
            bus.subscribe("x", move |_, _| o.lock().unwrap().push(tag));
        }
        bus.emit("x", &json!({}));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn handler_sees_name_and_payload() {
        let bus = EventBus::new();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let s = seen.clone();
        bus.subscribe("security.*", move |name, payload| {
            *s.lock().unwrap() = Some((name.to_string(), payload.clone()));
        });
        bus.emit("security.lockdown", &json!({"duration": 600}));
        let guard = seen.lock().unwrap();
        let (name, payload) = guard.as_ref().unwrap();
        assert_eq!(name, "security.lockdown");
        assert_eq!(payload["duration"], 600);
    }
}
