// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! avn-cache
#![deny(unsafe_code)]
#![warn(missing_docs)]

use avn_core::{EngineError, sha256_hex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// One cache entry as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    value: Value,
    expires_at: Option<i64>,
    tags: Vec<String>,
}

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

/// File-backed TTL cache with tag-based flushes.
///
/// Entries live at `<dir>/<sha256(key)>.json`; writes are atomic
/// (tmp + rename); expiry is enforced lazily on read. When disabled the
/// cache is a null store: `get` misses, `put` is a no-op.
pub struct Cache {
    dir: PathBuf,
    enabled: bool,
    clock: Clock,
}

impl Cache {
    /// Create a cache over `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            enabled,
            clock: Box::new(|| chrono_now()),
        }
    }

    /// Replace the clock (tests drive expiry deterministically).
    #[must_use]
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    /// Whether this cache persists anything.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sha256_hex(key.as_bytes())))
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    fn read_entry(&self, path: &Path) -> Option<CacheEntry> {
        // Readers tolerate missing or torn files: treat as not present.
        let raw = fs::read(path).ok()?;
        match serde_json::from_slice::<CacheEntry>(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "dropping unreadable cache entry");
                let _ = fs::remove_file(path);
                None
            }
        }
    }

    fn load_live(&self, key: &str) -> Option<CacheEntry> {
        let path = self.entry_path(key);
        let entry = self.read_entry(&path)?;
        if let Some(expires_at) = entry.expires_at {
            if self.now() >= expires_at {
                let _ = fs::remove_file(&path);
                return None;
            }
        }
        Some(entry)
    }

    /// Fetch a value; expired entries are deleted and reported as misses.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        self.load_live(key).map(|e| e.value)
    }

    /// Store a value with an optional TTL and tags.
    ///
    /// # Errors
    ///
    /// Returns `storage` when the entry cannot be written.
    pub fn put(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        tags: &[&str],
    ) -> Result<(), EngineError> {
        if !self.enabled {
            return Ok(());
        }
        let expires_at = ttl.map(|d| self.now() + d.as_secs() as i64);
        self.write_entry(&CacheEntry {
            key: key.to_string(),
            value,
            expires_at,
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
        })
    }

    /// Remove a single key.
    pub fn forget(&self, key: &str) {
        let _ = fs::remove_file(self.entry_path(key));
    }

    /// Remove entries. With tags, only entries carrying at least one of
    /// them; without, everything. Returns the number removed.
    #[must_use]
    pub fn flush(&self, tags: Option<&[&str]>) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let keep = match tags {
                None => false,
                Some(wanted) => match self.read_entry(&path) {
                    Some(cached) => !cached.tags.iter().any(|t| wanted.contains(&t.as_str())),
                    // read_entry already dropped the file.
                    None => continue,
                },
            };
            if !keep && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Increment a windowed counter, creating it with `ttl` on first use.
    ///
    /// The expiry set at creation is preserved across increments so the
    /// counter dies with its window. Returns the post-increment count.
    ///
    /// # Errors
    ///
    /// Returns `storage` when the counter cannot be written.
    pub fn increment(
        &self,
        key: &str,
        ttl: Duration,
        tags: &[&str],
    ) -> Result<u64, EngineError> {
        if !self.enabled {
            return Ok(1);
        }
        let (count, expires_at) = match self.load_live(key) {
            Some(entry) => (
                entry.value.as_u64().unwrap_or(0) + 1,
                entry.expires_at,
            ),
            None => (1, Some(self.now() + ttl.as_secs() as i64)),
        };
        self.write_entry(&CacheEntry {
            key: key.to_string(),
            value: Value::from(count),
            expires_at,
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
        })?;
        Ok(count)
    }

    /// Seconds until `key` expires, when it exists and has a TTL.
    #[must_use]
    pub fn ttl_remaining(&self, key: &str) -> Option<i64> {
        let entry = self.load_live(key)?;
        entry.expires_at.map(|at| (at - self.now()).max(0))
    }

    fn write_entry(&self, entry: &CacheEntry) -> Result<(), EngineError> {
        fs::create_dir_all(&self.dir).map_err(|e| EngineError::io("cache mkdir", &e))?;
        let path = self.entry_path(&entry.key);
        let tmp = path.with_extension("json.tmp");
        let bytes =
            serde_json::to_vec(entry).map_err(|e| EngineError::storage(e.to_string()))?;
        fs::write(&tmp, bytes).map_err(|e| EngineError::io("cache write", &e))?;
        fs::rename(&tmp, &path).map_err(|e| EngineError::io("cache rename", &e))?;
        Ok(())
    }
}

fn chrono_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn cache_at(dir: &Path, start: i64) -> (Cache, Arc<AtomicI64>) {
        let now = Arc::new(AtomicI64::new(start));
        let handle = now.clone();
        let cache =
            Cache::new(dir, true).with_clock(move || handle.load(Ordering::SeqCst));
        (cache, now)
    }

    #[test]
    fn put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_at(dir.path(), 1_000);
        cache
            .put("greeting", json!({"hello": "world"}), None, &[])
            .unwrap();
        assert_eq!(cache.get("greeting"), Some(json!({"hello": "world"})));
    }

    #[test]
    fn expired_entries_are_lazily_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, now) = cache_at(dir.path(), 1_000);
        cache
            .put("temp", json!(1), Some(Duration::from_secs(60)), &[])
            .unwrap();
        assert_eq!(cache.get("temp"), Some(json!(1)));

        now.store(1_061, Ordering::SeqCst);
        assert_eq!(cache.get("temp"), None);
        // The file is gone, not just hidden.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn forget_removes_single_key() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_at(dir.path(), 0);
        cache.put("a", json!(1), None, &[]).unwrap();
        cache.put("b", json!(2), None, &[]).unwrap();
        cache.forget("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(json!(2)));
    }

    #[test]
    fn flush_by_tag_is_selective() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_at(dir.path(), 0);
        cache.put("s1", json!(1), None, &["security"]).unwrap();
        cache.put("s2", json!(2), None, &["security", "rate"]).unwrap();
        cache.put("e1", json!(3), None, &["export"]).unwrap();

        let removed = cache.flush(Some(&["security"]));
        assert_eq!(removed, 2);
        assert_eq!(cache.get("s1"), None);
        assert_eq!(cache.get("e1"), Some(json!(3)));
    }

    #[test]
    fn flush_all_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_at(dir.path(), 0);
        cache.put("a", json!(1), None, &[]).unwrap();
        cache.put("b", json!(2), None, &["t"]).unwrap();
        assert_eq!(cache.flush(None), 2);
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn increment_counts_within_window() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_at(dir.path(), 100);
        for expected in 1..=3 {
            let got = cache
                .increment("counter", Duration::from_secs(60), &["security"])
                .unwrap();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn increment_preserves_original_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, now) = cache_at(dir.path(), 100);
        cache
            .increment("counter", Duration::from_secs(60), &[])
            .unwrap();
        now.store(150, Ordering::SeqCst);
        cache
            .increment("counter", Duration::from_secs(60), &[])
            .unwrap();
        // Still the first window's expiry: dead at 160, not 210.
        now.store(161, Ordering::SeqCst);
        assert_eq!(cache.get("counter"), None);
    }

    #[test]
    fn counter_resets_after_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, now) = cache_at(dir.path(), 100);
        cache.increment("c", Duration::from_secs(60), &[]).unwrap();
        cache.increment("c", Duration::from_secs(60), &[]).unwrap();
        now.store(200, Ordering::SeqCst);
        assert_eq!(cache.increment("c", Duration::from_secs(60), &[]).unwrap(), 1);
    }

    #[test]
    fn ttl_remaining_reports_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, now) = cache_at(dir.path(), 100);
        cache
            .put("t", json!(1), Some(Duration::from_secs(300)), &[])
            .unwrap();
        assert_eq!(cache.ttl_remaining("t"), Some(300));
        now.store(250, Ordering::SeqCst);
        assert_eq!(cache.ttl_remaining("t"), Some(150));
        assert_eq!(cache.ttl_remaining("missing"), None);
    }

    #[test]
    fn disabled_cache_is_null_store() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path(), false);
        cache.put("k", json!(1), None, &[]).unwrap();
        assert_eq!(cache.get("k"), None);
        assert!(!cache.is_enabled());
    }

    #[test]
    fn corrupt_entry_treated_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_at(dir.path(), 0);
        cache.put("k", json!(1), None, &[]).unwrap();
        let path = dir.path().join(format!("{}.json", sha256_hex(b"k")));
        fs::write(&path, b"{torn").unwrap();
        assert_eq!(cache.get("k"), None);
        assert!(!path.exists());
    }
}
