// SPDX-License-Identifier: MIT OR Apache-2.0
//! The repository core.
//!
//! `BrainRepository` exclusively owns the on-disk brain files and the
//! in-memory document cache. Every other component reads and mutates
//! brain state through its methods; nothing else touches the files.

use crate::locator::PathLocator;
use avn_core::{
    BrainDocument, EngineError, EventBus, canonical_json, normalize_config_key, normalize_slug,
    sha256_hex,
};
use chrono::Utc;
use fs2::FileExt;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Slug of the process-wide system brain, always mounted.
pub const SYSTEM_BRAIN: &str = "system";

struct RepoState {
    documents: BTreeMap<String, BrainDocument>,
    active: Option<String>,
}

/// Owner of brain files: CRUD, versioning, config, and auth substate.
pub struct BrainRepository {
    locator: PathLocator,
    bus: Arc<EventBus>,
    state: Mutex<RepoState>,
}

impl BrainRepository {
    /// Build a repository over `locator`, publishing storage events on
    /// `bus`.
    #[must_use]
    pub fn new(locator: PathLocator, bus: Arc<EventBus>) -> Self {
        Self {
            locator,
            bus,
            state: Mutex::new(RepoState {
                documents: BTreeMap::new(),
                active: None,
            }),
        }
    }

    /// The filesystem layout this repository operates on.
    #[must_use]
    pub fn locator(&self) -> &PathLocator {
        &self.locator
    }

    pub(crate) fn brain_path(&self, slug: &str) -> PathBuf {
        if slug == SYSTEM_BRAIN {
            self.locator.system_brain_path()
        } else {
            self.locator.user_brain_path(slug)
        }
    }

    /// Whether a brain file exists on disk.
    #[must_use]
    pub fn brain_exists(&self, slug: &str) -> bool {
        self.brain_path(slug).is_file()
    }

    // -----------------------------------------------------------------------
    // Brain lifecycle
    // -----------------------------------------------------------------------

    /// Create the system brain if missing. Returns `true` when created.
    ///
    /// # Errors
    ///
    /// Propagates `storage` failures from the write protocol.
    pub fn ensure_system_brain(&self) -> Result<bool, EngineError> {
        if self.brain_exists(SYSTEM_BRAIN) {
            return Ok(false);
        }
        let doc = BrainDocument::new(SYSTEM_BRAIN);
        self.store_new(SYSTEM_BRAIN, doc)?;
        Ok(true)
    }

    /// Create a user brain.
    ///
    /// # Errors
    ///
    /// `invalid_argument` for a bad slug, `conflict` when the brain
    /// already exists, `storage` on write failure.
    pub fn create_brain(&self, slug: &str) -> Result<(), EngineError> {
        let slug = normalize_slug(slug)?;
        if slug == SYSTEM_BRAIN {
            return Err(EngineError::conflict("'system' is reserved"));
        }
        if self.brain_exists(&slug) {
            return Err(EngineError::conflict(format!("brain '{slug}' already exists")));
        }
        self.store_new(&slug, BrainDocument::new(&slug))
    }

    /// Create a user brain when missing; no-op otherwise.
    ///
    /// # Errors
    ///
    /// `invalid_argument` for a bad slug, `storage` on write failure.
    pub fn ensure_brain(&self, slug: &str) -> Result<(), EngineError> {
        let slug = normalize_slug(slug)?;
        if !self.brain_exists(&slug) {
            self.store_new(&slug, BrainDocument::new(&slug))?;
        }
        Ok(())
    }

    /// Select the active user brain.
    ///
    /// # Errors
    ///
    /// `not_found` when the brain does not exist.
    pub fn set_active_brain(&self, slug: &str) -> Result<(), EngineError> {
        let slug = normalize_slug(slug)?;
        if slug == SYSTEM_BRAIN {
            return Err(EngineError::invalid_argument(
                "the system brain cannot be the active user brain",
            ));
        }
        if !self.brain_exists(&slug) {
            return Err(EngineError::not_found(format!("brain '{slug}' not found")));
        }
        let mut state = self.lock_state();
        state.active = Some(slug);
        Ok(())
    }

    /// Ensure `default` exists and select it if nothing is active yet.
    ///
    /// # Errors
    ///
    /// Propagates [`BrainRepository::ensure_brain`] failures.
    pub fn ensure_active_brain(&self, default: &str) -> Result<String, EngineError> {
        self.ensure_brain(default)?;
        let mut state = self.lock_state();
        if state.active.is_none() {
            state.active = Some(normalize_slug(default)?);
        }
        Ok(state.active.clone().unwrap_or_else(|| default.to_string()))
    }

    /// The currently active user brain.
    ///
    /// # Errors
    ///
    /// `not_found` when no user brain is mounted.
    pub fn active_brain_slug(&self) -> Result<String, EngineError> {
        self.lock_state()
            .active
            .clone()
            .ok_or_else(|| EngineError::not_found("no active brain mounted"))
    }

    /// User brain slugs present on disk, sorted.
    #[must_use]
    pub fn list_brains(&self) -> Vec<String> {
        let mut slugs = Vec::new();
        if let Ok(entries) = fs::read_dir(self.locator.user_brains_dir()) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("brain") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        slugs.push(stem.to_string());
                    }
                }
            }
        }
        slugs.sort();
        slugs
    }

    // -----------------------------------------------------------------------
    // Document access
    // -----------------------------------------------------------------------

    /// Run `f` against a read-only view of the brain document.
    ///
    /// # Errors
    ///
    /// `not_found` for an unknown brain; propagates `f`'s error.
    pub fn with_brain<R>(
        &self,
        slug: &str,
        f: impl FnOnce(&BrainDocument) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let mut state = self.lock_state();
        let doc = Self::cached(&self.brain_path(slug), &mut state, slug)?;
        f(doc)
    }

    /// Apply a mutation under the atomic commit protocol.
    ///
    /// The mutation runs on a copy; only after the write protocol
    /// succeeds does the copy replace the cached document. A failed
    /// write leaves memory and disk untouched.
    ///
    /// # Errors
    ///
    /// `not_found` for an unknown brain; `storage` when the protocol
    /// fails; propagates `f`'s error.
    pub fn mutate_brain<R>(
        &self,
        slug: &str,
        f: impl FnOnce(&mut BrainDocument) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let mut state = self.lock_state();
        let mut doc = Self::cached(&self.brain_path(slug), &mut state, slug)?.clone();
        let result = f(&mut doc)?;
        self.write_document(slug, &doc)?;
        state.documents.insert(slug.to_string(), doc);
        Ok(result)
    }

    /// Drop the cached document so the next access re-reads from disk.
    pub fn invalidate(&self, slug: &str) {
        self.lock_state().documents.remove(slug);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RepoState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn cached<'a>(
        path: &PathBuf,
        state: &'a mut RepoState,
        slug: &str,
    ) -> Result<&'a mut BrainDocument, EngineError> {
        if !state.documents.contains_key(slug) {
            let doc = Self::read_document(path, slug)?;
            state.documents.insert(slug.to_string(), doc);
        }
        Ok(state
            .documents
            .get_mut(slug)
            .unwrap_or_else(|| unreachable!("inserted above")))
    }

    fn read_document(path: &PathBuf, slug: &str) -> Result<BrainDocument, EngineError> {
        if !path.is_file() {
            return Err(EngineError::not_found(format!("brain '{slug}' not found")));
        }
        // A reader racing a writer may see a torn file once; re-read
        // before giving up.
        for attempt in 0..2 {
            let raw = fs::read(path).map_err(|e| EngineError::io("read brain", &e))?;
            match serde_json::from_slice::<BrainDocument>(&raw) {
                Ok(doc) => return Ok(doc),
                Err(err) if attempt == 0 => {
                    debug!(brain = slug, error = %err, "brain parse failed, re-reading");
                }
                Err(err) => {
                    return Err(EngineError::storage(format!(
                        "brain '{slug}' is unreadable: {err}"
                    )));
                }
            }
        }
        unreachable!("loop returns on second attempt")
    }

    fn store_new(&self, slug: &str, doc: BrainDocument) -> Result<(), EngineError> {
        let mut state = self.lock_state();
        self.write_document(slug, &doc)?;
        state.documents.insert(slug.to_string(), doc);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Atomic commit protocol
    // -----------------------------------------------------------------------

    fn write_document(&self, slug: &str, doc: &BrainDocument) -> Result<String, EngineError> {
        let path = self.brain_path(slug);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io("ensure brain dir", &e))?;
        }

        let value = serde_json::to_value(doc)
            .map_err(|e| EngineError::internal(format!("brain serialization: {e}")))?;
        let canonical = canonical_json(&value);
        let expected = sha256_hex(canonical.as_bytes());

        let lock_path = path.with_extension("brain.lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| EngineError::io("open brain lock", &e))?;
        lock_file
            .lock_exclusive()
            .map_err(|e| EngineError::io("acquire brain lock", &e))?;

        let tmp = path.with_extension("brain.tmp");
        // Garbage left by an interrupted writer; the rename protocol
        // guarantees the target itself is never partial.
        if tmp.exists() {
            let _ = fs::remove_file(&tmp);
        }

        let mut outcome = Err(EngineError::storage("write not attempted"));
        for attempt in 0..2 {
            outcome = self.write_and_verify(&tmp, canonical.as_bytes(), &expected);
            match &outcome {
                Ok(()) => break,
                Err(err) => {
                    warn!(brain = slug, attempt, error = %err, "integrity check failed");
                    self.bus.emit(
                        "storage.integrity_failed",
                        &json!({"brain": slug, "attempt": attempt, "expected": expected}),
                    );
                }
            }
        }
        if let Err(err) = outcome {
            let _ = fs2::FileExt::unlock(&lock_file);
            return Err(EngineError::storage(format!(
                "brain '{slug}' failed integrity verification twice: {err}"
            ))
            .with_reason("integrity_failed"));
        }

        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs2::FileExt::unlock(&lock_file);
            EngineError::io("commit brain", &e)
        })?;
        let _ = fs2::FileExt::unlock(&lock_file);

        self.bus.emit(
            "storage.write_completed",
            &json!({
                "brain": slug,
                "hash": expected,
                "ts": Utc::now().to_rfc3339(),
            }),
        );
        Ok(expected)
    }

    fn write_and_verify(
        &self,
        tmp: &PathBuf,
        bytes: &[u8],
        expected: &str,
    ) -> Result<(), EngineError> {
        {
            use std::io::Write;
            let mut file =
                fs::File::create(tmp).map_err(|e| EngineError::io("create brain tmp", &e))?;
            file.write_all(bytes)
                .map_err(|e| EngineError::io("write brain tmp", &e))?;
            file.sync_all()
                .map_err(|e| EngineError::io("fsync brain tmp", &e))?;
        }
        let written = fs::read(tmp).map_err(|e| EngineError::io("verify brain tmp", &e))?;
        let actual = sha256_hex(&written);
        if actual != expected {
            return Err(EngineError::storage(format!(
                "verification hash mismatch: expected {expected}, got {actual}"
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Config
    // -----------------------------------------------------------------------

    fn config_target(&self, system_scope: bool) -> Result<String, EngineError> {
        if system_scope {
            Ok(SYSTEM_BRAIN.to_string())
        } else {
            self.active_brain_slug()
        }
    }

    /// The full config map of the selected scope.
    ///
    /// # Errors
    ///
    /// `not_found` when the scoped brain is missing.
    pub fn list_config(
        &self,
        system_scope: bool,
    ) -> Result<BTreeMap<String, Value>, EngineError> {
        let slug = self.config_target(system_scope)?;
        self.with_brain(&slug, |doc| Ok(doc.config.clone()))
    }

    /// One config value, or `Null` when unset.
    ///
    /// # Errors
    ///
    /// `invalid_argument` for a bad key; `not_found` for a missing brain.
    pub fn get_config_value(&self, key: &str, system_scope: bool) -> Result<Value, EngineError> {
        let key = normalize_config_key(key)?;
        let slug = self.config_target(system_scope)?;
        self.with_brain(&slug, |doc| {
            Ok(doc.config.get(&key).cloned().unwrap_or(Value::Null))
        })
    }

    /// Set a config value.
    ///
    /// # Errors
    ///
    /// `invalid_argument` for a bad key; `storage` on write failure.
    pub fn set_config_value(
        &self,
        key: &str,
        value: Value,
        system_scope: bool,
    ) -> Result<(), EngineError> {
        let key = normalize_config_key(key)?;
        let slug = self.config_target(system_scope)?;
        self.mutate_brain(&slug, |doc| {
            doc.config.insert(key, value);
            Ok(())
        })
    }

    /// Set a config value only when the key has never been set.
    ///
    /// # Errors
    ///
    /// `invalid_argument` for a bad key; `storage` on write failure.
    pub fn seed_config_value(
        &self,
        key: &str,
        value: Value,
        system_scope: bool,
    ) -> Result<(), EngineError> {
        let key = normalize_config_key(key)?;
        let slug = self.config_target(system_scope)?;
        let present = self.with_brain(&slug, |doc| Ok(doc.config.contains_key(&key)))?;
        if present {
            return Ok(());
        }
        self.mutate_brain(&slug, |doc| {
            doc.config.insert(key, value);
            Ok(())
        })
    }

    /// Delete a config key. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// `invalid_argument` for a bad key; `storage` on write failure.
    pub fn delete_config_value(
        &self,
        key: &str,
        system_scope: bool,
    ) -> Result<bool, EngineError> {
        let key = normalize_config_key(key)?;
        let slug = self.config_target(system_scope)?;
        self.mutate_brain(&slug, |doc| Ok(doc.config.remove(&key).is_some()))
    }
}
