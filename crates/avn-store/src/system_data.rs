// SPDX-License-Identifier: MIT OR Apache-2.0
//! Presets, export layouts, and scheduler tasks.
//!
//! All three live in the system brain as plain JSON documents keyed by
//! slug; the export engine and the `cron` command interpret them.

use crate::repository::{BrainRepository, SYSTEM_BRAIN};
use avn_core::{EngineError, normalize_slug};
use serde_json::Value;
use std::collections::BTreeMap;

impl BrainRepository {
    /// Fetch a preset by slug.
    ///
    /// # Errors
    ///
    /// `not_found` for an unknown preset.
    pub fn get_preset(&self, slug: &str) -> Result<Value, EngineError> {
        let slug = normalize_slug(slug)?;
        self.with_brain(SYSTEM_BRAIN, |doc| {
            doc.presets
                .get(&slug)
                .cloned()
                .ok_or_else(|| EngineError::not_found(format!("preset '{slug}' not found")))
        })
    }

    /// Store a preset document.
    ///
    /// # Errors
    ///
    /// `invalid_argument` for a bad slug, `storage` on write failure.
    pub fn put_preset(&self, slug: &str, preset: Value) -> Result<(), EngineError> {
        let slug = normalize_slug(slug)?;
        self.mutate_brain(SYSTEM_BRAIN, |doc| {
            doc.presets.insert(slug, preset);
            Ok(())
        })
    }

    /// All presets by slug.
    ///
    /// # Errors
    ///
    /// `not_found` when the system brain is missing.
    pub fn list_presets(&self) -> Result<BTreeMap<String, Value>, EngineError> {
        self.with_brain(SYSTEM_BRAIN, |doc| Ok(doc.presets.clone()))
    }

    /// Fetch an export layout by slug.
    ///
    /// # Errors
    ///
    /// `not_found` for an unknown layout.
    pub fn get_layout(&self, slug: &str) -> Result<Value, EngineError> {
        let slug = normalize_slug(slug)?;
        self.with_brain(SYSTEM_BRAIN, |doc| {
            doc.export_layouts
                .get(&slug)
                .cloned()
                .ok_or_else(|| EngineError::not_found(format!("layout '{slug}' not found")))
        })
    }

    /// Store an export layout.
    ///
    /// # Errors
    ///
    /// `invalid_argument` for a bad slug, `storage` on write failure.
    pub fn put_layout(&self, slug: &str, layout: Value) -> Result<(), EngineError> {
        let slug = normalize_slug(slug)?;
        self.mutate_brain(SYSTEM_BRAIN, |doc| {
            doc.export_layouts.insert(slug, layout);
            Ok(())
        })
    }

    /// All scheduler task definitions by slug.
    ///
    /// # Errors
    ///
    /// `not_found` when the system brain is missing.
    pub fn list_scheduler_tasks(&self) -> Result<BTreeMap<String, Value>, EngineError> {
        self.with_brain(SYSTEM_BRAIN, |doc| Ok(doc.scheduler_tasks.clone()))
    }

    /// Store a scheduler task definition.
    ///
    /// # Errors
    ///
    /// `invalid_argument` for a bad slug, `storage` on write failure.
    pub fn put_scheduler_task(&self, slug: &str, task: Value) -> Result<(), EngineError> {
        let slug = normalize_slug(slug)?;
        self.mutate_brain(SYSTEM_BRAIN, |doc| {
            doc.scheduler_tasks.insert(slug, task);
            Ok(())
        })
    }

    /// Remove a scheduler task. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// `invalid_argument` for a bad slug, `storage` on write failure.
    pub fn remove_scheduler_task(&self, slug: &str) -> Result<bool, EngineError> {
        let slug = normalize_slug(slug)?;
        self.mutate_brain(SYSTEM_BRAIN, |doc| {
            Ok(doc.scheduler_tasks.remove(&slug).is_some())
        })
    }
}
