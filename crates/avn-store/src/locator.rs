// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic filesystem layout.
//!
//! Every path the engine touches derives from one configured root. The
//! locator never reads or writes brain content; it only answers "where"
//! and ensures directories exist.

use avn_core::EngineError;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolves the on-disk layout under a configured root.
#[derive(Debug, Clone)]
pub struct PathLocator {
    root: PathBuf,
    backups: PathBuf,
    exports: PathBuf,
    logs: PathBuf,
}

impl PathLocator {
    /// Build a locator. Optional overrides replace the derived
    /// backups / exports / logs directories.
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        backups: Option<PathBuf>,
        exports: Option<PathBuf>,
        logs: Option<PathBuf>,
    ) -> Self {
        let root = root.into();
        Self {
            backups: backups.unwrap_or_else(|| root.join("backups")),
            exports: exports.unwrap_or_else(|| root.join("exports")),
            logs: logs.unwrap_or_else(|| root.join("logs")),
            root,
        }
    }

    /// The configured root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The system brain file.
    #[must_use]
    pub fn system_brain_path(&self) -> PathBuf {
        self.root.join("system").join("system.brain")
    }

    /// Directory holding user brain files.
    #[must_use]
    pub fn user_brains_dir(&self) -> PathBuf {
        self.root.join("brains")
    }

    /// A user brain file.
    #[must_use]
    pub fn user_brain_path(&self, slug: &str) -> PathBuf {
        self.user_brains_dir().join(format!("{slug}.brain"))
    }

    /// Backups directory.
    #[must_use]
    pub fn backups_dir(&self) -> &Path {
        &self.backups
    }

    /// Exports directory.
    #[must_use]
    pub fn exports_dir(&self) -> &Path {
        &self.exports
    }

    /// Logs directory.
    #[must_use]
    pub fn logs_dir(&self) -> &Path {
        &self.logs
    }

    /// Cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// System module manifests.
    #[must_use]
    pub fn modules_system_dir(&self) -> PathBuf {
        self.root.join("modules").join("system")
    }

    /// User module manifests.
    #[must_use]
    pub fn modules_user_dir(&self) -> PathBuf {
        self.root.join("modules").join("user")
    }

    /// Create every directory of the layout, idempotently.
    ///
    /// # Errors
    ///
    /// Returns a `storage` error ("filesystem_error") on unrecoverable
    /// I/O.
    pub fn ensure_layout(&self) -> Result<(), EngineError> {
        let dirs = [
            self.root.clone(),
            self.root.join("system"),
            self.user_brains_dir(),
            self.backups.clone(),
            self.exports.clone(),
            self.logs.clone(),
            self.cache_dir(),
            self.modules_system_dir(),
            self.modules_user_dir(),
        ];
        for dir in dirs {
            fs::create_dir_all(&dir).map_err(|e| {
                EngineError::io("ensure layout", &e)
                    .with_reason("filesystem_error")
                    .with_context("dir", dir.display().to_string())
            })?;
        }
        Ok(())
    }
}
