// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! avn-config
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// The admin secret does not satisfy the `_…` / length ≥ 8 rule and
    /// will be ignored.
    AdminSecretIgnored {
        /// Why the secret was rejected.
        reason: String,
    },
    /// A limit value is suspicious (zero or very large).
    SuspiciousLimit {
        /// Field name.
        field: String,
        /// Offending value.
        value: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::AdminSecretIgnored { reason } => {
                write!(f, "admin_secret ignored: {reason}")
            }
            ConfigWarning::SuspiciousLimit { field, value } => {
                write!(f, "suspicious value for '{field}': {value}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Security defaults seeded into the system brain at bootstrap.
///
/// The running engine reads `security.*` from the system brain config, so
/// `config set security.rate_limit 2` takes effect without a restart;
/// these values only apply when a key has never been set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SecurityDefaults {
    /// Master switch for the security subsystem.
    pub active: bool,
    /// Allowed requests per client per 60-second window.
    pub rate_limit: u32,
    /// Allowed aggregate requests per 60-second window.
    pub global_limit: u32,
    /// Client block duration in seconds after a rate breach.
    pub block_duration: u64,
    /// Global lockdown duration in seconds after a global breach.
    pub ddos_lockdown: u64,
    /// Failed attempts before a client is blocked.
    pub failed_limit: u32,
    /// Block duration in seconds after too many failures.
    pub failed_block: u64,
}

impl Default for SecurityDefaults {
    fn default() -> Self {
        Self {
            active: true,
            rate_limit: 60,
            global_limit: 600,
            block_duration: 300,
            ddos_lockdown: 600,
            failed_limit: 5,
            failed_block: 900,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Storage root; every deterministic path derives from here.
    pub root: PathBuf,

    /// Admin secret; must begin with `_` and be at least 8 chars, else it
    /// is ignored with a warning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_secret: Option<String>,

    /// User brain selected at bootstrap.
    pub default_brain: String,

    /// Override for the backups directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backups_path: Option<PathBuf>,

    /// Override for the exports directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exports_path: Option<PathBuf>,

    /// Override for the logs directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,

    /// Length of generated API keys.
    pub api_key_length: usize,

    /// Include rendered export bundles in command responses.
    pub response_exports: bool,

    /// Write export bundles to the exports directory.
    pub save_exports: bool,

    /// Log level override (e.g. `"debug"`, `"info"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Security defaults seeded at bootstrap.
    pub security: SecurityDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./aaviondb"),
            admin_secret: None,
            default_brain: "default".into(),
            backups_path: None,
            exports_path: None,
            log_path: None,
            api_key_length: 40,
            response_exports: true,
            save_exports: true,
            log_level: None,
            security: SecurityDefaults::default(),
        }
    }
}

/// Minimum accepted admin secret length.
pub const ADMIN_SECRET_MIN_LEN: usize = 8;

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::FileNotFound`] when the path does not exist,
    /// [`ConfigError::ParseError`] on invalid TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })
    }

    /// Validate semantics; hard failures as errors, advisory issues as
    /// warnings. An unusable admin secret is cleared, not fatal.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationError`] when a value makes the engine
    /// inoperable (empty default brain, zero key length).
    pub fn validate(&mut self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        if self.default_brain.trim().is_empty() {
            reasons.push("default_brain must not be empty".to_string());
        }
        if self.api_key_length < 16 {
            reasons.push(format!(
                "api_key_length must be at least 16, got {}",
                self.api_key_length
            ));
        }

        if let Some(secret) = &self.admin_secret {
            if !secret.starts_with('_') {
                warnings.push(ConfigWarning::AdminSecretIgnored {
                    reason: "must begin with '_'".into(),
                });
                self.admin_secret = None;
            } else if secret.len() < ADMIN_SECRET_MIN_LEN {
                warnings.push(ConfigWarning::AdminSecretIgnored {
                    reason: format!("must be at least {ADMIN_SECRET_MIN_LEN} characters"),
                });
                self.admin_secret = None;
            }
        }

        if self.security.rate_limit == 0 {
            warnings.push(ConfigWarning::SuspiciousLimit {
                field: "security.rate_limit".into(),
                value: 0,
            });
        }
        if self.security.global_limit == 0 {
            warnings.push(ConfigWarning::SuspiciousLimit {
                field: "security.global_limit".into(),
                value: 0,
            });
        }

        if reasons.is_empty() {
            Ok(warnings)
        } else {
            Err(ConfigError::ValidationError { reasons })
        }
    }
}
