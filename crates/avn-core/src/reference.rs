// SPDX-License-Identifier: MIT OR Apache-2.0
//! Version references.
//!
//! A reference selects one version of an entity: `@3` or a bare `3`
//! selects by version number, `#a1b2…` selects by commit hash (full
//! hash, or a unique prefix of at least seven characters). An absent
//! reference means the active version.

use crate::error::EngineError;
use std::fmt;

/// Minimum length accepted for a commit-hash prefix.
pub const MIN_COMMIT_PREFIX: usize = 7;

/// A parsed version reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRef {
    /// Select by monotonic version number (`@3`, `3`).
    Version(u64),
    /// Select by commit hash or unique hash prefix (`#a1b2c3d`).
    Commit(String),
}

impl VersionRef {
    /// Parse a reference string.
    ///
    /// # Errors
    ///
    /// Returns `invalid_argument` for malformed references: empty input,
    /// `@` without digits, `#` with non-hex characters or a prefix
    /// shorter than [`MIN_COMMIT_PREFIX`].
    pub fn parse(input: &str) -> Result<Self, EngineError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(EngineError::invalid_argument("empty version reference"));
        }
        if let Some(number) = trimmed.strip_prefix('@') {
            let version: u64 = number.parse().map_err(|_| {
                EngineError::invalid_argument(format!("invalid version reference '{input}'"))
            })?;
            return Ok(Self::Version(version));
        }
        if let Some(hash) = trimmed.strip_prefix('#') {
            let hash = hash.to_ascii_lowercase();
            if hash.len() < MIN_COMMIT_PREFIX || hash.len() > 64 {
                return Err(EngineError::invalid_argument(format!(
                    "commit reference '{input}' must be {MIN_COMMIT_PREFIX}-64 hex chars"
                )));
            }
            if !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(EngineError::invalid_argument(format!(
                    "commit reference '{input}' is not hexadecimal"
                )));
            }
            return Ok(Self::Commit(hash));
        }
        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            let version: u64 = trimmed.parse().map_err(|_| {
                EngineError::invalid_argument(format!("invalid version reference '{input}'"))
            })?;
            return Ok(Self::Version(version));
        }
        Err(EngineError::invalid_argument(format!(
            "unrecognized version reference '{input}'"
        )))
    }

    /// Parse an optional reference; `None` selects the active version.
    ///
    /// # Errors
    ///
    /// Propagates [`VersionRef::parse`] failures.
    pub fn parse_opt(input: Option<&str>) -> Result<Option<Self>, EngineError> {
        input.map(Self::parse).transpose()
    }
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Version(v) => write!(f, "@{v}"),
            Self::Commit(h) => write!(f, "#{h}"),
        }
    }
}
