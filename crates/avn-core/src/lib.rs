// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! avn-core
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Canonical JSON serialization and SHA-256 content addressing.
pub mod canonical;
/// The unified response envelope returned by every command.
pub mod envelope;
/// Error taxonomy shared by every engine component.
pub mod error;
/// Synchronous named-event fan-out with wildcard suffix matching.
pub mod events;
/// Deep merge of JSON payloads with the empty-string deletion idiom.
pub mod merge;
/// Brain document model: brains, projects, entities, versions.
pub mod model;
/// Dotted-path access into JSON payloads.
pub mod paths;
/// Version references: `@version`, `#commit`, bare numbers.
pub mod reference;

pub use canonical::{canonical_json, payload_hash, sha256_hex};
pub use envelope::{EnvelopeStatus, ResponseEnvelope};
pub use error::{EngineError, ErrorKind};
pub use events::EventBus;
pub use model::{
    AuthState, BrainDocument, BrainMeta, CommitPointer, Entity, EntityStatus, Project,
    ProjectStatus, TokenRecord, TokenStatus, VersionRecord, VersionStatus,
};
pub use reference::VersionRef;

/// Schema version stamped into `meta.schema_version` of every brain file.
pub const SCHEMA_VERSION: &str = "1";

/// Engine version string surfaced by the `version` and `status` commands.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Validate a slug: lowercase `[a-z0-9._-]+`, non-empty.
///
/// # Errors
///
/// Returns [`ErrorKind::InvalidArgument`] when the slug is empty or
/// contains characters outside the allowed set.
pub fn validate_slug(slug: &str) -> Result<(), EngineError> {
    if slug.is_empty() {
        return Err(EngineError::invalid_argument("slug must not be empty"));
    }
    let ok = slug
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-'));
    if !ok {
        return Err(
            EngineError::invalid_argument(format!("invalid slug '{slug}'"))
                .with_context("allowed", "lowercase a-z, 0-9, '.', '_', '-'"),
        );
    }
    Ok(())
}

/// Lowercase and validate a slug in one step.
///
/// # Errors
///
/// Returns [`ErrorKind::InvalidArgument`] when the lowercased input still
/// fails [`validate_slug`].
pub fn normalize_slug(input: &str) -> Result<String, EngineError> {
    let slug = input.trim().to_ascii_lowercase();
    validate_slug(&slug)?;
    Ok(slug)
}

/// Normalize a config key: trimmed, lowercased, dotted segments of slug
/// characters.
///
/// # Errors
///
/// Returns [`ErrorKind::InvalidArgument`] for empty keys or empty dotted
/// segments.
pub fn normalize_config_key(input: &str) -> Result<String, EngineError> {
    let key = input.trim().to_ascii_lowercase();
    if key.is_empty() {
        return Err(EngineError::invalid_argument("config key must not be empty"));
    }
    for segment in key.split('.') {
        validate_slug(segment).map_err(|_| {
            EngineError::invalid_argument(format!("invalid config key '{input}'"))
        })?;
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_accepts_allowed_charset() {
        for slug in ["storyverse", "a.b-c_d", "v2", "0", "a"] {
            assert!(validate_slug(slug).is_ok(), "{slug} should be valid");
        }
    }

    #[test]
    fn slug_rejects_uppercase_and_symbols() {
        for slug in ["", "Hero", "a b", "über", "a/b", "semi;colon"] {
            assert!(validate_slug(slug).is_err(), "{slug:?} should be invalid");
        }
    }

    #[test]
    fn normalize_lowercases_before_validating() {
        assert_eq!(normalize_slug("  Hero ").unwrap(), "hero");
        assert!(normalize_slug("no way").is_err());
    }

    #[test]
    fn config_keys_are_dotted_lowercase() {
        assert_eq!(
            normalize_config_key("Security.Rate_Limit").unwrap(),
            "security.rate_limit"
        );
        assert!(normalize_config_key("a..b").is_err());
        assert!(normalize_config_key("").is_err());
    }
}
