// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy shared by every engine component.
//!
//! Every error carries an [`ErrorKind`] (a stable, machine-readable
//! family), a human-readable message, an optional specific reason tag,
//! and arbitrary key-value context. The dispatcher translates kinds to
//! HTTP status codes; components never pick status codes themselves.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Broad family an engine error belongs to.
///
/// Serializes to the stable snake_case tags used in `meta.reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed selector, missing required parameter, invalid slug.
    InvalidArgument,
    /// Project / entity / version / commit / preset / token unknown.
    NotFound,
    /// Attempt to create a resource that already exists.
    Conflict,
    /// Missing / invalid / inactive token, bootstrap misuse, api disabled.
    Auth,
    /// Per-client rate limit exceeded or client blocked.
    RateLimited,
    /// Global lockdown in effect.
    LockedDown,
    /// Filesystem or integrity failure.
    Storage,
    /// Uncaught internal failure.
    Internal,
}

impl ErrorKind {
    /// Stable snake_case tag for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Auth => "auth",
            Self::RateLimited => "rate_limited",
            Self::LockedDown => "locked_down",
            Self::Storage => "storage",
            Self::Internal => "internal",
        }
    }

    /// Default HTTP status for this kind, before reason-level overrides.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidArgument | Self::NotFound | Self::Conflict => 400,
            Self::Auth => 401,
            Self::RateLimited => 429,
            Self::LockedDown => 503,
            Self::Storage | Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// The one error type crossing component boundaries.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    kind: ErrorKind,
    message: String,
    /// Specific reason tag overriding the kind's default (auth reasons
    /// such as `token_missing`, `bootstrap_forbidden`, `api_disabled`).
    reason: Option<&'static str>,
    context: BTreeMap<String, String>,
}

impl EngineError {
    /// Construct an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            reason: None,
            context: BTreeMap::new(),
        }
    }

    /// Shorthand for [`ErrorKind::InvalidArgument`].
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Shorthand for [`ErrorKind::NotFound`].
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Shorthand for [`ErrorKind::Conflict`].
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Shorthand for [`ErrorKind::Auth`] with a specific reason tag.
    #[must_use]
    pub fn auth(reason: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message).with_reason(reason)
    }

    /// Shorthand for [`ErrorKind::Storage`].
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    /// Shorthand for [`ErrorKind::Internal`].
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Wrap an I/O failure as a storage error, keeping the operation name.
    #[must_use]
    pub fn io(operation: &str, err: &std::io::Error) -> Self {
        Self::storage(format!("{operation}: {err}")).with_context("operation", operation)
    }

    /// Override the reason tag.
    #[must_use]
    pub fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = Some(reason);
        self
    }

    /// Attach a context key-value pair.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// The error's kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The reason tag: the specific override, or the kind's default.
    #[must_use]
    pub fn reason(&self) -> &str {
        self.reason.unwrap_or_else(|| self.kind.as_str())
    }

    /// Context map attached to this error.
    #[must_use]
    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// HTTP status for this error, honouring reason-level overrides.
    ///
    /// Auth reasons map individually: `token_missing` / `token_invalid`
    /// are 401, `token_inactive` / `bootstrap_forbidden` are 403,
    /// `api_disabled` is 503.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        if self.kind == ErrorKind::Auth {
            return match self.reason() {
                "token_inactive" | "bootstrap_forbidden" => 403,
                "api_disabled" => 503,
                _ => 401,
            };
        }
        self.kind.http_status()
    }
}
