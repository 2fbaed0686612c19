// SPDX-License-Identifier: MIT OR Apache-2.0
//! The unified response envelope.
//!
//! Every command, CLI or HTTP, resolves to
//! `{status, action, message, data, meta}`. Adapters read
//! `meta.http_status` to pick a wire status; business payloads live in
//! `data`.

use crate::error::{EngineError, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Envelope outcome discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    /// The command succeeded.
    Ok,
    /// The command failed; `meta.reason` carries the error tag.
    Error,
}

/// Canonical response shape for every dispatched command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Outcome of the command.
    pub status: EnvelopeStatus,
    /// The action that produced this response.
    pub action: String,
    /// Human-readable summary.
    pub message: String,
    /// Business payload.
    pub data: Value,
    /// Reason tags, HTTP hints, timing, exception echoes.
    pub meta: Value,
}

impl ResponseEnvelope {
    /// Successful envelope.
    #[must_use]
    pub fn ok(action: impl Into<String>, message: impl Into<String>, data: Value) -> Self {
        Self {
            status: EnvelopeStatus::Ok,
            action: action.into(),
            message: message.into(),
            data,
            meta: json!({}),
        }
    }

    /// Error envelope derived from an [`EngineError`].
    ///
    /// Sets `meta.reason` and `meta.http_status`; `retry_after` context
    /// is surfaced as a numeric hint; internal errors echo
    /// `meta.exception = {message, type}`.
    #[must_use]
    pub fn from_error(action: impl Into<String>, err: &EngineError) -> Self {
        let mut meta = json!({
            "reason": err.reason(),
            "http_status": err.http_status(),
        });
        if let Some(retry) = err.context().get("retry_after") {
            if let Ok(secs) = retry.parse::<u64>() {
                meta["retry_after"] = json!(secs);
            }
        }
        if matches!(err.kind(), ErrorKind::Internal | ErrorKind::Storage) {
            meta["exception"] = json!({
                "message": err.message(),
                "type": err.reason(),
            });
        }
        for (key, value) in err.context() {
            if key != "retry_after" {
                meta[key] = json!(value);
            }
        }
        Self {
            status: EnvelopeStatus::Error,
            action: action.into(),
            message: err.message().to_string(),
            data: Value::Null,
            meta,
        }
    }

    /// Merge a key into `meta`, returning the updated envelope.
    #[must_use]
    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        if !self.meta.is_object() {
            self.meta = json!({});
        }
        self.meta[key] = value;
        self
    }

    /// `true` when the command succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == EnvelopeStatus::Ok
    }

    /// HTTP status hint: `meta.http_status` when present, else 200/500.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        if self.is_ok() {
            return 200;
        }
        self.meta
            .get("http_status")
            .and_then(Value::as_u64)
            .map_or(500, |s| s as u16)
    }
}
