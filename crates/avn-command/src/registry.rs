// SPDX-License-Identifier: MIT OR Apache-2.0
//! Action dispatch and envelope normalization.
//!
//! The registry maps normalized action names to handlers plus
//! `{description, group, usage}` metadata for `help`. Whatever a
//! handler returns (data, an error, a panic) leaves dispatch as the
//! canonical response envelope, with `command.executed` /
//! `command.failed` telemetry on the bus.

use crate::parser::ParsedCommand;
use avn_core::{EngineError, EventBus, ResponseEnvelope};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Descriptive metadata attached to every command.
#[derive(Debug, Clone)]
pub struct CommandMeta {
    /// One-line description shown by `help`.
    pub description: String,
    /// Command group (`system`, `brain`, `project`, `entity`, …).
    pub group: String,
    /// Usage line.
    pub usage: String,
}

impl CommandMeta {
    /// Build metadata in one call.
    #[must_use]
    pub fn new(
        description: impl Into<String>,
        group: impl Into<String>,
        usage: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            group: group.into(),
            usage: usage.into(),
        }
    }
}

/// Successful handler result before envelope normalization.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Human-readable summary.
    pub message: String,
    /// Business payload.
    pub data: Value,
}

impl CommandOutcome {
    /// Outcome with a message and no data.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: Value::Null,
        }
    }

    /// Attach data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Handler signature: parsed command in, outcome or engine error out.
pub type HandlerFn =
    Box<dyn Fn(&ParsedCommand) -> Result<CommandOutcome, EngineError> + Send + Sync>;

struct RegisteredCommand {
    handler: HandlerFn,
    meta: CommandMeta,
    positional: Vec<String>,
}

/// Stores named handlers; dispatches; normalizes responses.
pub struct CommandRegistry {
    commands: BTreeMap<String, RegisteredCommand>,
    bus: Arc<EventBus>,
}

impl CommandRegistry {
    /// Build a registry publishing telemetry on `bus`.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            commands: BTreeMap::new(),
            bus,
        }
    }

    /// Register a handler under a normalized action name.
    pub fn register<F>(&mut self, action: &str, meta: CommandMeta, handler: F)
    where
        F: Fn(&ParsedCommand) -> Result<CommandOutcome, EngineError> + Send + Sync + 'static,
    {
        self.commands.insert(
            action.to_ascii_lowercase(),
            RegisteredCommand {
                handler: Box::new(handler),
                meta,
                positional: Vec::new(),
            },
        );
    }

    /// Declare positional parameter names for an action; leftover bare
    /// tokens are mapped onto them in order at dispatch time.
    pub fn set_parser_metadata(&mut self, action: &str, positional: &[&str]) {
        if let Some(command) = self.commands.get_mut(&action.to_ascii_lowercase()) {
            command.positional = positional.iter().map(|s| (*s).to_string()).collect();
        }
    }

    /// Whether an action is registered.
    #[must_use]
    pub fn contains(&self, action: &str) -> bool {
        self.commands.contains_key(&action.to_ascii_lowercase())
    }

    /// `(action, metadata)` pairs, sorted by action.
    #[must_use]
    pub fn commands(&self) -> Vec<(String, CommandMeta)> {
        self.commands
            .iter()
            .map(|(action, cmd)| (action.clone(), cmd.meta.clone()))
            .collect()
    }

    /// Dispatch a parsed command to its handler.
    ///
    /// Unknown actions, handler errors, and handler panics all come
    /// back as error envelopes; dispatch itself never fails.
    #[must_use]
    pub fn dispatch(&self, parsed: &ParsedCommand) -> ResponseEnvelope {
        let action = parsed.action.to_ascii_lowercase();
        let Some(command) = self.commands.get(&action) else {
            let err = EngineError::invalid_argument(format!("unknown action '{action}'"))
                .with_reason("command_error");
            self.bus.emit(
                "command.failed",
                &json!({"action": action, "reason": err.reason()}),
            );
            return ResponseEnvelope::from_error(action, &err);
        };

        let mut input = parsed.clone();
        apply_positional(&mut input, &command.positional);

        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| (command.handler)(&input)))
            .unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                Err(EngineError::internal(message))
            });
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                info!(action = %action, duration_ms, "command executed");
                self.bus.emit(
                    "command.executed",
                    &json!({"action": action, "status": "ok", "duration_ms": duration_ms}),
                );
                ResponseEnvelope::ok(&action, outcome.message, outcome.data)
                    .with_meta("duration_ms", json!(duration_ms))
            }
            Err(err) => {
                error!(action = %action, reason = err.reason(), error = %err, "command failed");
                self.bus.emit(
                    "command.executed",
                    &json!({"action": action, "status": "error", "duration_ms": duration_ms}),
                );
                self.bus.emit(
                    "command.failed",
                    &json!({"action": action, "reason": err.reason()}),
                );
                ResponseEnvelope::from_error(&action, &err)
                    .with_meta("duration_ms", json!(duration_ms))
            }
        }
    }
}

fn apply_positional(input: &mut ParsedCommand, names: &[String]) {
    if names.is_empty() {
        return;
    }
    let mut tokens = std::mem::take(&mut input.tokens).into_iter();
    for name in names {
        match tokens.next() {
            Some(token) => {
                input
                    .parameters
                    .entry(name.clone())
                    .or_insert(Value::String(token));
            }
            None => break,
        }
    }
    input.tokens = tokens.collect();
}
