// SPDX-License-Identifier: MIT OR Apache-2.0
//! The built-in command vocabulary.
//!
//! Commands are registered by statically linked modules through the
//! module loader: `core` (brains, config, projects, entities),
//! `access` (auth, api, security, cache), `exports`, and `scheduler`.
//! Group words (`project create …`) are parser handlers that consume
//! the subcommand token and rewrite the action to its dotted form.

mod auth_cmds;
mod brain;
mod config_cmds;
mod entity;
mod export_cmds;
mod project;
mod scheduler;
mod system;

use crate::Dispatcher;
use avn_cache::Cache;
use avn_command::{CommandParser, ParsedCommand};
use avn_config::EngineConfig;
use avn_core::{EngineError, VersionRef};
use avn_export::ExportEngine;
use avn_modules::{Capability, LoadReport, ModuleDef, ModuleLoader};
use avn_query::ResolverEngine;
use avn_security::{AuthManager, SecurityManager};
use avn_store::BrainRepository;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, OnceLock};

/// Shared service handles captured by command handlers.
#[derive(Clone)]
pub(crate) struct HandlerDeps {
    pub repo: Arc<BrainRepository>,
    pub cache: Arc<Cache>,
    pub security: Arc<SecurityManager>,
    pub auth: Arc<AuthManager>,
    pub resolver: Arc<ResolverEngine>,
    pub export: Arc<ExportEngine>,
    pub config: Arc<EngineConfig>,
    pub dispatcher: Dispatcher,
    pub started_at: DateTime<Utc>,
    pub load_report: Arc<OnceLock<LoadReport>>,
}

const GROUPS: &[&str] = &[
    "project", "brain", "config", "auth", "api", "security", "cache", "schedule",
];

/// Register the group-word rewrite handlers.
pub(crate) fn register_parse_handlers(parser: &mut CommandParser) {
    for group in GROUPS {
        parser.register(group, 0, move |ctx| {
            if ctx.tokens.is_empty() {
                return;
            }
            let sub = ctx.tokens.remove(0).to_ascii_lowercase();
            ctx.rewrite_action(format!("{group}.{sub}"));
        });
    }
}

/// Build the loader carrying the built-in command modules.
pub(crate) fn module_loader(deps: &HandlerDeps) -> ModuleLoader {
    let mut loader = ModuleLoader::new();

    let core_deps = deps.clone();
    loader.register(
        ModuleDef::new("core", "0.1.0", move |ctx| {
            let registry = ctx.commands()?;
            system::register(registry, &core_deps);
            brain::register(registry, &core_deps);
            config_cmds::register(registry, &core_deps);
            project::register(registry, &core_deps);
            entity::register(registry, &core_deps);
            Ok(())
        })
        .capabilities(&[Capability::Commands, Capability::Storage, Capability::Events]),
    );

    let access_deps = deps.clone();
    loader.register(
        ModuleDef::new("access", "0.1.0", move |ctx| {
            let registry = ctx.commands()?;
            auth_cmds::register(registry, &access_deps);
            Ok(())
        })
        .capabilities(&[Capability::Commands, Capability::Storage, Capability::Cache])
        .requires("core@0.1.0"),
    );

    let export_deps = deps.clone();
    loader.register(
        ModuleDef::new("exports", "0.1.0", move |ctx| {
            let registry = ctx.commands()?;
            export_cmds::register(registry, &export_deps);
            Ok(())
        })
        .capabilities(&[Capability::Commands, Capability::Exports, Capability::Storage])
        .requires("core@0.1.0"),
    );

    let scheduler_deps = deps.clone();
    loader.register(
        ModuleDef::new("scheduler", "0.1.0", move |ctx| {
            let registry = ctx.commands()?;
            scheduler::register(registry, &scheduler_deps);
            Ok(())
        })
        .capabilities(&[Capability::Commands, Capability::Scheduler, Capability::Storage])
        .requires("core@0.1.0"),
    );

    loader
}

// ---------------------------------------------------------------------------
// Parameter helpers
// ---------------------------------------------------------------------------

pub(crate) fn require_str(input: &ParsedCommand, key: &str) -> Result<String, EngineError> {
    opt_str(input, key)
        .ok_or_else(|| EngineError::invalid_argument(format!("missing required '{key}'")))
}

pub(crate) fn opt_str(input: &ParsedCommand, key: &str) -> Option<String> {
    match input.parameters.get(key) {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(Value::Null) | None => None,
        Some(other) => Some(value_to_string(other)),
    }
}

pub(crate) fn flag(input: &ParsedCommand, key: &str) -> bool {
    input
        .parameters
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Parse the optional `reference` parameter (`@v`, `#hash`, bare
/// number).
pub(crate) fn opt_reference(input: &ParsedCommand) -> Result<Option<VersionRef>, EngineError> {
    match opt_str(input, "reference") {
        Some(raw) => Ok(Some(VersionRef::parse(&raw)?)),
        None => Ok(None),
    }
}

pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Interpret a raw token as a JSON scalar where it looks like one.
pub(crate) fn scalar_from_token(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => {
            if let Ok(n) = raw.parse::<i64>() {
                return Value::from(n);
            }
            if raw.contains('.') {
                if let Ok(f) = raw.parse::<f64>() {
                    return serde_json::json!(f);
                }
            }
            Value::String(raw.to_string())
        }
    }
}

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339()
}
