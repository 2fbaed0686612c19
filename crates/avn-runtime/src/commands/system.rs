// SPDX-License-Identifier: MIT OR Apache-2.0
//! `help`, `version`, `status`, `diagnostics`, `modules`.

use super::HandlerDeps;
use avn_command::{CommandMeta, CommandOutcome, CommandRegistry};
use avn_core::{ENGINE_VERSION, EngineError};
use chrono::Utc;
use serde_json::{Map, Value, json};

pub(super) fn register(registry: &mut CommandRegistry, deps: &HandlerDeps) {
    let d = deps.clone();
    registry.register(
        "help",
        CommandMeta::new("List every command with its usage", "system", "help [group]"),
        move |input| {
            let inner = d
                .dispatcher
                .get()
                .and_then(std::sync::Weak::upgrade)
                .ok_or_else(|| EngineError::internal("dispatcher not wired"))?;
            let wanted_group = super::opt_str(input, "group");
            let mut groups: Map<String, Value> = Map::new();
            let mut total = 0usize;
            for (action, meta) in inner.registry.commands() {
                if let Some(wanted) = &wanted_group {
                    if &meta.group != wanted {
                        continue;
                    }
                }
                total += 1;
                let entry = groups
                    .entry(meta.group.clone())
                    .or_insert_with(|| json!([]));
                if let Some(list) = entry.as_array_mut() {
                    list.push(json!({
                        "action": action,
                        "description": meta.description,
                        "usage": meta.usage,
                    }));
                }
            }
            Ok(CommandOutcome::message(format!("{total} commands"))
                .with_data(Value::Object(groups)))
        },
    );
    registry.set_parser_metadata("help", &["group"]);

    registry.register(
        "version",
        CommandMeta::new("Engine version", "system", "version"),
        |_| {
            Ok(CommandOutcome::message(format!("AavionDB {ENGINE_VERSION}"))
                .with_data(json!({"version": ENGINE_VERSION})))
        },
    );

    let d = deps.clone();
    registry.register(
        "status",
        CommandMeta::new("Engine status overview", "system", "status"),
        move |_| {
            let active = d.repo.active_brain_slug().ok();
            let auth = d.repo.system_auth_state()?;
            let (projects, entities) = match d.repo.list_projects() {
                Ok(list) => {
                    let entities = list.iter().map(|p| p.entities.len()).sum::<usize>();
                    (list.len(), entities)
                }
                Err(_) => (0, 0),
            };
            let uptime = (Utc::now() - d.started_at).num_seconds().max(0);
            Ok(CommandOutcome::message("engine running").with_data(json!({
                "version": ENGINE_VERSION,
                "uptime_seconds": uptime,
                "active_brain": active,
                "brains": d.repo.list_brains(),
                "projects": projects,
                "entities": entities,
                "api_enabled": auth.api.enabled,
                "tokens": auth.tokens.len(),
                "security": d.security.status(),
            })))
        },
    );

    let d = deps.clone();
    registry.register(
        "diagnostics",
        CommandMeta::new(
            "Integrity checks and module health",
            "system",
            "diagnostics",
        ),
        move |_| {
            let mut brains = Vec::new();
            let mut healthy = true;
            let mut targets = vec![avn_store::SYSTEM_BRAIN.to_string()];
            if let Ok(active) = d.repo.active_brain_slug() {
                targets.push(active);
            }
            for slug in targets {
                let report = d.repo.integrity_report(&slug)?;
                healthy &= report.is_ok();
                brains.push(serde_json::to_value(&report).map_err(|e| {
                    EngineError::internal(format!("report serialization: {e}"))
                })?);
            }
            let modules = d.load_report.get().cloned().unwrap_or_default();
            healthy &= modules.disabled.is_empty();
            let message = if healthy {
                "all diagnostics passed"
            } else {
                "diagnostics found issues"
            };
            Ok(CommandOutcome::message(message).with_data(json!({
                "healthy": healthy,
                "brains": brains,
                "modules": {
                    "initialized": modules.initialized,
                    "disabled": modules.disabled,
                    "skipped": modules.skipped,
                },
            })))
        },
    );

    let d = deps.clone();
    registry.register(
        "modules",
        CommandMeta::new("Module load report", "system", "modules"),
        move |_| {
            let report = d.load_report.get().cloned().unwrap_or_default();
            Ok(CommandOutcome::message(format!(
                "{} initialized, {} disabled, {} skipped",
                report.initialized.len(),
                report.disabled.len(),
                report.skipped.len()
            ))
            .with_data(json!({
                "initialized": report.initialized,
                "disabled": report.disabled,
                "skipped": report.skipped,
            })))
        },
    );
}
