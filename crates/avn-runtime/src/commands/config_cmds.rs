// SPDX-License-Identifier: MIT OR Apache-2.0
//! Config commands over the shared key/value store. `--system` targets
//! the system brain, else the active brain.

use super::HandlerDeps;
use avn_command::{CommandMeta, CommandOutcome, CommandRegistry};
use serde_json::{Value, json};

pub(super) fn register(registry: &mut CommandRegistry, deps: &HandlerDeps) {
    let d = deps.clone();
    registry.register(
        "config.list",
        CommandMeta::new(
            "List config keys of the selected scope",
            "config",
            "config list [--system]",
        ),
        move |input| {
            let system = super::flag(input, "system");
            let config = d.repo.list_config(system)?;
            Ok(CommandOutcome::message(format!("{} keys", config.len()))
                .with_data(json!({"scope": scope_name(system), "config": config})))
        },
    );

    let d = deps.clone();
    registry.register(
        "config.get",
        CommandMeta::new(
            "Read one config value",
            "config",
            "config get <key> [--system]",
        ),
        move |input| {
            let key = super::require_str(input, "key")?;
            let system = super::flag(input, "system");
            let value = d.repo.get_config_value(&key, system)?;
            Ok(CommandOutcome::message(format!("config '{key}'"))
                .with_data(json!({"key": key, "value": value, "scope": scope_name(system)})))
        },
    );
    registry.set_parser_metadata("config.get", &["key"]);

    let d = deps.clone();
    registry.register(
        "config.set",
        CommandMeta::new(
            "Set a config value (JSON payload or scalar token)",
            "config",
            "config set <key> <value> [--system]",
        ),
        move |input| {
            let key = super::require_str(input, "key")?;
            let system = super::flag(input, "system");
            let value = match (&input.payload, super::opt_str(input, "value")) {
                (Some(payload), _) => payload.clone(),
                (None, Some(raw)) => super::scalar_from_token(&raw),
                (None, None) => Value::Null,
            };
            d.repo.set_config_value(&key, value.clone(), system)?;
            Ok(CommandOutcome::message(format!("config '{key}' set"))
                .with_data(json!({"key": key, "value": value, "scope": scope_name(system)})))
        },
    );
    registry.set_parser_metadata("config.set", &["key", "value"]);

    let d = deps.clone();
    registry.register(
        "config.delete",
        CommandMeta::new(
            "Delete a config key",
            "config",
            "config delete <key> [--system]",
        ),
        move |input| {
            let key = super::require_str(input, "key")?;
            let system = super::flag(input, "system");
            let removed = d.repo.delete_config_value(&key, system)?;
            let message = if removed {
                format!("config '{key}' deleted")
            } else {
                format!("config '{key}' was not set")
            };
            Ok(CommandOutcome::message(message)
                .with_data(json!({"key": key, "removed": removed})))
        },
    );
    registry.set_parser_metadata("config.delete", &["key"]);
}

fn scope_name(system: bool) -> &'static str {
    if system { "system" } else { "active" }
}
