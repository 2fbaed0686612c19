// SPDX-License-Identifier: MIT OR Apache-2.0
//! Auth, api, security, and cache commands.

use super::HandlerDeps;
use avn_command::{CommandMeta, CommandOutcome, CommandRegistry};
use avn_security::token_preview;
use serde_json::json;

pub(super) fn register(registry: &mut CommandRegistry, deps: &HandlerDeps) {
    let d = deps.clone();
    registry.register(
        "auth.register",
        CommandMeta::new(
            "Register an API token (the key is shown exactly once)",
            "auth",
            "auth register <label> [scope=ALL|projects] [projects=a,b]",
        ),
        move |input| {
            let label = super::require_str(input, "label")?;
            let scope = super::opt_str(input, "scope");
            let projects = super::opt_str(input, "projects");
            let (id, key) =
                d.auth
                    .register_token(&label, scope.as_deref(), projects.as_deref())?;
            Ok(CommandOutcome::message(format!("token '{label}' registered"))
                .with_data(json!({
                    "id": id,
                    "label": label,
                    "key": key,
                    "preview": token_preview(&key),
                })))
        },
    );
    registry.set_parser_metadata("auth.register", &["label"]);

    let d = deps.clone();
    registry.register(
        "auth.revoke",
        CommandMeta::new("Revoke a token by id", "auth", "auth revoke <id>"),
        move |input| {
            let id = super::require_str(input, "id")?;
            d.repo.revoke_auth_token(&id)?;
            Ok(CommandOutcome::message(format!("token '{id}' revoked"))
                .with_data(json!({"id": id, "status": "revoked"})))
        },
    );
    registry.set_parser_metadata("auth.revoke", &["id"]);

    let d = deps.clone();
    registry.register(
        "auth.reset",
        CommandMeta::new("Drop every registered token", "auth", "auth reset"),
        move |_| {
            let removed = d.repo.reset_auth_tokens()?;
            Ok(CommandOutcome::message(format!("{removed} tokens removed"))
                .with_data(json!({"removed": removed})))
        },
    );

    let d = deps.clone();
    registry.register(
        "auth.list",
        CommandMeta::new("List tokens (previews only)", "auth", "auth list"),
        move |_| {
            let tokens = d.auth.list_tokens()?;
            let count = tokens.as_array().map_or(0, Vec::len);
            Ok(CommandOutcome::message(format!("{count} tokens"))
                .with_data(json!({"tokens": tokens})))
        },
    );

    let d = deps.clone();
    registry.register(
        "auth.bootstrap",
        CommandMeta::new(
            "Rotate the bootstrap key (never valid for REST)",
            "auth",
            "auth bootstrap",
        ),
        move |_| {
            let key = d.repo.update_bootstrap_key(d.config.api_key_length)?;
            Ok(CommandOutcome::message("bootstrap key rotated")
                .with_data(json!({"bootstrap_key": key})))
        },
    );

    let d = deps.clone();
    registry.register(
        "api.enable",
        CommandMeta::new("Enable REST access", "auth", "api enable"),
        move |_| {
            d.repo.set_api_enabled(true)?;
            Ok(CommandOutcome::message("api enabled").with_data(json!({"enabled": true})))
        },
    );

    let d = deps.clone();
    registry.register(
        "api.disable",
        CommandMeta::new("Disable REST access", "auth", "api disable"),
        move |_| {
            d.repo.set_api_enabled(false)?;
            Ok(CommandOutcome::message("api disabled").with_data(json!({"enabled": false})))
        },
    );

    let d = deps.clone();
    registry.register(
        "security.status",
        CommandMeta::new("Security posture and limits", "security", "security status"),
        move |_| {
            Ok(CommandOutcome::message("security status").with_data(d.security.status()))
        },
    );

    let d = deps.clone();
    registry.register(
        "security.lockdown",
        CommandMeta::new(
            "Engage a global lockdown",
            "security",
            "security lockdown [duration-seconds]",
        ),
        move |input| {
            let duration = super::opt_str(input, "duration")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(600);
            d.security.lockdown(duration)?;
            Ok(CommandOutcome::message(format!("locked down for {duration}s"))
                .with_data(json!({"duration": duration})))
        },
    );
    registry.set_parser_metadata("security.lockdown", &["duration"]);

    let d = deps.clone();
    registry.register(
        "security.purge",
        CommandMeta::new(
            "Clear security counters, blocks, and lockdown",
            "security",
            "security purge",
        ),
        move |_| {
            let removed = d.security.purge();
            Ok(CommandOutcome::message(format!("{removed} entries purged"))
                .with_data(json!({"removed": removed})))
        },
    );

    let d = deps.clone();
    registry.register(
        "cache.flush",
        CommandMeta::new(
            "Flush the cache (all entries, or by tag)",
            "cache",
            "cache flush [tag…]",
        ),
        move |input| {
            let tags: Vec<String> = input.tokens.clone();
            let removed = if tags.is_empty() {
                d.cache.flush(None)
            } else {
                let refs: Vec<&str> = tags.iter().map(String::as_str).collect();
                d.cache.flush(Some(&refs))
            };
            Ok(CommandOutcome::message(format!("{removed} entries flushed"))
                .with_data(json!({"removed": removed, "tags": tags})))
        },
    );
}
