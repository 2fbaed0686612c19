// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `export` command: targets + selectors + preset into a rendered
//! bundle.

use super::HandlerDeps;
use avn_command::{CommandMeta, CommandOutcome, CommandRegistry};
use avn_core::EngineError;
use avn_export::ExportRequest;
use serde_json::{Value, json};
use std::path::PathBuf;

pub(super) fn register(registry: &mut CommandRegistry, deps: &HandlerDeps) {
    let d = deps.clone();
    registry.register(
        "export",
        CommandMeta::new(
            "Export projects (optionally sliced by entity selectors) into a bundle",
            "export",
            "export <projects> [entity[@v|#hash]…] [--preset=…] [param.…=…] [--out[=dir]]",
        ),
        move |input| {
            let mut tokens = input.tokens.iter();
            let targets: Vec<String> = match tokens.next() {
                Some(raw) => raw
                    .split(',')
                    .map(|t| t.trim().to_ascii_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect(),
                None => match super::opt_str(input, "project") {
                    Some(raw) => vec![raw.to_ascii_lowercase()],
                    None => Vec::new(),
                },
            };
            let selectors: Vec<String> = tokens.map(|t| t.to_ascii_lowercase()).collect();
            let preset = super::opt_str(input, "preset");
            if targets.is_empty() && preset.is_none() {
                return Err(EngineError::invalid_argument(
                    "export needs project targets or a preset",
                ));
            }

            let out_dir = match input.parameters.get("out") {
                Some(Value::Bool(true)) => Some(PathBuf::new()),
                Some(Value::String(path)) if !path.is_empty() => Some(PathBuf::from(path)),
                _ => None,
            };

            let request = ExportRequest {
                targets,
                selectors,
                preset,
                params: super::entity::collect_params(&input.parameters),
                description: super::opt_str(input, "description"),
                usage: super::opt_str(input, "usage"),
                out_dir,
            };
            let bundle = d.export.run(&request)?;

            let stats = bundle.rendered.get("stats").cloned().unwrap_or(Value::Null);
            let data = if d.config.response_exports {
                bundle.rendered.clone()
            } else {
                json!({"stats": stats})
            };
            let mut outcome = CommandOutcome::message(format!(
                "exported {} entities",
                stats.get("entities").and_then(Value::as_u64).unwrap_or(0)
            ))
            .with_data(data);
            if let Some(path) = &bundle.path {
                outcome.message = format!("{} to {}", outcome.message, path.display());
            }
            Ok(outcome)
        },
    );
}
