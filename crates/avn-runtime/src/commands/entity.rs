// SPDX-License-Identifier: MIT OR Apache-2.0
//! Entity commands: save, show, list, versions, remove, delete,
//! restore, resolve.

use super::HandlerDeps;
use avn_command::{CommandMeta, CommandOutcome, CommandRegistry};
use avn_core::{EngineError, VersionRecord};
use avn_query::{ResolverContext, strip_payload};
use avn_store::SaveOptions;
use serde_json::{Value, json};
use std::collections::BTreeMap;

fn record_json(project: &str, entity: &str, record: &VersionRecord) -> Value {
    json!({
        "project": project,
        "entity": entity,
        "uid": format!("{project}.{entity}"),
        "version": record.version,
        "status": record.status,
        "commit": record.commit,
        "hash": record.hash,
        "committed_at": record.committed_at,
        "payload": record.payload,
        "meta": record.meta,
    })
}

pub(super) fn register(registry: &mut CommandRegistry, deps: &HandlerDeps) {
    let d = deps.clone();
    registry.register(
        "save",
        CommandMeta::new(
            "Save a payload as a new entity version (deep-merge by default)",
            "entity",
            "save <project> <entity[:fieldset]> <json> [--replace]",
        ),
        move |input| {
            let project = super::require_str(input, "project")?;
            let selector = super::require_str(input, "entity")?;
            let (entity, fieldset) = match selector.split_once(':') {
                Some((entity, fieldset)) => (entity.to_string(), Some(fieldset.to_string())),
                None => (selector, None),
            };
            let payload = input
                .payload
                .clone()
                .ok_or_else(|| EngineError::invalid_argument("save needs a JSON payload"))?;
            // Re-imported exports may carry rendered reference output;
            // only the markers are stored.
            let payload = strip_payload(&payload);
            let options = SaveOptions {
                merge: !super::flag(input, "replace"),
                fieldset,
            };
            let outcome = d.repo.save_entity(&project, &entity, payload, None, &options)?;
            let message = if outcome.changed {
                format!(
                    "saved {}.{}@{}",
                    outcome.project, outcome.entity, outcome.record.version
                )
            } else {
                format!(
                    "{}.{} unchanged at @{}",
                    outcome.project, outcome.entity, outcome.record.version
                )
            };
            Ok(CommandOutcome::message(message).with_data(json!({
                "project": outcome.project,
                "entity": outcome.entity,
                "version": outcome.record.version,
                "commit": outcome.record.commit,
                "hash": outcome.record.hash,
                "changed": outcome.changed,
                "created_entity": outcome.created_entity,
                "payload": outcome.record.payload,
            })))
        },
    );
    registry.set_parser_metadata("save", &["project", "entity"]);

    let d = deps.clone();
    registry.register(
        "show",
        CommandMeta::new(
            "Show one entity version (active by default)",
            "entity",
            "show <project> <entity> [@version|#commit] [--resolve]",
        ),
        move |input| {
            let project = super::require_str(input, "project")?;
            let entity = super::require_str(input, "entity")?;
            let reference = super::opt_reference(input)?;
            let record = d.repo.get_entity_version(&project, &entity, reference.as_ref())?;
            let mut data = record_json(&project, &entity, &record);
            if super::flag(input, "resolve") {
                let ctx = ResolverContext::new(&project, &entity, &record.version);
                data["payload"] = d.resolver.resolve_payload(&record.payload, &ctx);
            }
            Ok(CommandOutcome::message(format!(
                "{project}.{entity}@{}",
                record.version
            ))
            .with_data(json!({"record": data})))
        },
    );
    registry.set_parser_metadata("show", &["project", "entity", "reference"]);

    let d = deps.clone();
    registry.register(
        "list",
        CommandMeta::new(
            "List entities of a project, or report one entity in detail",
            "entity",
            "list <project> [entity]",
        ),
        move |input| {
            let project = super::require_str(input, "project")?;
            if let Some(entity) = super::opt_str(input, "entity") {
                let report = d.repo.entity_report(&project, &entity, true)?;
                return Ok(CommandOutcome::message(format!("{project}.{entity}"))
                    .with_data(report));
            }
            let entities: Vec<_> = d
                .repo
                .list_entities(&project)?
                .into_iter()
                .map(|e| {
                    json!({
                        "slug": e.slug,
                        "parent": e.parent,
                        "status": e.status,
                        "active_version": e.active_version,
                        "versions": e.versions.len(),
                        "updated_at": e.updated_at,
                    })
                })
                .collect();
            Ok(CommandOutcome::message(format!("{} entities", entities.len()))
                .with_data(json!({"project": project, "entities": entities})))
        },
    );
    registry.set_parser_metadata("list", &["project", "entity"]);

    let d = deps.clone();
    registry.register(
        "versions",
        CommandMeta::new(
            "List the version history of an entity",
            "entity",
            "versions <project> <entity>",
        ),
        move |input| {
            let project = super::require_str(input, "project")?;
            let entity = super::require_str(input, "entity")?;
            let versions: Vec<_> = d
                .repo
                .list_entity_versions(&project, &entity)?
                .into_iter()
                .map(|v| {
                    json!({
                        "version": v.version,
                        "status": v.status,
                        "commit": v.commit,
                        "committed_at": v.committed_at,
                    })
                })
                .collect();
            Ok(CommandOutcome::message(format!("{} versions", versions.len()))
                .with_data(json!({
                    "project": project,
                    "entity": entity,
                    "versions": versions,
                })))
        },
    );
    registry.set_parser_metadata("versions", &["project", "entity"]);

    let d = deps.clone();
    registry.register(
        "remove",
        CommandMeta::new(
            "Archive an entity (history retained)",
            "entity",
            "remove <project> <entity>",
        ),
        move |input| {
            let project = super::require_str(input, "project")?;
            let entity = super::require_str(input, "entity")?;
            d.repo.deactivate_entity(&project, &entity)?;
            Ok(CommandOutcome::message(format!("{project}.{entity} archived"))
                .with_data(json!({
                    "project": project,
                    "entity": entity,
                    "status": "archived",
                })))
        },
    );
    registry.set_parser_metadata("remove", &["project", "entity"]);

    let d = deps.clone();
    registry.register(
        "delete",
        CommandMeta::new(
            "Delete an entity, or one version when a reference is given",
            "entity",
            "delete <project> <entity> [@version|#commit] [--purge]",
        ),
        move |input| {
            let project = super::require_str(input, "project")?;
            let entity = super::require_str(input, "entity")?;
            match super::opt_reference(input)? {
                Some(reference) => {
                    d.repo.delete_entity_version(&project, &entity, &reference)?;
                    Ok(CommandOutcome::message(format!(
                        "version {reference} of {project}.{entity} deleted"
                    ))
                    .with_data(json!({
                        "project": project,
                        "entity": entity,
                        "deleted": reference.to_string(),
                    })))
                }
                None => {
                    let purge = super::flag(input, "purge");
                    d.repo.delete_entity(&project, &entity, purge)?;
                    Ok(CommandOutcome::message(format!("{project}.{entity} deleted"))
                        .with_data(json!({
                            "project": project,
                            "entity": entity,
                            "purged": purge,
                        })))
                }
            }
        },
    );
    registry.set_parser_metadata("delete", &["project", "entity", "reference"]);

    let d = deps.clone();
    registry.register(
        "restore",
        CommandMeta::new(
            "Promote an older version by appending a duplicate",
            "entity",
            "restore <project> <entity> <@version|#commit>",
        ),
        move |input| {
            let project = super::require_str(input, "project")?;
            let entity = super::require_str(input, "entity")?;
            let reference = super::opt_reference(input)?.ok_or_else(|| {
                EngineError::invalid_argument("restore needs a version reference")
            })?;
            let outcome = d.repo.restore_entity_version(&project, &entity, &reference)?;
            let message = if outcome.changed {
                format!(
                    "restored {project}.{entity} from {reference} as @{}",
                    outcome.record.version
                )
            } else {
                "already at that payload".to_string()
            };
            Ok(CommandOutcome::message(message).with_data(json!({
                "project": outcome.project,
                "entity": outcome.entity,
                "version": outcome.record.version,
                "commit": outcome.record.commit,
                "changed": outcome.changed,
                "restored_from": reference.to_string(),
            })))
        },
    );
    registry.set_parser_metadata("restore", &["project", "entity", "reference"]);

    let d = deps.clone();
    registry.register(
        "resolve",
        CommandMeta::new(
            "Resolve reference shortcodes in an entity payload",
            "entity",
            "resolve <project> <entity> [@version|#commit] [param.…=…]",
        ),
        move |input| {
            let project = super::require_str(input, "project")?;
            let entity = super::require_str(input, "entity")?;
            let reference = super::opt_reference(input)?;
            let record = d.repo.get_entity_version(&project, &entity, reference.as_ref())?;
            let mut ctx = ResolverContext::new(&project, &entity, &record.version);
            ctx.params = collect_params(&input.parameters);
            let resolved = d.resolver.resolve_payload(&record.payload, &ctx);
            Ok(CommandOutcome::message(format!(
                "{project}.{entity}@{} resolved",
                record.version
            ))
            .with_data(json!({
                "project": project,
                "entity": entity,
                "version": record.version,
                "payload": resolved,
            })))
        },
    );
    registry.set_parser_metadata("resolve", &["project", "entity", "reference"]);
}

/// Lift `param.<name>` parameters into a resolver parameter map.
pub(super) fn collect_params(parameters: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    parameters
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix("param.")
                .map(|name| (name.to_string(), value.clone()))
        })
        .collect()
}
