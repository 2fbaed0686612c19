// SPDX-License-Identifier: MIT OR Apache-2.0
//! Brain lifecycle commands: list, create, use, report, backup,
//! restore, integrity.

use super::HandlerDeps;
use avn_command::{CommandMeta, CommandOutcome, CommandRegistry};
use avn_core::EngineError;
use serde_json::json;
use std::path::PathBuf;

pub(super) fn register(registry: &mut CommandRegistry, deps: &HandlerDeps) {
    let d = deps.clone();
    registry.register(
        "brain.list",
        CommandMeta::new("List user brains", "brain", "brain list"),
        move |_| {
            let active = d.repo.active_brain_slug().ok();
            let brains: Vec<_> = d
                .repo
                .list_brains()
                .into_iter()
                .map(|slug| {
                    let is_active = active.as_deref() == Some(slug.as_str());
                    json!({"slug": slug, "active": is_active})
                })
                .collect();
            Ok(CommandOutcome::message(format!("{} brains", brains.len()))
                .with_data(json!({"brains": brains, "active": active})))
        },
    );

    let d = deps.clone();
    registry.register(
        "brain.create",
        CommandMeta::new("Create a user brain", "brain", "brain create <slug>"),
        move |input| {
            let slug = super::require_str(input, "slug")?;
            d.repo.create_brain(&slug)?;
            Ok(CommandOutcome::message(format!("brain '{slug}' created"))
                .with_data(json!({"slug": slug})))
        },
    );
    registry.set_parser_metadata("brain.create", &["slug"]);

    let d = deps.clone();
    registry.register(
        "brain.use",
        CommandMeta::new("Select the active user brain", "brain", "brain use <slug>"),
        move |input| {
            let slug = super::require_str(input, "slug")?;
            d.repo.set_active_brain(&slug)?;
            Ok(CommandOutcome::message(format!("brain '{slug}' is now active"))
                .with_data(json!({"active": slug})))
        },
    );
    registry.set_parser_metadata("brain.use", &["slug"]);

    let d = deps.clone();
    registry.register(
        "brain.report",
        CommandMeta::new(
            "Summary of a brain (active when omitted)",
            "brain",
            "brain report [slug]",
        ),
        move |input| {
            let slug = super::opt_str(input, "slug");
            let report = d.repo.brain_report(slug.as_deref())?;
            Ok(CommandOutcome::message("brain report").with_data(report))
        },
    );
    registry.set_parser_metadata("brain.report", &["slug"]);

    let d = deps.clone();
    registry.register(
        "brain.backup",
        CommandMeta::new(
            "Back up a brain into the backups directory",
            "brain",
            "brain backup [slug] [label] [--gzip]",
        ),
        move |input| {
            let slug = match super::opt_str(input, "slug") {
                Some(slug) => slug,
                None => d.repo.active_brain_slug()?,
            };
            let label = super::opt_str(input, "label");
            let gzip = super::flag(input, "gzip");
            let info = d.repo.backup_brain(&slug, label.as_deref(), gzip)?;
            Ok(CommandOutcome::message(format!(
                "brain '{slug}' backed up to {}",
                info.path.display()
            ))
            .with_data(json!({
                "brain": info.brain,
                "path": info.path,
                "hash": info.hash,
                "compressed": info.compressed,
            })))
        },
    );
    registry.set_parser_metadata("brain.backup", &["slug", "label"]);

    let d = deps.clone();
    registry.register(
        "brain.restore",
        CommandMeta::new(
            "Restore a brain from a backup file",
            "brain",
            "brain restore <slug> <file>",
        ),
        move |input| {
            let slug = super::require_str(input, "slug")?;
            let file = super::require_str(input, "file")?;
            let hash = d.repo.restore_brain(&slug, &PathBuf::from(&file))?;
            Ok(CommandOutcome::message(format!("brain '{slug}' restored"))
                .with_data(json!({"brain": slug, "hash": hash, "source": file})))
        },
    );
    registry.set_parser_metadata("brain.restore", &["slug", "file"]);

    let d = deps.clone();
    registry.register(
        "brain.integrity",
        CommandMeta::new(
            "Verify the stored invariants of a brain",
            "brain",
            "brain integrity [slug]",
        ),
        move |input| {
            let slug = match super::opt_str(input, "slug") {
                Some(slug) => slug,
                None => d.repo.active_brain_slug()?,
            };
            let report = d.repo.integrity_report(&slug)?;
            let message = if report.is_ok() {
                format!("brain '{slug}' is sound")
            } else {
                format!("brain '{slug}' has {} issues", report.issues.len())
            };
            let data = serde_json::to_value(&report)
                .map_err(|e| EngineError::internal(format!("report serialization: {e}")))?;
            Ok(CommandOutcome::message(message).with_data(data))
        },
    );
    registry.set_parser_metadata("brain.integrity", &["slug"]);
}
