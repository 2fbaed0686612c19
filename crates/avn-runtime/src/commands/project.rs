// SPDX-License-Identifier: MIT OR Apache-2.0
//! Project lifecycle commands.

use super::HandlerDeps;
use avn_command::{CommandMeta, CommandOutcome, CommandRegistry};
use serde_json::json;

pub(super) fn register(registry: &mut CommandRegistry, deps: &HandlerDeps) {
    let d = deps.clone();
    registry.register(
        "project.create",
        CommandMeta::new(
            "Create a project in the active brain",
            "project",
            "project create <slug> [title=…] [description=…]",
        ),
        move |input| {
            let slug = super::require_str(input, "slug")?;
            let title = super::opt_str(input, "title");
            let description = super::opt_str(input, "description");
            let project =
                d.repo
                    .create_project(&slug, title.as_deref(), description.as_deref())?;
            Ok(
                CommandOutcome::message(format!("project '{}' created", project.slug))
                    .with_data(json!({
                        "slug": project.slug,
                        "title": project.title,
                        "description": project.description,
                        "status": project.status,
                        "created_at": project.created_at,
                    })),
            )
        },
    );
    registry.set_parser_metadata("project.create", &["slug"]);

    let d = deps.clone();
    registry.register(
        "project.list",
        CommandMeta::new("List projects of the active brain", "project", "project list"),
        move |_| {
            let projects: Vec<_> = d
                .repo
                .list_projects()?
                .into_iter()
                .map(|p| {
                    json!({
                        "slug": p.slug,
                        "title": p.title,
                        "status": p.status,
                        "entities": p.entities.len(),
                        "updated_at": p.updated_at,
                    })
                })
                .collect();
            Ok(CommandOutcome::message(format!("{} projects", projects.len()))
                .with_data(json!({"projects": projects})))
        },
    );

    let d = deps.clone();
    registry.register(
        "project.archive",
        CommandMeta::new("Archive a project", "project", "project archive <slug>"),
        move |input| {
            let slug = super::require_str(input, "slug")?;
            d.repo.archive_project(&slug)?;
            Ok(CommandOutcome::message(format!("project '{slug}' archived"))
                .with_data(json!({"slug": slug, "status": "archived"})))
        },
    );
    registry.set_parser_metadata("project.archive", &["slug"]);

    let d = deps.clone();
    registry.register(
        "project.delete",
        CommandMeta::new(
            "Delete a project (tombstone; --purge erases commits too)",
            "project",
            "project delete <slug> [--purge]",
        ),
        move |input| {
            let slug = super::require_str(input, "slug")?;
            let purge = super::flag(input, "purge");
            d.repo.delete_project(&slug, purge)?;
            Ok(CommandOutcome::message(format!("project '{slug}' deleted"))
                .with_data(json!({"slug": slug, "purged": purge})))
        },
    );
    registry.set_parser_metadata("project.delete", &["slug"]);

    let d = deps.clone();
    registry.register(
        "project.report",
        CommandMeta::new("Project summary with entities", "project", "project report <slug>"),
        move |input| {
            let slug = super::require_str(input, "slug")?;
            let report = d.repo.project_report(&slug)?;
            Ok(CommandOutcome::message(format!("project '{slug}'")).with_data(report))
        },
    );
    registry.set_parser_metadata("project.report", &["slug"]);
}
