// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scheduler commands: `cron` drains due tasks through the dispatcher;
//! `schedule add|remove|list` manages the task store.

use super::HandlerDeps;
use avn_command::{CommandMeta, CommandOutcome, CommandRegistry};
use avn_core::EngineError;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

pub(super) fn register(registry: &mut CommandRegistry, deps: &HandlerDeps) {
    let d = deps.clone();
    registry.register(
        "cron",
        CommandMeta::new(
            "Run every due scheduled task through the dispatcher",
            "scheduler",
            "cron",
        ),
        move |_| {
            let inner = d
                .dispatcher
                .get()
                .and_then(std::sync::Weak::upgrade)
                .ok_or_else(|| EngineError::internal("dispatcher not wired"))?;

            let tasks = d.repo.list_scheduler_tasks()?;
            let now = Utc::now();
            let mut executed = Vec::new();
            let mut skipped = 0usize;
            for (slug, task) in tasks {
                let Some(statement) = task.get("statement").and_then(Value::as_str) else {
                    skipped += 1;
                    continue;
                };
                // A task must not re-enter the scheduler.
                if statement.trim_start().starts_with("cron") {
                    skipped += 1;
                    continue;
                }
                if !is_due(&task, now) {
                    skipped += 1;
                    continue;
                }
                let envelope = inner.execute_statement(statement);
                let status = if envelope.is_ok() { "ok" } else { "error" };
                executed.push(json!({
                    "task": slug,
                    "statement": statement,
                    "status": status,
                    "message": envelope.message,
                }));

                let mut updated = task.clone();
                updated["last_run_at"] = json!(now.to_rfc3339());
                updated["last_status"] = json!(status);
                d.repo.put_scheduler_task(&slug, updated)?;
            }
            Ok(CommandOutcome::message(format!(
                "{} tasks executed, {skipped} skipped",
                executed.len()
            ))
            .with_data(json!({"executed": executed, "skipped": skipped})))
        },
    );

    let d = deps.clone();
    registry.register(
        "schedule.add",
        CommandMeta::new(
            "Store a scheduled task (statement runs on cron)",
            "scheduler",
            "schedule add <slug> \"<statement>\" [interval=minutes]",
        ),
        move |input| {
            let slug = super::require_str(input, "slug")?;
            let statement = super::require_str(input, "statement")?;
            let interval = super::opt_str(input, "interval")
                .and_then(|raw| raw.parse::<u64>().ok());
            let task = json!({
                "statement": statement,
                "interval_minutes": interval,
                "created_at": super::now_iso(),
            });
            d.repo.put_scheduler_task(&slug, task.clone())?;
            Ok(CommandOutcome::message(format!("task '{slug}' scheduled"))
                .with_data(json!({"slug": slug, "task": task})))
        },
    );
    registry.set_parser_metadata("schedule.add", &["slug", "statement"]);

    let d = deps.clone();
    registry.register(
        "schedule.remove",
        CommandMeta::new("Remove a scheduled task", "scheduler", "schedule remove <slug>"),
        move |input| {
            let slug = super::require_str(input, "slug")?;
            let removed = d.repo.remove_scheduler_task(&slug)?;
            if !removed {
                return Err(EngineError::not_found(format!("task '{slug}' not found")));
            }
            Ok(CommandOutcome::message(format!("task '{slug}' removed"))
                .with_data(json!({"slug": slug})))
        },
    );
    registry.set_parser_metadata("schedule.remove", &["slug"]);

    let d = deps.clone();
    registry.register(
        "schedule.list",
        CommandMeta::new("List scheduled tasks", "scheduler", "schedule list"),
        move |_| {
            let tasks = d.repo.list_scheduler_tasks()?;
            Ok(CommandOutcome::message(format!("{} tasks", tasks.len()))
                .with_data(json!({"tasks": tasks})))
        },
    );
}

/// A task is due when it has never run, has no interval, or its
/// interval has elapsed since the last run.
fn is_due(task: &Value, now: DateTime<Utc>) -> bool {
    let Some(interval_minutes) = task.get("interval_minutes").and_then(Value::as_u64) else {
        return true;
    };
    let Some(last_run) = task
        .get("last_run_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
    else {
        return true;
    };
    let elapsed = now.signed_duration_since(last_run.with_timezone(&Utc));
    elapsed.num_seconds() >= (interval_minutes as i64) * 60
}
