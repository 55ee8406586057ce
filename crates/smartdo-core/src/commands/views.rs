use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use super::modifiers::parse_args;
use super::{App, today};
use crate::datetime::{format_project_day_title, parse_day_expr};
use crate::gateway::TaskScope;
use crate::stats::TaskStats;
use crate::view::{CategoryFilter, TaskViewModel, ViewStatus, tasks_due_on};

/// `list`, `pending`, `completed` and `archived`: one live view, printed
/// once it has delivered.
#[instrument(skip(app, args, now))]
pub(super) fn cmd_list(
    app: &mut App,
    command: &str,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!(command, "command list");
    app.require_session()?;

    let parsed = parse_args(args, now)?;
    if !parsed.words.is_empty() {
        return Err(anyhow!(
            "unexpected arguments: {} (did you mean search:{}?)",
            parsed.text(),
            parsed.words[0]
        ));
    }

    let (scope, empty_message) = match command {
        "pending" => (TaskScope::Incomplete, "No pending tasks"),
        "completed" => (TaskScope::Completed, "No completed tasks"),
        "archived" => (TaskScope::Archived, "No archived tasks"),
        _ => (TaskScope::All, "No tasks yet. Add one with: todo add TITLE"),
    };
    let sort = parsed.sort().unwrap_or_else(|| app.cfg.default_sort());

    let lists_everything = scope == TaskScope::All;
    let mut model = TaskViewModel::attach(app.gateway.clone(), scope, sort);
    match parsed.category().unwrap_or_default() {
        CategoryFilter::All => {}
        filter if lists_everything => model.select_category(filter),
        CategoryFilter::Only(_) => {
            return Err(anyhow!("cat: only applies to the list command"));
        }
    }

    let search = parsed.search().unwrap_or_default();
    model.set_search(search);

    let status = model.status();
    debug!(?status, scope = ?model.scope(), "view ready");
    let empty_message = if search.trim().is_empty() {
        empty_message.to_string()
    } else {
        format!("No tasks match '{search}'")
    };
    if app.renderer.print_view_status(&status, &empty_message)? {
        app.renderer.print_task_table(&model.projection(), now)?;
    }
    Ok(())
}

#[instrument(skip(app, args, now))]
pub(super) fn cmd_calendar(
    app: &mut App,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command calendar");
    app.require_session()?;

    let parsed = parse_args(args, now)?;
    let date = if parsed.words.is_empty() {
        today(now)
    } else {
        parse_day_expr(&parsed.text(), now)?
    };
    let sort = parsed.sort().unwrap_or_else(|| app.cfg.default_sort());

    let model = TaskViewModel::attach(app.gateway.clone(), TaskScope::All, sort);
    println!("Tasks for: {}", format_project_day_title(date));

    if let ViewStatus::Failed(message) = model.status() {
        return Err(anyhow!("could not load tasks: {message}"));
    }

    let due = tasks_due_on(&model.projection(), date)?;
    if due.is_empty() {
        println!("No tasks for this date");
        return Ok(());
    }
    app.renderer.print_task_table(&due, now)
}

#[instrument(skip(app, now))]
pub(super) fn cmd_stats(app: &mut App, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command stats");
    app.require_session()?;

    let tasks = app.gateway.fetch(TaskScope::Owned)?;
    let stats = TaskStats::compute(&tasks, now);
    app.renderer.print_stats(&stats)?;
    if stats.is_empty() {
        println!("No tasks yet.");
    }
    Ok(())
}
