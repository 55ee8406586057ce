use chrono::{
  DateTime,
  Utc
};
use tracing::{
  debug,
  info,
  instrument,
  warn
};

use super::modifiers::parse_args;
use super::{
  App,
  first_arg,
  resolve_task
};
use crate::gateway::TaskScope;
use crate::task::Task;
use crate::validate::TaskForm;
use crate::view::{
  ToggleOutcome,
  toggle_completion
};

fn find_in(
  app: &App,
  scope: TaskScope,
  reference: &str
) -> anyhow::Result<Task> {
  app.require_session()?;
  let tasks = app.gateway.fetch(scope)?;
  resolve_task(&tasks, reference)
}

#[instrument(skip(app, args, now))]
pub(super) fn cmd_add(
  app: &mut App,
  args: &[String],
  now: DateTime<Utc>
) -> anyhow::Result<()> {
  info!("command add");
  app.require_session()?;

  let parsed = parse_args(args, now)?;
  let mut form = TaskForm {
    title: parsed.text(),
    ..TaskForm::default()
  };
  parsed.apply_to_form(&mut form)?;

  let draft = form.apply_to(None, now)?;
  let saved = app.gateway.save(&draft)?;
  debug!(id = %saved.id, "task added");
  println!(
    "Task added! ({})",
    saved.short_id()
  );
  Ok(())
}

/// Edits replace the whole stored
/// task with the merged form.
#[instrument(skip(app, args, now))]
pub(super) fn cmd_edit(
  app: &mut App,
  args: &[String],
  now: DateTime<Utc>
) -> anyhow::Result<()> {
  info!("command edit");
  let reference = first_arg(
    args,
    "edit REF [TITLE] [mods]"
  )?;
  let existing = find_in(
    app,
    TaskScope::Owned,
    reference
  )?;

  let parsed =
    parse_args(&args[1..], now)?;
  let mut form =
    TaskForm::from_task(&existing);
  if !parsed.words.is_empty() {
    form.title = parsed.text();
  }
  parsed.apply_to_form(&mut form)?;

  let edited =
    form.apply_to(Some(&existing), now)?;
  if edited == existing {
    println!("Nothing to change.");
    return Ok(());
  }
  app.gateway.save(&edited)?;
  println!("Task updated!");
  Ok(())
}

#[instrument(skip(app, args, now))]
pub(super) fn cmd_done(
  app: &mut App,
  args: &[String],
  now: DateTime<Utc>
) -> anyhow::Result<()> {
  info!("command done");
  let reference = first_arg(
    args,
    "done REF [archive:yes|no]"
  )?;
  let task =
    find_in(app, TaskScope::All, reference)?;
  let preset =
    parse_args(&args[1..], now)?.archive();

  let gateway = app.gateway.clone();
  let console = &mut app.console;
  let outcome = toggle_completion(
    &gateway,
    &task,
    |task| {
      preset.unwrap_or_else(|| {
        console
          .confirm(&format!(
            "Would you like to move \
             '{}' to archive?",
            task.title
          ))
          .unwrap_or_else(|err| {
            warn!(error = %err, "archive prompt failed; keeping task active");
            false
          })
      })
    }
  )?;

  match outcome {
    | ToggleOutcome::Reopened => {
      println!("Task marked as not done.")
    }
    | ToggleOutcome::Completed => {
      println!("Task completed")
    }
    | ToggleOutcome::CompletedAndArchived => {
      println!("Task archived")
    }
  }
  Ok(())
}

pub(super) fn cmd_info(
  app: &mut App,
  args: &[String]
) -> anyhow::Result<()> {
  let reference =
    first_arg(args, "info REF")?;
  let task = find_in(
    app,
    TaskScope::Owned,
    reference
  )?;
  app.renderer.print_task_info(&task)
}

#[instrument(skip(app, args))]
pub(super) fn cmd_delete(
  app: &mut App,
  args: &[String]
) -> anyhow::Result<()> {
  info!("command delete");
  let reference =
    first_arg(args, "delete REF")?;
  let task =
    find_in(app, TaskScope::All, reference)?;

  if !app.confirm(&format!(
    "Are you sure you want to delete \
     '{}'?",
    task.title
  ))? {
    println!("Cancelled.");
    return Ok(());
  }
  app.gateway.delete(&task.id)?;
  println!("Task deleted");
  Ok(())
}

#[instrument(skip(app, args))]
pub(super) fn cmd_archive(
  app: &mut App,
  args: &[String]
) -> anyhow::Result<()> {
  info!("command archive");
  let reference =
    first_arg(args, "archive REF")?;
  let task =
    find_in(app, TaskScope::All, reference)?;
  app.gateway.archive(&task.id)?;
  println!("Task archived");
  Ok(())
}

#[instrument(skip(app, args))]
pub(super) fn cmd_restore(
  app: &mut App,
  args: &[String]
) -> anyhow::Result<()> {
  info!("command restore");
  let reference =
    first_arg(args, "restore REF")?;
  let task = find_in(
    app,
    TaskScope::Archived,
    reference
  )?;
  app.gateway.unarchive(&task.id)?;
  println!("Task restored");
  Ok(())
}

/// Permanent removal, only from the
/// archive.
#[instrument(skip(app, args))]
pub(super) fn cmd_purge(
  app: &mut App,
  args: &[String]
) -> anyhow::Result<()> {
  info!("command purge");
  let reference =
    first_arg(args, "purge REF")?;
  let task = find_in(
    app,
    TaskScope::Archived,
    reference
  )?;

  if !app.confirm(&format!(
    "Permanently delete '{}'? This \
     cannot be undone.",
    task.title
  ))? {
    println!("Cancelled.");
    return Ok(());
  }
  app.gateway.delete(&task.id)?;
  println!("Task permanently deleted");
  Ok(())
}

#[instrument(skip(app))]
pub(super) fn cmd_clear(
  app: &mut App
) -> anyhow::Result<()> {
  info!("command clear");
  app.require_session()?;
  let count = app
    .gateway
    .fetch(TaskScope::Owned)?
    .len();
  if count == 0 {
    println!("No tasks to delete.");
    return Ok(());
  }

  if !app.confirm(&format!(
    "Delete all {count} task(s), \
     archived ones included? This \
     cannot be undone."
  ))? {
    println!("Cancelled.");
    return Ok(());
  }

  let removed = app.gateway.delete_all()?;
  println!("Deleted {removed} task(s).");
  Ok(())
}
