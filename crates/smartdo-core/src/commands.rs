mod account;
mod modifiers;
mod task_ops;
mod views;

use std::io::{self, BufRead, Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::auth::{IdentityProvider, LocalIdentityProvider, Session};
use crate::cli::Invocation;
use crate::config::Config;
use crate::docstore::{DocumentStore, FileStore};
use crate::gateway::TaskGateway;
use crate::render::Renderer;
use crate::settings::Settings;
use crate::task::Task;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "register",
        "login",
        "logout",
        "whoami",
        "add",
        "edit",
        "list",
        "pending",
        "completed",
        "done",
        "info",
        "delete",
        "archive",
        "archived",
        "restore",
        "purge",
        "clear",
        "calendar",
        "stats",
        "_commands",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Line-oriented input for prompts. Prompts go to stderr so stdout stays
/// clean for piping.
pub struct Console {
    input: Box<dyn BufRead>,
}

impl Console {
    pub fn stdin() -> Self {
        Self {
            input: Box::new(io::BufReader::new(io::stdin())),
        }
    }

    /// Answers prompts from `lines` in order, then behaves like EOF.
    pub fn scripted(lines: &[&str]) -> Self {
        let mut text = lines.join("\n");
        text.push('\n');
        Self {
            input: Box::new(Cursor::new(text.into_bytes())),
        }
    }

    /// `None` at end of input.
    pub fn read_line(&mut self, prompt: &str) -> anyhow::Result<Option<String>> {
        eprint!("{prompt}");
        io::stderr().flush().ok();

        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("failed to read from input")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    pub fn confirm(&mut self, question: &str) -> anyhow::Result<bool> {
        let answer = self.read_line(&format!("{question} (y/N) "))?;
        Ok(answer.is_some_and(|text| {
            matches!(text.trim().to_ascii_lowercase().as_str(), "y" | "yes")
        }))
    }
}

/// Everything a command needs, assembled once per invocation.
pub struct App {
    pub cfg: Config,
    pub data_dir: PathBuf,
    pub store: Arc<FileStore>,
    pub identity: Arc<LocalIdentityProvider>,
    pub gateway: Arc<TaskGateway>,
    pub settings: Settings,
    pub renderer: Renderer,
    pub console: Console,
}

impl App {
    #[instrument(skip(cfg, renderer, console))]
    pub fn open(
        cfg: Config,
        data_dir: PathBuf,
        renderer: Renderer,
        console: Console,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(
            FileStore::open(&data_dir)
                .with_context(|| format!("failed to open data store at {}", data_dir.display()))?,
        );
        let identity = Arc::new(
            LocalIdentityProvider::open(store.clone(), &data_dir)
                .context("failed to restore session")?,
        );
        let gateway = Arc::new(TaskGateway::new(store.clone(), identity.clone()));
        let settings = Settings::load(&data_dir)?;
        if settings.logged_in && identity.current_session().is_none() {
            debug!("settings say logged in but no session is present");
        }

        Ok(Self {
            cfg,
            data_dir,
            store,
            identity,
            gateway,
            settings,
            renderer,
            console,
        })
    }

    pub fn documents(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn require_session(&self) -> anyhow::Result<Session> {
        self.identity
            .current_session()
            .ok_or_else(|| anyhow!("Please login first (todo login)"))
    }

    /// Asks before destructive actions unless `confirmation` is off.
    pub fn confirm(&mut self, question: &str) -> anyhow::Result<bool> {
        if !self.cfg.get_bool("confirmation").unwrap_or(true) {
            debug!(question, "confirmation disabled, accepting");
            return Ok(true);
        }
        self.console.confirm(question)
    }
}

#[instrument(skip(app, inv))]
pub fn dispatch(app: &mut App, inv: Invocation) -> anyhow::Result<()> {
    let now = Utc::now();
    let command = inv.command.as_str();
    let args = inv.command_args.as_slice();

    debug!(command, ?args, "dispatching command");

    match command {
        "register" => account::cmd_register(app, args, now),
        "login" => account::cmd_login(app, args, now),
        "logout" => account::cmd_logout(app),
        "whoami" => account::cmd_whoami(app),
        "add" => task_ops::cmd_add(app, args, now),
        "edit" => task_ops::cmd_edit(app, args, now),
        "done" => task_ops::cmd_done(app, args, now),
        "info" => task_ops::cmd_info(app, args),
        "delete" => task_ops::cmd_delete(app, args),
        "archive" => task_ops::cmd_archive(app, args),
        "restore" => task_ops::cmd_restore(app, args),
        "purge" => task_ops::cmd_purge(app, args),
        "clear" => task_ops::cmd_clear(app),
        "list" | "pending" | "completed" | "archived" => {
            views::cmd_list(app, command, args, now)
        }
        "calendar" => views::cmd_calendar(app, args, now),
        "stats" => views::cmd_stats(app, now),
        "_commands" => cmd_commands(),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

fn cmd_commands() -> anyhow::Result<()> {
    for command in known_command_names() {
        println!("{command}");
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "\
usage: todo [--todorc FILE] [--data DIR] [-v|-q] <command> [args]

account
  register [EMAIL] [name:FULL] [user:NAME]   create an account and sign in
  login [EMAIL]                              sign in (email defaults to the last one used)
  logout                                     sign out
  whoami                                     show the signed-in profile

tasks
  add TITLE [mods]                           create a task
  edit REF [TITLE] [mods]                    change a task
  done REF [archive:yes|no]                  toggle completion
  info REF                                   show one task
  delete REF                                 delete a task
  archive REF | restore REF                  move to or from the archive
  purge REF                                  permanently delete an archived task
  clear                                      delete every task you own

views
  list [cat:NAME|all] [sort:due|priority|created] [search:TEXT]
  pending | completed | archived             same modifiers as list
  calendar [DATE]                            tasks due on a day (default today)
  stats                                      totals and breakdowns

modifiers
  due:DATE|none  pri:high|medium|low  cat:general|work|personal|shopping|study  desc:TEXT

REF is a task id or a unique prefix of one."
    );
    Ok(())
}

/// Finds the task whose id equals `reference` or, failing that, the only
/// one whose id starts with it.
pub(crate) fn resolve_task(tasks: &[Task], reference: &str) -> anyhow::Result<Task> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(anyhow!("a task id is required"));
    }
    if let Some(exact) = tasks.iter().find(|task| task.id == reference) {
        return Ok(exact.clone());
    }

    let mut matches = tasks.iter().filter(|task| task.id.starts_with(reference));
    match (matches.next(), matches.next()) {
        (Some(only), None) => Ok(only.clone()),
        (None, _) => Err(anyhow!("no task matches '{reference}'")),
        (Some(_), Some(_)) => {
            warn!(reference, "ambiguous task reference");
            Err(anyhow!(
                "'{reference}' matches more than one task; use more characters"
            ))
        }
    }
}

pub(crate) fn first_arg<'a>(args: &'a [String], usage: &str) -> anyhow::Result<&'a str> {
    args.first()
        .map(String::as_str)
        .ok_or_else(|| anyhow!("usage: todo {usage}"))
}

pub(crate) fn today(now: DateTime<Utc>) -> chrono::NaiveDate {
    crate::datetime::to_project_date(now)
}
