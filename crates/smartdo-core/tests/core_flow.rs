use std::ffi::OsString;
use std::path::Path;

use smartdo_core::auth::IdentityProvider;
use smartdo_core::cli::Invocation;
use smartdo_core::commands::{App, Console, dispatch};
use smartdo_core::config::Config;
use smartdo_core::gateway::TaskScope;
use smartdo_core::render::Renderer;
use smartdo_core::settings::Settings;
use smartdo_core::task::{Category, Priority};
use tempfile::tempdir;

fn app(data_dir: &Path, answers: &[&str]) -> App {
    let mut cfg = Config::default();
    cfg.apply_overrides([("rc.confirmation".to_string(), "off".to_string())]);
    App::open(
        cfg,
        data_dir.to_path_buf(),
        Renderer::plain(),
        Console::scripted(answers),
    )
    .expect("open app")
}

fn run(app: &mut App, args: &[&str]) -> anyhow::Result<()> {
    let tokens = args.iter().map(OsString::from).collect();
    let inv = Invocation::parse(&app.cfg, tokens)?;
    dispatch(app, inv)
}

#[test]
fn register_add_complete_archive_and_purge() {
    let temp = tempdir().expect("tempdir");

    let mut app = app(temp.path(), &["Ada Lovelace", "ada", "secret1", "secret1"]);
    run(&mut app, &["register", "ada@example.com"]).expect("register");
    assert!(app.identity.current_session().is_some());

    run(
        &mut app,
        &["add", "Buy", "groceries", "pri:high", "cat:shopping", "due:2026-01-12"],
    )
    .expect("add");
    run(&mut app, &["add", "Call", "mom"]).expect("add second");

    let active = app.gateway.fetch(TaskScope::All).expect("fetch");
    assert_eq!(active.len(), 2);
    let groceries = active
        .iter()
        .find(|task| task.title == "Buy groceries")
        .expect("groceries")
        .clone();
    assert_eq!(groceries.priority, Priority::High);
    assert_eq!(groceries.category, Category::Shopping);
    assert!(groceries.due_date.is_some());

    run(&mut app, &["list", "sort:due", "search:groc"]).expect("list");
    run(&mut app, &["list", "cat:shopping"]).expect("list by category");
    run(&mut app, &["calendar", "2026-01-12"]).expect("calendar");
    run(&mut app, &["stats"]).expect("stats");

    let prefix = &groceries.id[..6];
    run(&mut app, &["done", prefix, "archive:yes"]).expect("done");
    let archived = app.gateway.fetch(TaskScope::Archived).expect("archived");
    assert_eq!(archived.len(), 1);
    assert!(archived[0].is_completed);
    assert_eq!(app.gateway.fetch(TaskScope::All).expect("active").len(), 1);

    run(&mut app, &["restore", prefix]).expect("restore");
    assert_eq!(app.gateway.fetch(TaskScope::Completed).expect("completed").len(), 1);

    run(&mut app, &["edit", prefix, "Buy", "more", "groceries", "pri:low"]).expect("edit");
    let edited = app
        .gateway
        .get_by_id(&groceries.id)
        .expect("get")
        .expect("exists");
    assert_eq!(edited.title, "Buy more groceries");
    assert_eq!(edited.priority, Priority::Low);
    assert_eq!(edited.created_at, groceries.created_at);

    assert!(run(&mut app, &["purge", prefix]).is_err(), "purge needs an archived task");
    run(&mut app, &["archive", prefix]).expect("archive");
    run(&mut app, &["purge", prefix]).expect("purge");
    assert!(app.gateway.get_by_id(&groceries.id).expect("get").is_none());

    run(&mut app, &["clear"]).expect("clear");
    assert!(app.gateway.fetch(TaskScope::Owned).expect("owned").is_empty());
}

#[test]
fn logout_blocks_task_commands_and_login_reuses_last_email() {
    let temp = tempdir().expect("tempdir");

    let mut first = app(temp.path(), &["Ada Lovelace", "ada", "secret1", "secret1"]);
    run(&mut first, &["register", "ada@example.com"]).expect("register");
    run(&mut first, &["add", "Water", "plants"]).expect("add");
    run(&mut first, &["logout"]).expect("logout");

    let err = run(&mut first, &["add", "Nope"]).expect_err("signed out");
    assert!(err.to_string().contains("Please login first"));

    let settings = Settings::load(temp.path()).expect("settings");
    assert_eq!(settings.last_email.as_deref(), Some("ada@example.com"));
    assert!(!settings.logged_in);

    let mut wrong = app(temp.path(), &["", "not-the-password"]);
    assert!(run(&mut wrong, &["login"]).is_err());

    let mut second = app(temp.path(), &["", "secret1"]);
    run(&mut second, &["login"]).expect("login");
    assert_eq!(second.gateway.fetch(TaskScope::All).expect("fetch").len(), 1);
}

#[test]
fn users_never_see_each_others_tasks() {
    let temp = tempdir().expect("tempdir");

    let mut ada = app(temp.path(), &["Ada Lovelace", "ada", "secret1", "secret1"]);
    run(&mut ada, &["register", "ada@example.com"]).expect("register ada");
    run(&mut ada, &["add", "Ada's", "task"]).expect("add");

    let mut grace = app(temp.path(), &["Grace Hopper", "grace", "cobol60", "cobol60"]);
    run(&mut grace, &["register", "grace@example.com"]).expect("register grace");
    assert!(grace.gateway.fetch(TaskScope::Owned).expect("fetch").is_empty());

    let ada_tasks = ada.gateway.fetch(TaskScope::All).expect("fetch");
    assert!(run(&mut grace, &["delete", ada_tasks[0].id.as_str()]).is_err());
    assert_eq!(ada.gateway.fetch(TaskScope::All).expect("fetch").len(), 1);
}
