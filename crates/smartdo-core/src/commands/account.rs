use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use super::App;
use super::modifiers::parse_args;
use crate::auth::{self, IdentityProvider};
use crate::validate::{LoginForm, RegistrationForm};

/// Prompts for `label` unless `given` already holds a value.
fn value_or_prompt(app: &mut App, given: Option<&str>, label: &str) -> anyhow::Result<String> {
    if let Some(value) = given.filter(|value| !value.trim().is_empty()) {
        return Ok(value.trim().to_string());
    }
    app.console
        .read_line(&format!("{label}: "))?
        .ok_or_else(|| anyhow!("{label} is required"))
}

fn password_prompt(app: &mut App, label: &str) -> anyhow::Result<String> {
    Ok(app
        .console
        .read_line(&format!("{label}: "))?
        .unwrap_or_default())
}

#[instrument(skip(app, args, now))]
pub(super) fn cmd_register(app: &mut App, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command register");
    let parsed = parse_args(args, now)?;

    let email = parsed.words.first().map(String::as_str);
    let form = RegistrationForm {
        email: value_or_prompt(app, email, "Email")?,
        full_name: value_or_prompt(app, parsed.full_name(), "Full name")?,
        username: value_or_prompt(app, parsed.username(), "Username")?,
        password: password_prompt(app, "Password")?,
        confirm_password: password_prompt(app, "Confirm password")?,
    };

    let user = auth::register(app.identity.as_ref(), app.documents(), &form, now)?;

    app.settings.remember_login(&user.email);
    app.settings.save(&app.data_dir)?;
    println!("Registration successful. Welcome, {}!", user.username);
    Ok(())
}

#[instrument(skip(app, args, now))]
pub(super) fn cmd_login(app: &mut App, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command login");
    let parsed = parse_args(args, now)?;

    let remembered = app.settings.last_email.clone();
    let email = match parsed.words.first() {
        Some(email) => email.clone(),
        None => {
            let prompt = match remembered.as_deref() {
                Some(last) => format!("Email [{last}]"),
                None => "Email".to_string(),
            };
            let typed = app.console.read_line(&format!("{prompt}: "))?.unwrap_or_default();
            if typed.trim().is_empty() {
                remembered.unwrap_or_default()
            } else {
                typed
            }
        }
    };
    let form = LoginForm {
        email: email.trim().to_string(),
        password: password_prompt(app, "Password")?,
    };
    form.validate()?;

    let session = app.identity.sign_in(&form.email, &form.password)?;
    app.settings.remember_login(&form.email);
    app.settings.save(&app.data_dir)?;

    let greeting = auth::fetch_profile(app.documents(), &session.uid)?
        .map(|user| user.username)
        .unwrap_or(session.email);
    println!("Login successful. Welcome back, {greeting}!");
    Ok(())
}

pub(super) fn cmd_logout(app: &mut App) -> anyhow::Result<()> {
    info!("command logout");
    app.identity.sign_out()?;
    app.settings.forget_session();
    app.settings.save(&app.data_dir)?;
    println!("Logged out.");
    Ok(())
}

pub(super) fn cmd_whoami(app: &mut App) -> anyhow::Result<()> {
    let session = app.require_session()?;
    match auth::fetch_profile(app.documents(), &session.uid)
        .context("failed to load profile")?
    {
        Some(user) => {
            println!("{} ({})", user.full_name, user.username);
            println!("{}", user.email);
        }
        None => println!("{}", session.email),
    }
    Ok(())
}
