use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::commands::{expand_command_abbrev, known_command_names};
use crate::config::Config;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

/// `KEY=VALUE` for `--rc`.
fn parse_rc_pair(raw: &str) -> anyhow::Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("--rc expects KEY=VALUE, got: {raw}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("--rc key is empty in: {raw}"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "todo",
    version,
    about = "smartdo: personal to-do lists from the terminal",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    /// More log output on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Less log output (-q warnings, -qq errors only).
    #[arg(short, long, action = ArgAction::Count)]
    pub quiet: u8,

    /// Override one setting for this run, e.g. `--rc color=off`.
    #[arg(long = "rc", value_name = "KEY=VALUE", value_parser = parse_rc_pair)]
    pub rc_overrides: Vec<(String, String)>,

    /// Settings file to read instead of `~/.todorc`.
    #[arg(long, value_name = "FILE")]
    pub todorc: Option<PathBuf>,

    /// Data directory, overriding `data.location`.
    #[arg(long, value_name = "DIR")]
    pub data: Option<PathBuf>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

/// Logs go to stderr so command output on stdout stays pipeable.
/// `RUST_LOG` wins over the flags when set.
pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let level = match (quiet, verbose) {
        (2.., _) => "error",
        (0, 3..) => "trace",
        (0, 2) => "debug",
        (0, 1) => "info",
        _ => "warn",
    };

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| anyhow!("invalid log filter {level}: {e}"))?,
    };

    let stderr = std::io::stderr();
    let color = stderr.is_terminal();
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(color)
        .without_time()
        .try_init()
    {
        debug!(error = %err, "tracing already initialised");
    }
    Ok(())
}

/// Pulls positional `rc.key=value` (or `rc.key:value`) tokens out of the
/// argument list before clap sees it. The program name is kept as is.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let (program, tokens) = match raw.split_first() {
        Some((program, tokens)) => (Some(program), tokens),
        None => (None, raw),
    };

    let mut pre = PreprocessedArgs {
        cleaned_args: program.into_iter().cloned().collect(),
        rc_overrides: Vec::new(),
    };
    for token in tokens {
        match token.to_str().and_then(positional_override) {
            Some((key, value)) => {
                debug!(%key, %value, "positional rc override");
                pre.rc_overrides.push((key, value));
            }
            None => pre.cleaned_args.push(token.clone()),
        }
    }
    Ok(pre)
}

fn positional_override(token: &str) -> Option<(String, String)> {
    let body = token.strip_prefix("rc.")?;
    let split = body.find(['=', ':'])?;
    let (key, value) = (&body[..split], &body[split + 1..]);
    (!key.is_empty()).then(|| (format!("rc.{key}"), value.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub command_args: Vec<String>,
}

impl Invocation {
    /// The first token names the command, abbreviations allowed. With no
    /// tokens, or when the first one is a modifier such as `sort:due`, the
    /// configured `default.command` runs with every token as its argument.
    #[tracing::instrument(skip(cfg, rest))]
    pub fn parse(cfg: &Config, rest: Vec<OsString>) -> anyhow::Result<Self> {
        let tokens: Vec<String> = rest
            .into_iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();

        let default_command = || {
            cfg.get("default.command")
                .unwrap_or_else(|| "list".to_string())
        };

        let Some(first) = tokens.first() else {
            let command = default_command();
            debug!(%command, "no explicit command, using default");
            return Ok(Self {
                command,
                command_args: vec![],
            });
        };

        if first.contains(':') {
            let command = default_command();
            debug!(%command, "leading modifier, using default command");
            return Ok(Self {
                command,
                command_args: tokens,
            });
        }

        let known = known_command_names();
        let command = expand_command_abbrev(first, &known)
            .ok_or_else(|| anyhow!("unknown or ambiguous command: {first}"))?;
        debug!(token = %first, expanded = %command, "resolved command token");

        Ok(Self {
            command: command.to_string(),
            command_args: tokens[1..].to_vec(),
        })
    }
}
