use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::view::SortMode;

const TODORC_ENV_VAR: &str = "TODORC";
const TODORC_FILE: &str = ".todorc";
const DEFAULT_DATA_DIR: &str =
  ".smartdo";

/// Flat `key = value` settings read
/// from the rc file, layered over
/// built-in defaults and under command
/// line overrides.
#[derive(Debug, Clone)]
pub struct Config {
  map:              HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("data.location", "~/.smartdo"),
      ("default.command", "list"),
      ("default.sort", "created"),
      ("confirmation", "on"),
      ("color", "on")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }
    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    todorc_override
  ))]
  pub fn load(
    todorc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let todorc = resolve_todorc_path(
      todorc_override
    )?;
    if let Some(path) = todorc {
      info!(todorc = %path.display(), "loading todorc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no todorc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  /// `default.sort`, falling back to
  /// creation order when unset or
  /// unrecognised.
  pub fn default_sort(
    &self
  ) -> SortMode {
    match self.map.get("default.sort")
    {
      | Some(raw) => {
        raw.parse().unwrap_or_else(
          |err| {
            warn!(value = %raw, error = %err, "ignoring bad default.sort");
            SortMode::default()
          }
        )
      }
      | None => SortMode::default()
    }
  }

  /// Reads one rc file, recursing into
  /// its `include` lines. Relative
  /// includes resolve against the
  /// including file's directory. A file
  /// already loaded is skipped, which
  /// breaks include cycles.
  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let path = fs::canonicalize(&path)
      .unwrap_or(path);
    if self.loaded_files.contains(&path) {
      warn!(file = %path.display(), "rc file already loaded; skipping include");
      return Ok(());
    }
    let text = fs::read_to_string(&path)
      .with_context(|| {
        format!(
          "failed to read {}",
          path.display()
        )
      })?;
    self.loaded_files.push(path.clone());
    let dir = path
      .parent()
      .unwrap_or(Path::new("."));

    for (index, raw) in
      text.lines().enumerate()
    {
      let line_no = index + 1;
      match RcLine::parse(raw) {
        | Some(RcLine::Include(target)) => {
          let target = expand_tilde(
            Path::new(target)
          );
          let target = dir.join(target);
          if target.is_file() {
            debug!(include = %target.display(), line_no, "following include");
            self.load_file(&target)?;
          } else {
            warn!(include = %target.display(), line_no, "include not found; skipping");
          }
        }
        | Some(RcLine::Setting(
          key,
          value
        )) => {
          trace!(key, value, "rc setting");
          self.map.insert(
            key.to_string(),
            value.to_string()
          );
        }
        | Some(RcLine::Malformed) => {
          return Err(anyhow!(
            "{}:{line_no}: expected \
             `key = value`, got: \
             {raw}",
            path.display()
          ));
        }
        | None => {}
      }
    }
    Ok(())
  }
}

enum RcLine<'a> {
  Include(&'a str),
  Setting(&'a str, &'a str),
  Malformed
}

impl<'a> RcLine<'a> {
  /// `None` for blank and comment-only
  /// lines.
  fn parse(raw: &'a str) -> Option<Self> {
    let line = raw
      .split('#')
      .next()
      .unwrap_or_default()
      .trim();
    if line.is_empty() {
      return None;
    }
    if let Some(target) =
      line.strip_prefix("include ")
      && !target.trim().is_empty()
    {
      return Some(Self::Include(
        target.trim()
      ));
    }
    Some(match line.split_once('=') {
      | Some((key, value))
        if !key.trim().is_empty() =>
      {
        Self::Setting(
          key.trim(),
          value.trim()
        )
      }
      | _ => Self::Malformed
    })
  }
}

/// `--data` wins over `data.location`.
/// The directory is created when
/// missing.
#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    home_dir()?.join(DEFAULT_DATA_DIR)
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

/// `--todorc`, then `$TODORC`
/// (`/dev/null` disables the file), then
/// `~/.todorc` if it exists.
fn resolve_todorc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  match (
    override_path,
    std::env::var_os(TODORC_ENV_VAR)
  ) {
    | (Some(path), _) => {
      Ok(Some(path.to_path_buf()))
    }
    | (None, Some(env))
      if env == "/dev/null" =>
    {
      Ok(None)
    }
    | (None, Some(env)) => {
      Ok(Some(PathBuf::from(env)))
    }
    | (None, None) => {
      let candidate =
        home_dir()?.join(TODORC_FILE);
      Ok(
        candidate
          .is_file()
          .then_some(candidate)
      )
    }
  }
}

fn home_dir() -> anyhow::Result<PathBuf>
{
  dirs::home_dir().context(
    "cannot determine home directory"
  )
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::{
    Config,
    resolve_data_dir
  };
  use crate::view::SortMode;

  #[test]
  fn defaults_apply_without_rc_file() {
    let cfg = Config::default();
    assert_eq!(
      cfg.get("default.command")
        .as_deref(),
      Some("list")
    );
    assert_eq!(
      cfg.default_sort(),
      SortMode::CreatedDate
    );
    assert_eq!(
      cfg.get_bool("color"),
      Some(true)
    );
  }

  #[test]
  fn rc_file_includes_and_overrides_layer_in_order()
   {
    let temp =
      tempdir().expect("tempdir");
    fs::write(
      temp.path().join("extra.rc"),
      "color = off\n"
    )
    .expect("write include");
    let rc = temp.path().join("todorc");
    fs::write(
      &rc,
      "# personal\ndefault.sort = due  \
       # trailing\ninclude extra.rc\n\
       include missing.rc\n"
    )
    .expect("write rc");

    let mut cfg = Config::load(Some(&rc))
      .expect("load");
    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(
      cfg.default_sort(),
      SortMode::DueDate
    );
    assert_eq!(
      cfg.get_bool("color"),
      Some(false)
    );

    cfg.apply_overrides([(
      "rc.default.sort".to_string(),
      "priority".to_string()
    )]);
    assert_eq!(
      cfg.default_sort(),
      SortMode::Priority
    );
  }

  #[test]
  fn include_cycles_load_each_file_once()
   {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("todorc");
    fs::write(
      &rc,
      "include todorc\ninclude ./loop.rc\n\
       default.sort = priority\n"
    )
    .expect("write rc");
    fs::write(
      temp.path().join("loop.rc"),
      "include todorc\ncolor = off\n"
    )
    .expect("write loop");

    let cfg = Config::load(Some(&rc))
      .expect("cyclic includes load");
    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(
      cfg.default_sort(),
      SortMode::Priority
    );
    assert_eq!(
      cfg.get_bool("color"),
      Some(false)
    );
  }

  #[test]
  fn malformed_line_is_an_error() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("todorc");
    fs::write(&rc, "just words\n")
      .expect("write rc");
    assert!(
      Config::load(Some(&rc)).is_err()
    );
  }

  #[test]
  fn data_dir_override_is_created() {
    let temp =
      tempdir().expect("tempdir");
    let wanted =
      temp.path().join("nested/data");
    let dir = resolve_data_dir(
      &Config::default(),
      Some(&wanted)
    )
    .expect("resolve");
    assert_eq!(dir, wanted);
    assert!(dir.is_dir());
  }
}
