use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const SETTINGS_FILE: &str = "settings.toml";

/// Per-device preferences kept beside the data files. Only the email is
/// remembered for pre-filling the login prompt; credentials never are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub last_email: Option<String>,
    pub logged_in: bool,
}

impl Settings {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(SETTINGS_FILE)
    }

    /// Missing file yields defaults. A file that no longer parses is logged
    /// and replaced by defaults on the next save.
    pub fn load(data_dir: &Path) -> anyhow::Result<Self> {
        let path = Self::path(data_dir);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        match toml::from_str(&raw) {
            Ok(settings) => Ok(settings),
            Err(err) => {
                warn!(file = %path.display(), error = %err, "ignoring unreadable settings");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, data_dir: &Path) -> anyhow::Result<()> {
        let path = Self::path(data_dir);
        let rendered = toml::to_string_pretty(self).context("failed to encode settings")?;

        let mut temp = NamedTempFile::new_in(data_dir)
            .with_context(|| format!("failed to create temp file in {}", data_dir.display()))?;
        temp.write_all(rendered.as_bytes())
            .context("failed to write settings")?;
        temp.persist(&path)
            .map_err(|err| anyhow!("failed to persist {}: {err}", path.display()))?;
        debug!(file = %path.display(), "saved settings");
        Ok(())
    }

    pub fn remember_login(&mut self, email: &str) {
        self.last_email = Some(email.trim().to_string());
        self.logged_in = true;
    }

    /// Keeps the email for the next prompt.
    pub fn forget_session(&mut self) {
        self.logged_in = false;
    }
}
