//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: which
//! repository to talk to and how to launch the login prompt.
//!
//! Configuration is stored at `~/.config/scriptrepo/config.json`. The
//! `SCRIPTREPO_URL` and `SCRIPTREPO_LOGIN_COMMAND` environment variables
//! override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::cache::DEFAULT_LOGIN_TIMEOUT;

/// Application name used for the config directory path
const APP_NAME: &str = "scriptrepo";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default repository service
pub const DEFAULT_REPOSITORY_URL: &str = "https://repo.tribot.org";

/// Default login prompt launcher
const DEFAULT_LOGIN_COMMAND: &str = "tribot-login-prompt";

pub const ENV_REPOSITORY_URL: &str = "SCRIPTREPO_URL";
pub const ENV_LOGIN_COMMAND: &str = "SCRIPTREPO_LOGIN_COMMAND";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub repository_url: Option<String>,
    pub login_command: Option<String>,
    pub login_args: Vec<String>,
    /// Directory the login prompt is started in; inherited when unset.
    pub login_working_dir: Option<PathBuf>,
    pub login_timeout_secs: Option<u64>,
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// practice). Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_REPOSITORY_URL).filter(|v| !v.is_empty()) {
            self.repository_url = Some(url);
        }
        if let Some(command) = lookup(ENV_LOGIN_COMMAND).filter(|v| !v.is_empty()) {
            self.login_command = Some(command);
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn repository_url(&self) -> &str {
        self.repository_url
            .as_deref()
            .unwrap_or(DEFAULT_REPOSITORY_URL)
            .trim_end_matches('/')
    }

    pub fn login_command(&self) -> &str {
        self.login_command.as_deref().unwrap_or(DEFAULT_LOGIN_COMMAND)
    }

    pub fn login_timeout(&self) -> Duration {
        self.login_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LOGIN_TIMEOUT)
    }
}

/// Per-user application data directory, where the saved login lives.
///
/// Windows: `%APPDATA%\.tribot`. macOS: `~/Library/Application Support/tribot`.
/// Other Unix: `~/.tribot`. Falls back to `./data` when none of those can be
/// created.
pub fn data_dir() -> PathBuf {
    let preferred = platform_data_dir();
    match preferred {
        Some(dir) => match std::fs::create_dir_all(&dir) {
            Ok(()) => dir,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Couldn't create data directory, using ./data");
                PathBuf::from("data")
            }
        },
        None => PathBuf::from("data"),
    }
}

#[cfg(target_os = "windows")]
fn platform_data_dir() -> Option<PathBuf> {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .map(|d| d.join(".tribot"))
}

#[cfg(target_os = "macos")]
fn platform_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("tribot"))
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn platform_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|d| d.join(".tribot"))
}
