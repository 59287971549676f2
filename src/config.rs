use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{alog_debug, Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// External assistant command, e.g. "claude".
    pub command: Option<String>,
    /// Directory for plan documents (default "projects").
    pub projects_dir: Option<String>,
    /// Worker pool size (default 1, fully sequential).
    pub concurrency: Option<usize>,
    /// Maximum execution attempts per task.
    pub max_attempts: Option<u32>,
    /// Base retry backoff in milliseconds.
    pub backoff_ms: Option<u64>,
    /// Per-task timeout in seconds.
    pub task_timeout_secs: Option<u64>,
}

impl Config {
    pub fn autoplan_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".autoplan"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::autoplan_dir()?.join("autoplan.toml"))
    }

    pub fn effective_command(&self) -> &str {
        self.command.as_deref().unwrap_or("claude")
    }

    pub fn projects_dir(&self) -> PathBuf {
        match &self.projects_dir {
            Some(dir) => expand_tilde(dir),
            None => PathBuf::from("projects"),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or(1).max(1)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(3).max(1)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms.unwrap_or(500))
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs.unwrap_or(600))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        alog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            alog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::autoplan_dir()?;
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        alog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
