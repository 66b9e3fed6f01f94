use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::db::project_dirs;
use crate::scheduler::SchedulerTiming;

/// Runtime configuration: defaults, overlaid by a TOML file, overlaid by `KIOSK_*`
/// environment variables. Command-line flags are applied on top by the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base_url: String,
    pub content_path: String,
    pub player_path: String,
    /// `None` means the SQLite file in the user's data directory.
    pub database_url: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub sync_interval_secs: u64,
    pub max_download_attempts: u32,
    pub video_load_timeout_secs: u64,
    pub idle_interval_ms: u64,
    pub error_backoff_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".into(),
            content_path: "/content/".into(),
            player_path: "/player/".into(),
            database_url: None,
            cache_dir: None,
            sync_interval_secs: 10,
            max_download_attempts: 3,
            video_load_timeout_secs: 30,
            idle_interval_ms: 1000,
            error_backoff_ms: 1000,
        }
    }
}

impl Settings {
    /// Read settings from `path`, or from the default config location when it exists, then
    /// apply environment overrides. An explicit path that cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_config_path() {
                Some(p) if p.is_file() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file: {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing config file: {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|p| p.config_dir().join("kiosk.toml"))
    }

    /// Overlay `KIOSK_*` variables as reported by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("KIOSK_API_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = lookup("KIOSK_DATABASE_URL") {
            self.database_url = Some(v);
        }
        if let Some(v) = lookup("KIOSK_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("KIOSK_SYNC_INTERVAL_SECS") {
            self.sync_interval_secs = v
                .trim()
                .parse()
                .with_context(|| format!("KIOSK_SYNC_INTERVAL_SECS is not a number: {v:?}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_interval_secs == 0 {
            bail!("sync_interval_secs must be greater than zero");
        }
        if self.max_download_attempts == 0 {
            bail!("max_download_attempts must be greater than zero");
        }
        if self.api_base_url.trim().is_empty() {
            bail!("api_base_url must not be empty");
        }
        Ok(())
    }

    /// Where downloaded media lives: the configured directory, else the user's cache
    /// directory, else a folder under the system temp dir.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        match project_dirs() {
            Some(p) => p.cache_dir().join("content"),
            None => std::env::temp_dir().join("player").join("content"),
        }
    }

    pub fn sync_interval(&self) -> Duration { Duration::from_secs(self.sync_interval_secs) }

    pub fn timing(&self) -> SchedulerTiming {
        SchedulerTiming {
            idle_interval: Duration::from_millis(self.idle_interval_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
            video_load_timeout: Duration::from_secs(self.video_load_timeout_secs),
        }
    }
}
