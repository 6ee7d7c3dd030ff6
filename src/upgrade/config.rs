//! Updater configuration.
//!
//! Read from `updater.toml` next to the executable unless
//! `EASYLAW_UPDATER_CONFIG` points elsewhere. Every field has a default, so a
//! missing file is a valid configuration (with an unconfigured manifest URL).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::constants::{
    CONFIG_FILE_NAME, CONFIG_PATH_ENV, CURRENT_VERSION, DEFAULT_CHECK_INTERVAL_HOURS,
    DEFAULT_CHECK_TIMEOUT, DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_RESTART_DELAY,
    PLACEHOLDER_MANIFEST_URL, STATE_FILE_NAME,
};
use crate::core::UpdateError;

/// Configuration injected into the update orchestrator.
///
/// `UpdateConfig` replaces ambient constants with one explicit value that is
/// handed to [`UpdateOrchestrator`](crate::upgrade::UpdateOrchestrator) at
/// construction. It is usually read from `updater.toml` next to the
/// executable; every field has a default so a missing or partial file works.
///
/// # TOML Example
/// ```toml
/// manifest_url = "https://raw.githubusercontent.com/acme/easylaw/main/updates/latest_version.json"
/// check_interval_hours = 24
/// check_timeout_secs = 15
/// download_timeout_secs = 300
/// ```
///
/// Paths left unset are derived from the running executable:
/// - `executable_path`: `std::env::current_exe()`
/// - `state_file`: `<exe dir>/updater_state.toml`
/// - `download_dir`: `<exe dir>`, so installing the artifact is a same-filesystem rename
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// URL of the JSON version manifest.
    ///
    /// # Default: the unconfigured template URL
    ///
    /// Checks against the template fail fast with `NotConfigured`.
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,

    /// Hours that must pass between automatic checks.
    #[serde(default = "default_check_interval_hours")]
    pub check_interval_hours: f64,

    /// Timeout for the manifest request, in seconds.
    #[serde(default = "default_check_timeout_secs")]
    pub check_timeout_secs: u64,

    /// Timeout for the whole artifact download, in seconds.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Pause between spawning the new process and exiting, in milliseconds.
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Persisted update state location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    /// Where artifacts are downloaded to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,

    /// Executable that gets replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<PathBuf>,

    /// Version of the running build. Always taken from the binary itself.
    #[serde(skip, default = "default_current_version")]
    pub current_version: String,
}

fn default_manifest_url() -> String {
    PLACEHOLDER_MANIFEST_URL.to_string()
}

fn default_check_interval_hours() -> f64 {
    DEFAULT_CHECK_INTERVAL_HOURS
}

const fn default_check_timeout_secs() -> u64 {
    DEFAULT_CHECK_TIMEOUT.as_secs()
}

const fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT.as_secs()
}

const fn default_restart_delay_ms() -> u64 {
    DEFAULT_RESTART_DELAY.as_millis() as u64
}

fn default_current_version() -> String {
    CURRENT_VERSION.to_string()
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            manifest_url: default_manifest_url(),
            check_interval_hours: default_check_interval_hours(),
            check_timeout_secs: default_check_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            restart_delay_ms: default_restart_delay_ms(),
            state_file: None,
            download_dir: None,
            executable_path: None,
            current_version: default_current_version(),
        }
    }
}

impl UpdateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.manifest_url = url.into();
        self
    }

    #[must_use]
    pub fn with_current_version(mut self, version: impl Into<String>) -> Self {
        self.current_version = version.into();
        self
    }

    #[must_use]
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_download_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_executable_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_check_interval_hours(mut self, hours: f64) -> Self {
        self.check_interval_hours = hours;
        self
    }

    #[must_use]
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    #[must_use]
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// The executable that will be replaced.
    pub fn resolve_executable_path(&self) -> Result<PathBuf, UpdateError> {
        match &self.executable_path {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe()
                .map_err(|e| UpdateError::io("locate", "current executable", e)),
        }
    }

    /// Directory the application lives in.
    pub fn app_dir(&self) -> Result<PathBuf, UpdateError> {
        let exe = self.resolve_executable_path()?;
        Ok(exe.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Location of the persisted update state.
    ///
    /// Falls back to the user's local data directory when the executable path
    /// cannot be determined.
    #[must_use]
    pub fn resolve_state_file(&self) -> PathBuf {
        if let Some(path) = &self.state_file {
            return path.clone();
        }
        match self.app_dir() {
            Ok(dir) => dir.join(STATE_FILE_NAME),
            Err(_) => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("easylaw")
                .join(STATE_FILE_NAME),
        }
    }

    pub fn resolve_download_dir(&self) -> Result<PathBuf, UpdateError> {
        match &self.download_dir {
            Some(dir) => Ok(dir.clone()),
            None => self.app_dir(),
        }
    }

    /// Default config location: next to the executable, unless overridden by
    /// the `EASYLAW_UPDATER_CONFIG` environment variable.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        let exe = std::env::current_exe().context("Failed to determine current executable path")?;
        let dir = exe.parent().context("Executable has no parent directory")?;
        Ok(dir.join(CONFIG_FILE_NAME))
    }

    /// Load from `path`, or the default location when `None`. A missing file
    /// yields the defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load_from(&path).await
        } else {
            Ok(Self::default())
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read updater config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse updater config from {}", path.display()))
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize updater config")?;

        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write updater config to {}", path.display()))
    }
}
