//! Agent configuration.
//!
//! Loaded from a JSON file, then overridden by environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use du_agent_handlers::DownloadOptions;
use serde::Deserialize;

use crate::error::{AgentError, Result};

/// Configuration of the agent daemon.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Root under which every deployment gets its work folder.
    #[serde(default = "AgentConfig::default_sandbox_root")]
    pub sandbox_root: PathBuf,

    /// Installed-criteria persistence file.
    #[serde(default = "AgentConfig::default_installed_criteria_file")]
    pub installed_criteria_file: PathBuf,

    /// The privileged launcher executable.
    #[serde(default = "AgentConfig::default_launcher_path")]
    pub launcher_path: PathBuf,

    /// How long a single payload download keeps retrying, in seconds.
    #[serde(default = "AgentConfig::default_download_retry_timeout")]
    pub download_retry_timeout_seconds: u64,

    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default = "AgentConfig::default_log_level")]
    pub log_level: String,

    /// Run leaf update types through the simulator instead of the launcher.
    #[serde(default)]
    pub simulate: bool,

    /// Script for the simulator. Every operation succeeds without one.
    #[serde(default)]
    pub simulator_script: Option<PathBuf>,

    /// Component inventory. Without one no component enumerator is
    /// registered and every step targets the host.
    #[serde(default)]
    pub components_inventory: Option<PathBuf>,
}

impl AgentConfig {
    fn default_sandbox_root() -> PathBuf {
        PathBuf::from("/var/lib/du-agent/downloads")
    }

    fn default_installed_criteria_file() -> PathBuf {
        PathBuf::from("/var/lib/du-agent/installedcriteria")
    }

    fn default_launcher_path() -> PathBuf {
        PathBuf::from("/usr/lib/du-agent/du-shell")
    }

    const fn default_download_retry_timeout() -> u64 {
        86_400 // 24 hours
    }

    fn default_log_level() -> String {
        "info,du_agent=debug".to_string()
    }

    /// Load the configuration from `path`, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::ConfigRead` if the file cannot be read, or
    /// `AgentError::ConfigParse` if it is not a valid configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|source| AgentError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_str(&data).map_err(|e| AgentError::ConfigParse(e.to_string()))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// The default configuration with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Override fields from variables looked up with `lookup`.
    ///
    /// Supported variables:
    /// - `DU_AGENT_SANDBOX_ROOT`
    /// - `DU_AGENT_INSTALLED_CRITERIA_FILE`
    /// - `DU_AGENT_LAUNCHER`
    /// - `DU_AGENT_DOWNLOAD_RETRY_TIMEOUT` (seconds)
    /// - `DU_AGENT_LOG_LEVEL`
    /// - `DU_AGENT_SIMULATE` (`1`/`true`)
    /// - `DU_AGENT_COMPONENTS_INVENTORY`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("DU_AGENT_SANDBOX_ROOT") {
            self.sandbox_root = val.into();
        }
        if let Some(val) = lookup("DU_AGENT_INSTALLED_CRITERIA_FILE") {
            self.installed_criteria_file = val.into();
        }
        if let Some(val) = lookup("DU_AGENT_LAUNCHER") {
            self.launcher_path = val.into();
        }
        if let Some(val) = lookup("DU_AGENT_DOWNLOAD_RETRY_TIMEOUT") {
            if let Ok(n) = val.parse() {
                self.download_retry_timeout_seconds = n;
            }
        }
        if let Some(val) = lookup("DU_AGENT_LOG_LEVEL") {
            self.log_level = val;
        }
        if let Some(val) = lookup("DU_AGENT_SIMULATE") {
            self.simulate = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(val) = lookup("DU_AGENT_COMPONENTS_INVENTORY") {
            self.components_inventory = Some(val.into());
        }
    }

    /// Get the download retry timeout as a `Duration`.
    #[must_use]
    pub const fn download_retry_timeout(&self) -> Duration {
        Duration::from_secs(self.download_retry_timeout_seconds)
    }

    /// Download options handed to every handler.
    #[must_use]
    pub const fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            retry_timeout: self.download_retry_timeout(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            sandbox_root: Self::default_sandbox_root(),
            installed_criteria_file: Self::default_installed_criteria_file(),
            launcher_path: Self::default_launcher_path(),
            download_retry_timeout_seconds: Self::default_download_retry_timeout(),
            log_level: Self::default_log_level(),
            simulate: false,
            simulator_script: None,
            components_inventory: None,
        }
    }
}
