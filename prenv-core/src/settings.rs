//! Global settings loaded from `~/.prenv/config.yaml`.
//!
//! The file is optional; every field has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::paths::{default_manifests_root, default_secrets_root, settings_path};

/// Log line format for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the GitHub REST API (GitHub Enterprise installs differ).
    pub github_api_url: String,
    /// Root of the GitOps manifest tree; `~/.prenv/manifests` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifests_root: Option<PathBuf>,
    /// Root of the mounted-secret tree; `~/.prenv/secrets` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets_root: Option<PathBuf>,
    /// Deadline for every source-host call.
    pub call_timeout_secs: u64,
    /// Deadline for a single health probe.
    pub health_timeout_secs: u64,
    /// Wall-clock deadline for one full tick.
    pub tick_deadline_secs: u64,
    /// Context string attached to commit statuses.
    pub status_context: String,
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            github_api_url: "https://api.github.com".to_string(),
            manifests_root: None,
            secrets_root: None,
            call_timeout_secs: 30,
            health_timeout_secs: 2,
            tick_deadline_secs: 120,
            status_context: "pr-ephemeral-env".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl Settings {
    pub fn manifests_root(&self, home: &Path) -> PathBuf {
        self.manifests_root
            .clone()
            .unwrap_or_else(|| default_manifests_root(home))
    }

    pub fn secrets_root(&self, home: &Path) -> PathBuf {
        self.secrets_root
            .clone()
            .unwrap_or_else(|| default_secrets_root(home))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs.max(1))
    }

    pub fn tick_deadline(&self) -> Duration {
        Duration::from_secs(self.tick_deadline_secs.max(1))
    }
}

/// Load settings, falling back to defaults when `config.yaml` is absent.
pub fn load_at(home: &Path) -> Result<Settings, ConfigError> {
    let path = settings_path(home);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path,
        message: e.to_string(),
    })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Settings, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    load_at(&home)
}
