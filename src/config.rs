//! Runtime Configuration
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `FLOWPILOT_*` environment variables.
//!
//! # Example YAML Format
//!
//! ```yaml
//! data_dir: /var/lib/flowpilot
//! workflow_ttl_secs: 3600
//! sweep_interval_secs: 600
//! audit_enabled: false
//! ```
//!
//! # Environment Overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `FLOWPILOT_DATA_DIR` | `data_dir` |
//! | `FLOWPILOT_STATE_FILE` | `state_file` |
//! | `FLOWPILOT_AUDIT_FILE` | `audit_file` |
//! | `FLOWPILOT_WORKFLOW_TTL` | `workflow_ttl_secs` |
//! | `FLOWPILOT_RESOURCE_TTL` | `resource_ttl_secs` |
//! | `FLOWPILOT_SWEEP_INTERVAL` | `sweep_interval_secs` |
//! | `FLOWPILOT_MAX_EVENT_HISTORY` | `max_event_history` |
//! | `FLOWPILOT_AUDIT_ENABLED` | `audit_enabled` |
//! | `FLOWPILOT_BLOCKING_WORKERS` | `blocking_workers` |

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Default data directory: `~/.flowpilot`, or `./.flowpilot` when no home
/// directory is known.
pub static DEFAULT_DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".flowpilot")
});

/// Default workflow state TTL (24 hours).
pub const DEFAULT_WORKFLOW_TTL_SECS: u64 = 86_400;

/// Default resource TTL (7 days).
pub const DEFAULT_RESOURCE_TTL_SECS: u64 = 604_800;

/// Default interval between expiry sweeps (1 hour).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3_600;

/// Default number of events kept in the bus history.
pub const DEFAULT_MAX_EVENT_HISTORY: usize = 1_000;

/// Errors raised while loading settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value '{value}' for {key}")]
    InvalidEnv { key: String, value: String },
}

/// Engine settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Directory holding the state file and audit log
    pub data_dir: PathBuf,

    /// Warm-tier state file; `data_dir/state.json` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    /// Audit log file; `data_dir/audit.jsonl` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_file: Option<PathBuf>,

    pub workflow_ttl_secs: u64,

    pub resource_ttl_secs: u64,

    pub sweep_interval_secs: u64,

    pub max_event_history: usize,

    pub audit_enabled: bool,

    /// Concurrent blocking actions
    pub blocking_workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: DEFAULT_DATA_DIR.clone(),
            state_file: None,
            audit_file: None,
            workflow_ttl_secs: DEFAULT_WORKFLOW_TTL_SECS,
            resource_ttl_secs: DEFAULT_RESOURCE_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            max_event_history: DEFAULT_MAX_EVENT_HISTORY,
            audit_enabled: true,
            blocking_workers: num_cpus::get(),
        }
    }
}

impl Settings {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Loads a YAML settings file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses YAML settings. An empty document yields the defaults.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Defaults, then the optional file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            Some(path) => {
                debug!("Loading settings from {}", path.display());
                Self::from_file(path)?
            }
            None => Self::default(),
        };
        settings.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `FLOWPILOT_*` overrides read through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("FLOWPILOT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("FLOWPILOT_STATE_FILE") {
            self.state_file = Some(PathBuf::from(file));
        }
        if let Some(file) = lookup("FLOWPILOT_AUDIT_FILE") {
            self.audit_file = Some(PathBuf::from(file));
        }
        override_parsed(&lookup, "FLOWPILOT_WORKFLOW_TTL", &mut self.workflow_ttl_secs)?;
        override_parsed(&lookup, "FLOWPILOT_RESOURCE_TTL", &mut self.resource_ttl_secs)?;
        override_parsed(&lookup, "FLOWPILOT_SWEEP_INTERVAL", &mut self.sweep_interval_secs)?;
        override_parsed(&lookup, "FLOWPILOT_MAX_EVENT_HISTORY", &mut self.max_event_history)?;
        override_parsed(&lookup, "FLOWPILOT_BLOCKING_WORKERS", &mut self.blocking_workers)?;

        if let Some(value) = lookup("FLOWPILOT_AUDIT_ENABLED") {
            self.audit_enabled = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: "FLOWPILOT_AUDIT_ENABLED".to_string(),
                        value,
                    })
                }
            };
        }

        Ok(self)
    }

    /// Resolved path of the warm-tier state file.
    pub fn state_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("state.json"))
    }

    /// Resolved path of the audit log.
    pub fn audit_path(&self) -> PathBuf {
        self.audit_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("audit.jsonl"))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(value) = lookup(key) {
        *target = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value,
        })?;
    }
    Ok(())
}
