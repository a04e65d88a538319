//! Server configuration for appstage
//!
//! Supports multiple configuration file formats:
//! - TOML (.toml)
//! - YAML (.yaml, .yml)
//! - JSON (.json)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, Result};

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(ConfigFormat::Toml),
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            "json" => Some(ConfigFormat::Json),
            _ => None,
        }
    }

    /// Detect format from file path
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Deserialize content in this format
    pub fn parse<T: serde::de::DeserializeOwned>(&self, content: &str) -> Result<T> {
        Ok(match self {
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        })
    }
}

/// SSH credentials used for git operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GitAuthEntry {
    /// SSH user, defaults to "git"
    #[serde(default)]
    pub user_id: String,
    pub key_file_path: PathBuf,
    /// Key passphrase
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SystemConfig {
    /// Schedule used for sync entries created without one
    pub default_schedule_mins: i64,
    /// How often the sync runner checks for due entries
    pub sync_tick_secs: u64,
    /// Scheduled syncs stop running after this many consecutive failures
    pub max_sync_failure_count: u32,
    /// Timeout for each git network operation
    pub git_timeout_secs: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            default_schedule_mins: DEFAULT_SCHEDULE_MINS,
            sync_tick_secs: DEFAULT_SYNC_TICK_SECS,
            max_sync_failure_count: DEFAULT_MAX_SYNC_FAILURES,
            git_timeout_secs: DEFAULT_GIT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// Git auth profile used when an app names none
    pub default_git_auth: String,
    /// Initial write access of staging apps
    pub stage_enable_write_access: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
}

/// Server configuration file (appstage.toml/yaml/json)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub system: SystemConfig,
    pub security: SecurityConfig,
    pub daemon: DaemonConfig,
    pub git_auth: HashMap<String, GitAuthEntry>,
    /// Remote url prefixes fetched from another location instead, like
    /// git's `url.<base>.insteadOf`
    pub git_url_rewrites: HashMap<String, String>,
}

impl ServerConfig {
    /// Load config from file, automatically detecting format from extension
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }

        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            Error::ConfigError(format!(
                "Unsupported config file extension: {}. Expected .toml, .yaml, .yml, or .json",
                path.display()
            ))
        })?;

        let content = std::fs::read_to_string(path)?;
        format.parse(&content)
    }

    /// Load config from file, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(Error::ConfigNotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.daemon.socket_path.clone().unwrap_or_else(socket_path)
    }

    pub fn db_path(&self) -> PathBuf {
        self.daemon.db_path.clone().unwrap_or_else(db_path)
    }
}
