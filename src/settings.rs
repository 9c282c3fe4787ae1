//! Runtime settings for the ADB client, device controller and task executor.
//!
//! Settings are an explicit value handed to the components that need them.
//! They can be persisted in the platform config directory via
//! `directories::ProjectDirs` and overridden from the environment.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adb::{DeviceAddress, DEFAULT_ADB_HOST, DEFAULT_ADB_PORT};

/// Default score a template match must exceed.
pub const DEFAULT_TEMPLATE_THRESHOLD: f32 = 0.8;

/// Default bound on nested on_success/on_failure script calls.
pub const DEFAULT_MAX_BRANCH_DEPTH: usize = 16;

/// Settings errors.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Cannot determine config directory")]
    NoConfigDir,
    #[error("Settings file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid device address: {0}")]
    Address(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// ADB server host
    pub adb_host: String,
    /// ADB server port
    pub adb_port: u16,
    /// Target device as `host:port`
    pub device_address: String,
    /// Directory for screenshots and pulled files
    pub work_dir: PathBuf,
    /// Directory searched for `<name>.json` when a branch target is not loaded
    pub script_dir: PathBuf,
    /// Base directory for relative template image paths
    pub template_dir: PathBuf,
    /// Score a template match must exceed to count
    pub template_threshold: f32,
    /// Maximum nesting of on_success/on_failure scripts
    pub max_branch_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            adb_host: DEFAULT_ADB_HOST.to_string(),
            adb_port: DEFAULT_ADB_PORT,
            device_address: "127.0.0.1:5555".to_string(),
            work_dir: PathBuf::from("adb"),
            script_dir: PathBuf::from("scripts"),
            template_dir: PathBuf::from("."),
            template_threshold: DEFAULT_TEMPLATE_THRESHOLD,
            max_branch_depth: DEFAULT_MAX_BRANCH_DEPTH,
        }
    }
}

impl Settings {
    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "moderras", "droid-autobot")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the settings file path.
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("settings.json"))
    }

    /// Load settings from the config directory, falling back to defaults.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                tracing::warn!("Ignoring settings file {}: {}", path.display(), e);
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    /// Load settings from a JSON file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path)?;
        let loaded: Self = serde_json::from_str(&content)?;
        Ok(loaded.backfilled())
    }

    /// Save settings to the config file.
    pub fn save(&self) -> Result<(), SettingsError> {
        let dir = Self::config_dir().ok_or(SettingsError::NoConfigDir)?;
        self.save_to(dir.join("settings.json"))
    }

    /// Save settings to a specific JSON file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from process environment variables.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Recognized keys: `ADB_HOST`, `ADB_PORT`, `ADB_DEVICE`,
    /// `AUTOBOT_WORK_DIR`, `AUTOBOT_SCRIPT_DIR`, `AUTOBOT_TEMPLATE_DIR`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("ADB_HOST") {
            self.adb_host = host;
        }
        if let Some(port) = lookup("ADB_PORT") {
            match port.parse() {
                Ok(port) => self.adb_port = port,
                Err(_) => tracing::warn!("Ignoring invalid ADB_PORT {:?}", port),
            }
        }
        if let Some(device) = lookup("ADB_DEVICE") {
            self.device_address = device;
        }
        if let Some(dir) = lookup("AUTOBOT_WORK_DIR") {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("AUTOBOT_SCRIPT_DIR") {
            self.script_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("AUTOBOT_TEMPLATE_DIR") {
            self.template_dir = PathBuf::from(dir);
        }
        self
    }

    /// Parse the configured device address.
    pub fn device(&self) -> Result<DeviceAddress, SettingsError> {
        self.device_address.parse().map_err(SettingsError::Address)
    }

    // Older or hand-edited files may carry zeroed fields.
    fn backfilled(mut self) -> Self {
        let defaults = Self::default();
        if self.adb_host.is_empty() {
            self.adb_host = defaults.adb_host;
        }
        if self.adb_port == 0 {
            self.adb_port = defaults.adb_port;
        }
        if self.template_threshold <= 0.0 {
            self.template_threshold = defaults.template_threshold;
        }
        if self.max_branch_depth == 0 {
            self.max_branch_depth = defaults.max_branch_depth;
        }
        self
    }
}
