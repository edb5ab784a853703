//! Service configuration loaded from YAML.
//!
//! Every problem found here is fatal at startup: the service never runs with
//! a watch path that is missing or a timestamp layout it cannot render.

use crate::intake::normalize_extension;
use crate::rotation::TimestampLayout;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Watch path does not exist: {0}")]
    WatchPathMissing(PathBuf),

    #[error("Watch path is not a directory: {0}")]
    WatchPathNotDirectory(PathBuf),

    #[error("{field} must be a positive number of seconds, got {value}")]
    InvalidDuration { field: &'static str, value: f64 },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Verbosity accepted in the `log_level` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[serde(alias = "WARN")]
    Warning,
    Error,
}

impl LogLevel {
    /// The equivalent `tracing` filter directive.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        })
    }
}

fn default_stability_timeout() -> f64 {
    5.0
}

fn default_stability_interval() -> f64 {
    0.1
}

fn default_trigger_command() -> String {
    "claude".to_string()
}

fn default_trigger_args() -> Vec<String> {
    vec!["-p".to_string()]
}

fn default_trigger_timeout() -> f64 {
    300.0
}

fn default_shutdown_timeout() -> f64 {
    5.0
}

fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("file-intake.log"))
}

/// Complete service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Directory to watch for new files.
    pub watch_path: PathBuf,
    /// Prompt template passed to the trigger, followed by the file path.
    pub claude_prompt: String,
    /// Extensions to watch; empty means every file.
    #[serde(default)]
    pub file_extensions: Vec<String>,
    /// Rename files but skip the external trigger.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub timestamp_format: TimestampLayout,
    /// Queue files already in the directory at startup.
    #[serde(default)]
    pub process_existing_files: bool,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default = "default_stability_timeout")]
    pub file_stability_timeout: f64,
    #[serde(default = "default_stability_interval")]
    pub file_stability_check_interval: f64,
    #[serde(default = "default_trigger_command")]
    pub trigger_command: String,
    #[serde(default = "default_trigger_args")]
    pub trigger_args: Vec<String>,
    #[serde(default = "default_trigger_timeout")]
    pub trigger_timeout: f64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: f64,
    /// Log file to append to; `null` disables file logging.
    #[serde(default = "default_log_file")]
    pub log_file: Option<PathBuf>,
}

impl ServiceConfig {
    /// Load and validate a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = serde_yaml::from_str(raw)?;
        config.validate()
    }

    /// Check the configuration and normalize paths and extensions.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        let watch_path = expand_home(&self.watch_path);
        if !watch_path.exists() {
            return Err(ConfigError::WatchPathMissing(self.watch_path));
        }
        if !watch_path.is_dir() {
            return Err(ConfigError::WatchPathNotDirectory(self.watch_path));
        }
        self.watch_path = watch_path
            .canonicalize()
            .map_err(|source| ConfigError::Read {
                path: watch_path.clone(),
                source,
            })?;

        self.file_extensions = self
            .file_extensions
            .iter()
            .map(|ext| normalize_extension(ext))
            .collect();

        if self.trigger_command.trim().is_empty() {
            return Err(ConfigError::Empty("trigger_command"));
        }

        for (field, value) in [
            ("file_stability_timeout", self.file_stability_timeout),
            ("file_stability_check_interval", self.file_stability_check_interval),
            ("trigger_timeout", self.trigger_timeout),
            ("shutdown_timeout", self.shutdown_timeout),
        ] {
            if !(value > 0.0) || Duration::try_from_secs_f64(value).is_err() {
                return Err(ConfigError::InvalidDuration { field, value });
            }
        }

        Ok(self)
    }

    pub fn stability_timeout(&self) -> Duration {
        seconds(self.file_stability_timeout, default_stability_timeout())
    }

    pub fn stability_interval(&self) -> Duration {
        seconds(self.file_stability_check_interval, default_stability_interval())
    }

    pub fn trigger_timeout(&self) -> Duration {
        seconds(self.trigger_timeout, default_trigger_timeout())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        seconds(self.shutdown_timeout, default_shutdown_timeout())
    }
}

fn seconds(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
