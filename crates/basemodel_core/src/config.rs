//! Runtime configuration.
//!
//! # Responsibility
//! - Describe maintenance job, reconciliation, health and logging settings.
//! - Load them from a JSON document with per-field defaults.
//!
//! # Invariants
//! - A config returned by `load_config`/`from_json_str` has passed `validate()`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_JOB_NAME: &str = "Models activity update";
pub const DEFAULT_TASK_NAME: &str = "basemodel.update_activity_status";
pub const DEFAULT_JOB_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_HEARTBEAT_MAX_AGE_SECS: u64 = 120;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BaseModelConfig {
    pub maintenance: MaintenanceConfig,
    pub reconcile: ReconcileConfig,
    pub health: HealthConfig,
    pub logging: LoggingConfig,
}

/// Periodic maintenance job registered with the external scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaintenanceConfig {
    pub job_name: String,
    pub task_name: String,
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            job_name: DEFAULT_JOB_NAME.to_string(),
            task_name: DEFAULT_TASK_NAME.to_string(),
            interval_secs: DEFAULT_JOB_INTERVAL_SECS,
        }
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Advisory chunk size for explicit id scopes.
    pub batch_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    pub heartbeat_max_age_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_max_age_secs: DEFAULT_HEARTBEAT_MAX_AGE_SECS,
        }
    }
}

impl HealthConfig {
    pub fn heartbeat_max_age(&self) -> Duration {
        Duration::from_secs(self.heartbeat_max_age_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute directory for rolling log files; stderr when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            dir: None,
        }
    }
}

impl BaseModelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.maintenance.job_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "maintenance.job_name must not be empty".to_string(),
            ));
        }
        if self.maintenance.task_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "maintenance.task_name must not be empty".to_string(),
            ));
        }
        if self.maintenance.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "maintenance.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.reconcile.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "reconcile.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.health.heartbeat_max_age_secs == 0 {
            return Err(ConfigError::Invalid(
                "health.heartbeat_max_age_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parses and validates a JSON config document.
pub fn from_json_str(raw: &str) -> Result<BaseModelConfig, ConfigError> {
    let config: BaseModelConfig = serde_json::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

/// Reads, parses and validates a JSON config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<BaseModelConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    from_json_str(&raw)
}
