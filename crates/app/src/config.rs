//! Configuration loading and validation for baton.
//!
//! # Configuration Sections
//!
//! | Section | Description |
//! |---------|-------------|
//! | `scheduler` | Pool size and thread names |
//! | `logging` | Log level, format, and colors |
//! | `startup` | Shape of the startup pipeline driven by `baton run` |
//!
//! # Example Configuration
//!
//! ```toml
//! [scheduler]
//! pool_threads = 4
//!
//! [logging]
//! level = "debug"
//! format = "json"
//!
//! [startup]
//! ui_steps = 5
//! heartbeat_interval_ms = 100
//! ```
//!
//! # Environment Overrides
//!
//! - `BATON_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
//! - `BATON_LOG_FORMAT` - Log format (text, json)
//! - `BATON_POOL_THREADS` - Worker threads in the pool

use std::path::Path;

use baton_task::TaskSchedulerConfig;
use serde::{Deserialize, Serialize};

use crate::logging::{parse_level, LogConfig, LogFormat};

/// Main application configuration.
///
/// Every section is optional in the file; missing sections take their
/// defaults. Call [`AppConfig::validate()`] before use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Thread layout of the task scheduler.
    #[serde(default)]
    pub scheduler: TaskSchedulerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Startup pipeline configuration.
    #[serde(default)]
    pub startup: StartupConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to use ANSI colors.
    #[serde(default = "default_true")]
    pub colors: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
        }
    }
}

impl LoggingConfig {
    /// Converts to the subscriber settings used by [`crate::logging::init`].
    pub fn to_log_config(&self) -> anyhow::Result<LogConfig> {
        let format: LogFormat = self.format.parse()?;
        let mut config = LogConfig::default()
            .with_level(&self.level)
            .with_format(format);
        config.ansi_colors = self.colors && format == LogFormat::Text;
        Ok(config)
    }
}

/// Shape of the startup pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Pool tasks posted before the pool exists.
    #[serde(default = "default_pre_native_tasks")]
    pub pre_native_tasks: usize,

    /// UI steps run before the pool is started.
    #[serde(default = "default_ui_steps")]
    pub ui_steps: usize,

    /// Run all UI steps in a single UI task.
    #[serde(default)]
    pub coalesce_ui_steps: bool,

    /// Pool steps chained after the pool has started.
    #[serde(default = "default_deferred_tasks")]
    pub deferred_tasks: usize,

    /// Heartbeats to observe before cancelling the periodic task.
    #[serde(default = "default_heartbeats")]
    pub heartbeats: u64,

    /// Heartbeat period in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Upper bound for each wait in the pipeline, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_pre_native_tasks() -> usize {
    3
}

fn default_ui_steps() -> usize {
    3
}

fn default_deferred_tasks() -> usize {
    2
}

fn default_heartbeats() -> u64 {
    3
}

fn default_heartbeat_interval_ms() -> u64 {
    50
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            pre_native_tasks: default_pre_native_tasks(),
            ui_steps: default_ui_steps(),
            coalesce_ui_steps: false,
            deferred_tasks: default_deferred_tasks(),
            heartbeats: default_heartbeats(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Environment variables take precedence over file configuration.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("BATON_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("BATON_LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = std::env::var("BATON_POOL_THREADS") {
            if let Ok(threads) = val.parse() {
                self.scheduler.pool_threads = threads;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.scheduler.validate()?;

        if parse_level(&self.logging.level).is_none() {
            anyhow::bail!("Unknown log level '{}'", self.logging.level);
        }
        self.logging.format.parse::<LogFormat>()?;

        if self.startup.heartbeats > 0 && self.startup.heartbeat_interval_ms == 0 {
            anyhow::bail!("startup.heartbeat_interval_ms must be > 0");
        }
        if self.startup.timeout_ms == 0 {
            anyhow::bail!("startup.timeout_ms must be > 0");
        }
        Ok(())
    }

    /// Generate a sample configuration file.
    pub fn sample_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}
