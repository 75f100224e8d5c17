//! Configuration for [`TaskScheduler`](crate::TaskScheduler).
//!
//! Loaded as the `[scheduler]` table of the application config:
//!
//! ```toml
//! [scheduler]
//! pool_threads = 4
//! max_blocking_threads = 64
//! ui_thread_name = "baton-ui"
//! pool_thread_name = "baton-pool"
//! ```

use serde::{Deserialize, Serialize};

/// Thread layout for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSchedulerConfig {
    /// Worker threads in the pool once it is started.
    ///
    /// Defaults to 4.
    #[serde(default = "default_pool_threads")]
    pub pool_threads: usize,

    /// Upper bound on threads used for `may_block` tasks.
    ///
    /// Defaults to 64.
    #[serde(default = "default_max_blocking_threads")]
    pub max_blocking_threads: usize,

    /// Name of the UI thread.
    #[serde(default = "default_ui_thread_name")]
    pub ui_thread_name: String,

    /// Name given to pool worker threads.
    #[serde(default = "default_pool_thread_name")]
    pub pool_thread_name: String,
}

fn default_pool_threads() -> usize {
    4
}

fn default_max_blocking_threads() -> usize {
    64
}

fn default_ui_thread_name() -> String {
    "baton-ui".to_string()
}

fn default_pool_thread_name() -> String {
    "baton-pool".to_string()
}

impl Default for TaskSchedulerConfig {
    fn default() -> Self {
        Self {
            pool_threads: default_pool_threads(),
            max_blocking_threads: default_max_blocking_threads(),
            ui_thread_name: default_ui_thread_name(),
            pool_thread_name: default_pool_thread_name(),
        }
    }
}

impl TaskSchedulerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> baton_common::Result<()> {
        if self.pool_threads == 0 {
            return Err(baton_common::Error::Config(
                "scheduler.pool_threads must be > 0".to_string(),
            ));
        }
        if self.max_blocking_threads == 0 {
            return Err(baton_common::Error::Config(
                "scheduler.max_blocking_threads must be > 0".to_string(),
            ));
        }
        if self.ui_thread_name.trim().is_empty() {
            return Err(baton_common::Error::Config(
                "scheduler.ui_thread_name must not be empty".to_string(),
            ));
        }
        if self.pool_thread_name.trim().is_empty() {
            return Err(baton_common::Error::Config(
                "scheduler.pool_thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TaskSchedulerConfig::default();
        assert_eq!(config.pool_threads, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = TaskSchedulerConfig {
            pool_threads: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool_threads"));
    }

    #[test]
    fn test_blank_thread_name_rejected() {
        let config = TaskSchedulerConfig {
            ui_thread_name: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
