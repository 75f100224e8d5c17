//! Application layer for baton.
//!
//! - [`config`]: the TOML [`AppConfig`](config::AppConfig) with environment
//!   overrides and validation.
//! - [`logging`]: global `tracing` subscriber setup.
//! - [`startup`]: the two-phase startup pipeline run by `baton run`.

pub mod config;
pub mod logging;
pub mod startup;

pub use config::{AppConfig, LoggingConfig, StartupConfig};
pub use startup::{run_startup, StartupReport};
