//! Process-level plumbing shared by OtelKit binaries: layered configuration
//! and logging bootstrap.

pub mod config;
pub mod logging;

pub use config::{
    default_logging_config, AppConfig, AppConfigProvider, CliArgs, LoggingConfig, Section,
    ServerConfig, TelemetryConfig,
};
