//! Process-wide log output
//!
//! Driven by the `[logging]` section of [`GatewayConfig`](crate::GatewayConfig).
//! `RUST_LOG` directives are layered on top of the configured level, so a
//! single module can be turned up without touching the file.

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LogConfig;
use crate::errors::{GatewayError, Result};

/// Parse a level name case-insensitively
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim())
        .map_err(|_| GatewayError::config(format!("Invalid log level: {}", level)))
}

fn env_filter(config: &LogConfig) -> Result<EnvFilter> {
    let level = parse_log_level(&config.level)?;
    Ok(EnvFilter::from_default_env().add_directive(level.into()))
}

/// Install the global subscriber; fails if one is already installed
pub fn setup_logging(config: &LogConfig) -> Result<()> {
    let builder = fmt::Subscriber::builder().with_env_filter(env_filter(config)?);

    let installed = if config.json {
        builder
            .with_writer(std::io::stdout)
            .json()
            .flatten_event(true)
            .try_init()
    } else {
        builder.compact().try_init()
    };

    installed.map_err(|e| GatewayError::config(format!("Failed to install logger: {}", e)))
}

/// First line of every run
pub fn log_welcome(config: &LogConfig, version: &str) {
    tracing::info!(
        service = %config.service,
        json = config.json,
        "Starting {} v{} at level {}",
        config.service,
        version,
        config.level
    );
}
