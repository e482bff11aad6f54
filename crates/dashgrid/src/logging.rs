#![forbid(unsafe_code)]

//! Process-wide log output.
//!
//! The engine crates only emit `tracing` records; this module is the one
//! place that installs a subscriber for them.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{DashboardError, Result};

/// Parse the configured filter directive.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_new(&config.filter).map_err(|err| DashboardError::LogFilter {
        filter: config.filter.clone(),
        message: err.to_string(),
    })
}

/// Install a global fmt subscriber writing to stderr.
///
/// Returns `Ok(false)` when another subscriber is already installed; that
/// one is kept.
pub fn init(config: &LoggingConfig) -> Result<bool> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    let installed = match config.format {
        LogFormat::Plain => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    match installed {
        Ok(()) => {
            tracing::debug!(format = ?config.format, filter = %config.filter, "logging initialized");
            Ok(true)
        }
        Err(_) => Ok(false),
    }
}
