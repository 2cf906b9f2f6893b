//! Tracing subscriber setup
//!
//! Logs go to stderr so that stdout only carries JSON results.

use crate::config::LoggingConfig;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Logging setup errors
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Unknown `logging.format`
    #[error("Unknown log format '{0}', expected json or pretty")]
    UnknownFormat(String),

    /// A global subscriber was already installed
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}

/// Map a level name to a filter, defaulting to `info`
pub fn level_filter(level: &str) -> LevelFilter {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    LevelFilter::from_level(level)
}

/// Install the global subscriber
pub fn init_tracing(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = level_filter(&config.level);

    match config.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        "pretty" => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        other => return Err(LoggingError::UnknownFormat(other.to_string())),
    }
    .map_err(|e| LoggingError::Init(e.to_string()))
}
