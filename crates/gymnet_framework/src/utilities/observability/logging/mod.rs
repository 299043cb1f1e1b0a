//! Gymnet Logging Module
//!
//! log4rs backend for the `log` facade used throughout the framework. The backend can be
//! installed once per process; later calls are no-ops.

use crate::utilities::configuration::LoggingParams;

use log::LevelFilter;
use std::sync::Once;
use thiserror::Error;

pub mod builder;
pub mod sinks;

use builder::LoggingBuilder;

// Global initialization guard
static INIT: Once = Once::new();

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("[LoggingError] Unknown log level `{0}`")]
    InvalidLevel(String),
    #[error("[LoggingError] Failed to build log configuration: {0}")]
    BuildError(String),
    #[error("[LoggingError] Failed to initialize logging: {0}")]
    InitError(String),
}

/// Initializes logging from the `logging_config` section of the gym config.
pub fn init_logging_from_params(params: &LoggingParams) -> Result<(), LoggingError> {
    let level = parse_level(&params.level)?;
    let mut builder = LoggingBuilder::new()
        .with_console("stdout", level)
        .with_level(level);
    if let Some(file) = &params.file {
        builder = builder.with_file("file", file, level)?;
    }
    let config = builder.build()?;

    let mut outcome = Ok(());
    INIT.call_once(|| {
        outcome = log4rs::init_config(config)
            .map(|_| log::info!("Gymnet logging initialized at level {}", level))
            .map_err(|e| LoggingError::InitError(e.to_string()));
    });
    outcome
}

pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    level
        .parse::<LevelFilter>()
        .map_err(|_| LoggingError::InvalidLevel(level.to_string()))
}
