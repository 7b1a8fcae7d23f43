//! Subscriber installation for the `wiregate` binary.
//!
//! The library itself only emits through `log` and `tracing`; embedders
//! install their own subscriber.

use std::{
    fs::OpenOptions,
    io,
    path::PathBuf,
    sync::Mutex,
};

use thiserror::Error;
use tracing_subscriber::{EnvFilter, filter::ParseError};

use crate::config::LogConfig;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level {level:?}: {source}")]
    Filter { level: String, source: ParseError },
    #[error("failed to open log file {}: {source}", path.display())]
    File { path: PathBuf, source: io::Error },
    #[error("failed to install subscriber: {0}")]
    Install(String),
}

/// Build the filter from `RUST_LOG` if set, otherwise from `level`.
///
/// # Errors
///
/// Returns [`LoggingError::Filter`] if `level` is not a valid directive.
pub fn env_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|source| LoggingError::Filter {
        level: level.to_owned(),
        source,
    })
}

/// Install the global fmt subscriber described by `config`.
///
/// `log` records are forwarded into the subscriber as well.
///
/// # Errors
///
/// Fails on an invalid level, an unopenable log file, or when a global
/// subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<(), LoggingError> {
    let filter = env_filter(&config.level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match &config.path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::File {
                    path: path.clone(),
                    source,
                })?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None => builder.with_writer(io::stderr).try_init(),
    };
    installed.map_err(|e| LoggingError::Install(e.to_string()))
}
