//! Crate-level error type.
//!
//! Each subsystem has its own error enum; [`GatewayError`] gathers them for
//! the binary and other top-level entry points.

use std::time::Duration;

use thiserror::Error;

use crate::{
    bus::BusError,
    codec::CodecError,
    config::ConfigError,
    connection::ProtocolViolation,
    logging::LoggingError,
    server::ServerError,
};

/// Top-level error type exposed by `wiregate`.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// An operation exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend {0} is not compiled in; rebuild with the `{0}` feature")]
    BackendUnavailable(&'static str),
    #[cfg(feature = "metrics")]
    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Result alias for top-level operations.
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::GatewayError;
    use crate::bus::BusError;

    #[test]
    fn bus_errors_convert() {
        let err: GatewayError = BusError::Closed.into();
        assert!(matches!(err, GatewayError::Bus(BusError::Closed)));
        assert!(err.to_string().starts_with("bus error"));
    }

    #[test]
    fn timeout_names_duration() {
        assert_eq!(
            GatewayError::Timeout(Duration::from_secs(3)).to_string(),
            "timed out after 3s"
        );
    }
}
