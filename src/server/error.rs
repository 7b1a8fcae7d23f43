//! Errors raised by [`GatewayServer`](super::GatewayServer) operations.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// Errors that may occur while binding or running the listener.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A listener operation other than `accept` failed.
    #[error("listener error: {0}")]
    Io(#[from] io::Error),
}
