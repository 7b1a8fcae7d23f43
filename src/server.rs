//! Gateway listener.
//!
//! [`GatewayServer`] owns the bound TCP listener and runs a configurable
//! number of accept workers over it. Every accepted socket is served by
//! [`serve_connection`](crate::connection::serve_connection) on its own task
//! and registered in the [`ConnectionRegistry`] until it closes.

use std::{
    io,
    net::{SocketAddr, TcpListener as StdTcpListener},
    num::NonZeroUsize,
    sync::Arc,
    thread,
};

use tokio::{net::TcpListener, sync::oneshot};

use crate::connection::GatewayContext;

mod error;
mod registry;
mod runtime;
mod spawner;
#[cfg(test)]
mod test_util;

pub use error::ServerError;
pub use registry::{ConnectionRegistry, Registration};
pub use runtime::BackoffConfig;

/// Default number of accept workers: the available parallelism.
#[must_use]
pub fn default_workers() -> usize { thread::available_parallelism().map_or(1, NonZeroUsize::get) }

/// A bound gateway listener, ready to [`run`](Self::run).
pub struct GatewayServer {
    listener: Arc<TcpListener>,
    ctx: GatewayContext,
    workers: usize,
    backoff: BackoffConfig,
    registry: Arc<ConnectionRegistry>,
    ready_tx: Option<oneshot::Sender<()>>,
}

impl GatewayServer {
    /// Bind a listener on `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr, ctx: GatewayContext) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self::with_listener(listener, ctx))
    }

    /// Adopt an already bound standard-library listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the listener cannot be registered with
    /// the runtime.
    pub fn from_std_listener(listener: StdTcpListener, ctx: GatewayContext) -> Result<Self, ServerError> {
        listener.set_nonblocking(true)?;
        Ok(Self::with_listener(TcpListener::from_std(listener)?, ctx))
    }

    fn with_listener(listener: TcpListener, ctx: GatewayContext) -> Self {
        Self {
            listener: Arc::new(listener),
            ctx,
            workers: default_workers(),
            backoff: BackoffConfig::default(),
            registry: Arc::new(ConnectionRegistry::new()),
            ready_tx: None,
        }
    }

    /// Set the number of accept workers (at least one).
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.max(1);
        self
    }

    #[must_use]
    pub fn worker_count(&self) -> usize { self.workers }

    #[must_use]
    pub fn accept_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Send on `tx` once the accept workers are running.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Propagates the OS error.
    pub fn local_addr(&self) -> io::Result<SocketAddr> { self.listener.local_addr() }

    /// Registry of the connections this server is serving.
    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> { Arc::clone(&self.registry) }
}
