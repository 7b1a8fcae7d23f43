//! Runtime control for [`GatewayServer`].

mod accept;
mod backoff;

use std::sync::Arc;

#[cfg(test)]
pub(super) use accept::MockAcceptListener;
pub(super) use accept::{AcceptLoopOptions, accept_loop};
pub use backoff::BackoffConfig;
use futures::Future;
use log::{info, warn};
use tokio::{select, signal};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{GatewayServer, ServerError};

impl GatewayServer {
    /// Run the gateway until Ctrl+C or, on Unix, SIGTERM.
    ///
    /// # Errors
    ///
    /// See [`run_with_shutdown`](Self::run_with_shutdown).
    pub async fn run(self) -> Result<(), ServerError> { self.run_with_shutdown(shutdown_signal()).await }

    /// Run the gateway until `shutdown` resolves.
    ///
    /// Shutdown stops every accept worker, closes each registered connection
    /// through its normal closing path, waits for the connection tasks and
    /// the publish batcher's final flush, then closes the bus bridge.
    ///
    /// ```no_run
    /// use std::sync::Arc;
    ///
    /// use wiregate::{
    ///     bus::{BridgeSettings, BusBridge, memory::MemoryBus},
    ///     connection::{ConnectionSettings, GatewayContext},
    ///     server::GatewayServer,
    /// };
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let bridge = BusBridge::new(Arc::new(MemoryBus::default()), BridgeSettings::default()).await?;
    /// let ctx = GatewayContext::new(Arc::new(bridge), ConnectionSettings::default());
    /// let server = GatewayServer::bind(([127, 0, 0, 1], 1883).into(), ctx).await?;
    /// server.run_with_shutdown(async {}).await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Accept failures are retried with exponential back-off and do not
    /// surface as errors; the `Result` is reserved for listener failures.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let GatewayServer {
            listener,
            ctx,
            workers,
            backoff,
            registry,
            ready_tx,
        } = self;
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();

        ctx.bridge().spawn_batcher(&tracker, shutdown_token.clone());
        for _ in 0..workers {
            tracker.spawn(accept_loop(
                Arc::clone(&listener),
                AcceptLoopOptions {
                    ctx: ctx.clone(),
                    registry: Arc::clone(&registry),
                    shutdown: shutdown_token.clone(),
                    tracker: tracker.clone(),
                    backoff,
                },
            ));
        }

        // Signal readiness after all workers have been spawned.
        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("Failed to send readiness signal: receiver dropped");
        }

        select! {
            biased;

            () = shutdown => {},
            () = tracker.wait() => {},
        }

        info!("gateway shutting down: connections={}", registry.len());
        shutdown_token.cancel();
        registry.close_all();
        tracker.close();
        tracker.wait().await;
        ctx.bridge().close().await;
        info!("gateway stopped");
        Ok(())
    }
}

/// Resolve on Ctrl+C, or SIGTERM on Unix.
#[cfg_attr(
    unix,
    expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )
)]
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!("SIGTERM handler unavailable: error={e}");
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        select! {
            _ = signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
