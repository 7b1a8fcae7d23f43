//! Connection task spawning for [`GatewayServer`](super::GatewayServer).

use std::{
    any::Any,
    fmt,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::FutureExt;
use log::{debug, error};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::ConnectionRegistry;
use crate::connection::{ConnectionId, GatewayContext, serve_connection};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique connection id.
pub(super) fn next_connection_id() -> ConnectionId {
    ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Formats a panic payload for logging.
///
/// `String` and `&'static str` payloads are shown as-is; anything else falls
/// back to `Debug`.
pub(super) struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

/// Handles a connection task needs from the listener.
#[derive(Clone)]
pub(super) struct SpawnHandles<'a> {
    pub ctx: &'a GatewayContext,
    pub registry: &'a Arc<ConnectionRegistry>,
    pub shutdown: &'a CancellationToken,
    pub tracker: &'a TaskTracker,
}

/// Register `stream` and serve it on `tracker`, logging and discarding any
/// panic.
///
/// The registration is held inside the task, so the registry entry is removed
/// whether the connection ends normally or unwinds.
pub(super) fn spawn_connection_task<S>(stream: S, peer_addr: Option<SocketAddr>, handles: &SpawnHandles<'_>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let id = next_connection_id();
    let registration = handles.registry.register(id, handles.shutdown);
    let ctx = handles.ctx.clone();
    debug!("connection accepted: id={id}, peer_addr={peer_addr:?}");
    handles.tracker.spawn(async move {
        let fut = AssertUnwindSafe(serve_connection(stream, id, ctx, registration.token())).catch_unwind();

        match fut.await {
            Ok(reason) => debug!("connection task finished: id={id}, reason={reason}"),
            Err(panic) => {
                crate::metrics::inc_connection_panics();
                let panic_msg = PanicMessage(panic);
                // Emit via both `log` and `tracing` for tests that capture either.
                error!("connection task panicked: panic={panic_msg}, id={id}, peer_addr={peer_addr:?}");
                tracing::error!(panic = %panic_msg, %id, ?peer_addr, "connection task panicked");
            }
        }
        drop(registration);
    });
}
