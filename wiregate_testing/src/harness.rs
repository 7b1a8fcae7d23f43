//! In-memory gateway harness.
//!
//! [`Gateway`] wires a [`MemoryBus`] into a [`BusBridge`] and serves each
//! client over a `tokio::io::duplex` pair, so whole sessions run without a
//! socket or a broker.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use rstest::fixture;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex},
    task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use wiregate::{
    bus::{BridgeSettings, BusBridge, memory::MemoryBus},
    connection::{CloseReason, ConnectionId, ConnectionSettings, GatewayContext, serve_connection},
};

use crate::TestClient;

/// Buffer size of each in-memory client pipe.
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

/// A gateway serving in-memory clients against a [`MemoryBus`].
pub struct Gateway {
    pub bus: MemoryBus,
    pub ctx: GatewayContext,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    next_id: AtomicU64,
}

/// A connected client with the task serving it.
pub struct Session {
    pub client: TestClient<DuplexStream>,
    pub task: JoinHandle<CloseReason>,
}

impl Gateway {
    /// Start a gateway over a fresh bus with `partitions` per topic.
    ///
    /// # Panics
    ///
    /// Panics if the bridge cannot open its consumer pool.
    pub async fn start(partitions: usize, bridge: BridgeSettings, settings: ConnectionSettings) -> Self {
        let bus = MemoryBus::new(partitions);
        let bridge = BusBridge::new(Arc::new(bus.clone()), bridge)
            .await
            .expect("memory bridge");
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        bridge.spawn_batcher(&tracker, shutdown.clone());
        Self {
            bus,
            ctx: GatewayContext::new(Arc::new(bridge), settings),
            shutdown,
            tracker,
            next_id: AtomicU64::new(1),
        }
    }

    /// Serve a new in-memory client.
    pub fn connect(&self) -> Session {
        let (client, server) = duplex(DEFAULT_CAPACITY);
        let task = self.serve(server);
        Session {
            client: TestClient::new(client),
            task,
        }
    }

    /// Serve `stream` as a new connection.
    pub fn serve(&self, stream: DuplexStream) -> JoinHandle<CloseReason> {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.tracker
            .spawn(serve_connection(stream, id, self.ctx.clone(), self.shutdown.child_token()))
    }

    /// Write `bytes` as one client burst, close the client's write half and
    /// return everything the gateway wrote back.
    ///
    /// # Errors
    ///
    /// Propagates transport failures on the client side.
    pub async fn drive_bytes(&self, bytes: &[u8]) -> io::Result<(Vec<u8>, CloseReason)> {
        let (mut client, server) = duplex(DEFAULT_CAPACITY);
        let task = self.serve(server);
        client.write_all(bytes).await?;
        client.shutdown().await?;
        let mut out = Vec::new();
        client.read_to_end(&mut out).await?;
        let reason = task.await.map_err(io::Error::other)?;
        Ok((out, reason))
    }

    /// Cancel every connection and wait for it to close, stop the batcher
    /// after its final flush, then close the bridge.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.ctx.bridge().close().await;
    }
}

/// A gateway with default settings over a single-partition bus.
#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub async fn gateway() -> Gateway {
    Gateway::start(1, BridgeSettings::default(), ConnectionSettings::default()).await
}
