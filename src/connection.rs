//! Per-client connection state machine.
//!
//! [`serve_connection`] drives one client from accept to close:
//!
//! 1. `AwaitingConnect`: the first decoded frame must be CONNECT, received
//!    within the handshake deadline. Anything else closes the socket without
//!    a response.
//! 2. `Connected`: a CONNACK is sent and the assurance retransmit task is
//!    started. Each socket read is raced against the keepalive deadline and
//!    the shutdown token; the first to complete decides what happens next.
//!    Decoded frames are dispatched in order and reset the keepalive.
//! 3. `Closing`: the assurance task and every subscription are stopped,
//!    in-flight writes are drained with a bounded wait, writes still stuck
//!    after that are abandoned, the socket is shut down (also bounded) and
//!    the borrowed consumer session goes back to the pool.
//!
//! Subscription deliveries and assurance resends run on their own tasks and
//! share the socket through [`FrameWriter`].

use std::{fmt, io, sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;

mod assurance;
mod counter;
mod dispatch;
mod error;
mod keepalive;
mod state;
mod subscriptions;
mod writer;

pub use assurance::AssuranceSet;
pub use counter::active_connection_count;
use counter::ActiveConnection;
pub use error::{InvalidTransition, ProtocolViolation, WriteError};
pub use keepalive::keepalive_period;
use keepalive::Keepalive;
pub use state::ConnectionState;
pub use subscriptions::SubscriptionSet;
pub use writer::FrameWriter;

use crate::{
    bus::{BusBridge, ConsumerLease},
    codec::{ConnAck, Connect, DEFAULT_MAX_FRAME_LENGTH, Frame, MqttCodec, Will},
    metrics::{self, Direction},
    reassembly::StreamReassembler,
};

/// Identifier assigned to an accepted connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Per-connection tunables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Size of the buffer handed to each socket read.
    pub read_buffer_size: usize,
    /// Interval between PUBREC retransmissions.
    pub assurance_tick: Duration,
    /// Deadline for the CONNECT handshake.
    pub connect_timeout: Duration,
    /// Upper bound on the wait for in-flight writes when closing.
    pub drain_timeout: Duration,
    /// Largest remaining length accepted from the client.
    pub max_frame_length: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            read_buffer_size: 64 * 1024,
            assurance_tick: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(10),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

/// Shared state every connection needs: the bus bridge and its settings.
#[derive(Clone)]
pub struct GatewayContext {
    bridge: Arc<BusBridge>,
    settings: ConnectionSettings,
}

impl GatewayContext {
    #[must_use]
    pub fn new(bridge: Arc<BusBridge>, settings: ConnectionSettings) -> Self { Self { bridge, settings } }

    #[must_use]
    pub fn bridge(&self) -> &Arc<BusBridge> { &self.bridge }

    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings { &self.settings }
}

/// Why a connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent DISCONNECT.
    ClientDisconnect,
    /// No frame was decoded within the keepalive period.
    KeepaliveTimeout,
    /// The peer closed the stream without DISCONNECT.
    PeerClosed,
    /// Reading from the socket failed.
    TransportError,
    /// The handshake was rejected.
    ProtocolViolation,
    /// The listener is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Whether the client's Will is published for this reason.
    #[must_use]
    pub fn publishes_will(self) -> bool { matches!(self, Self::KeepaliveTimeout | Self::TransportError) }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientDisconnect => "client_disconnect",
            Self::KeepaliveTimeout => "keepalive_timeout",
            Self::PeerClosed => "peer_closed",
            Self::TransportError => "transport_error",
            Self::ProtocolViolation => "protocol_violation",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Outcome of dispatching one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Disconnect,
}

enum ReadEvent {
    Data(usize),
    Eof,
    Failed(io::Error),
    Expired,
    Shutdown,
}

/// Serve one client until it disconnects, times out, fails or `shutdown`
/// fires. Cleanup runs on every exit path.
pub async fn serve_connection<S>(
    stream: S,
    id: ConnectionId,
    ctx: GatewayContext,
    shutdown: CancellationToken,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let _active = ActiveConnection::new(id);
    // Stops delivery and assurance tasks even if this future unwinds.
    let scope = CancellationToken::new();
    let _scope_guard = scope.clone().drop_guard();

    let (reader, write_half) = tokio::io::split(stream);
    let codec = MqttCodec::new(ctx.settings.max_frame_length);
    let mut conn = Connection {
        id,
        state: ConnectionState::AwaitingConnect,
        reader,
        buf: vec![0; ctx.settings.read_buffer_size.max(1)],
        reassembler: StreamReassembler::new(ctx.settings.max_frame_length),
        writer: FrameWriter::new(write_half, codec),
        assurance: AssuranceSet::new(),
        assurance_task: None,
        subscriptions: SubscriptionSet::new(scope.child_token()),
        lease: None,
        will: None,
        keepalive: Keepalive::new(0),
        scope,
        ctx,
    };

    let reason = match conn.handshake(&shutdown).await {
        Ok(Some(backlog)) => conn.run(backlog, &shutdown).await,
        Ok(None) => CloseReason::Shutdown,
        Err(violation) => {
            warn!("handshake rejected: id={id}, reason={violation}");
            metrics::inc_errors();
            CloseReason::ProtocolViolation
        }
    };
    if reason.publishes_will() {
        conn.publish_will().await;
    }
    conn.close(reason).await;
    reason
}

pub(crate) struct Connection<S> {
    id: ConnectionId,
    state: ConnectionState,
    reader: ReadHalf<S>,
    buf: Vec<u8>,
    reassembler: StreamReassembler,
    writer: FrameWriter,
    assurance: AssuranceSet,
    assurance_task: Option<JoinHandle<()>>,
    subscriptions: SubscriptionSet,
    lease: Option<ConsumerLease>,
    will: Option<Will>,
    keepalive: Keepalive,
    scope: CancellationToken,
    ctx: GatewayContext,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn advance(&mut self, next: ConnectionState) {
        if let Err(e) = self.state.advance(next) {
            warn!("{e}: id={}", self.id);
        }
    }

    /// Wait for CONNECT, accept it and return any frames that followed it in
    /// the same reads. `None` means shutdown fired first.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    async fn handshake(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<Option<Vec<Frame>>, ProtocolViolation> {
        let limit = self.ctx.settings.connect_timeout;
        let frames = tokio::select! {
            biased;

            () = shutdown.cancelled() => return Ok(None),
            first = time::timeout(limit, self.read_first_frames()) => match first {
                Ok(result) => result?,
                Err(_) => return Err(ProtocolViolation::HandshakeTimeout(limit)),
            },
        };
        let mut frames = frames.into_iter();
        let connect = match frames.next() {
            Some(Frame::Connect(connect)) => connect,
            Some(other) => {
                return Err(ProtocolViolation::UnexpectedPacket {
                    actual: other.packet_type(),
                });
            }
            None => return Err(ProtocolViolation::PeerClosed),
        };
        self.accept(connect).await;
        Ok(Some(frames.collect()))
    }

    async fn read_first_frames(&mut self) -> Result<Vec<Frame>, ProtocolViolation> {
        loop {
            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                return Err(ProtocolViolation::PeerClosed);
            }
            let batch = self.reassembler.feed(&self.buf[..n]);
            if batch.discarded > 0 {
                return Err(ProtocolViolation::MalformedHandshake {
                    discarded: batch.discarded,
                });
            }
            if !batch.frames.is_empty() {
                return Ok(batch.frames);
            }
        }
    }

    async fn accept(&mut self, connect: Connect) {
        metrics::inc_frames(Direction::Inbound);
        info!(
            "client connected: id={}, client_id={}, keep_alive={}, will={}",
            self.id,
            connect.client_id,
            connect.keep_alive,
            connect.will.is_some()
        );
        self.will = connect.will;
        self.keepalive = Keepalive::new(connect.keep_alive);
        self.advance(ConnectionState::Connected);
        self.respond(Frame::ConnAck(ConnAck::accepted())).await;
        self.assurance_task = Some(assurance::spawn_retransmit(
            self.assurance.clone(),
            self.writer.clone(),
            self.ctx.settings.assurance_tick,
            self.scope.child_token(),
        ));
    }

    /// Read/dispatch cycle of the `Connected` state.
    async fn run(&mut self, backlog: Vec<Frame>, shutdown: &CancellationToken) -> CloseReason {
        let mut frames = backlog;
        loop {
            if !frames.is_empty()
                && let Some(reason) = self.dispatch_batch(frames, shutdown).await
            {
                return reason;
            }
            frames = match self.next_event(shutdown).await {
                ReadEvent::Data(n) => self.reassembler.feed(&self.buf[..n]).frames,
                ReadEvent::Eof => return CloseReason::PeerClosed,
                ReadEvent::Failed(e) => {
                    warn!("socket read failed: id={}, error={e}", self.id);
                    return CloseReason::TransportError;
                }
                ReadEvent::Expired => {
                    warn!("keepalive expired: id={}", self.id);
                    return CloseReason::KeepaliveTimeout;
                }
                ReadEvent::Shutdown => return CloseReason::Shutdown,
            };
        }
    }

    /// Dispatch one read's worth of frames. A dispatch stuck on a peer that
    /// stopped reading is cut off by the keepalive deadline or shutdown.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    async fn dispatch_batch(
        &mut self,
        frames: Vec<Frame>,
        shutdown: &CancellationToken,
    ) -> Option<CloseReason> {
        self.keepalive.reset();
        let deadline = self.keepalive.deadline();
        let id = self.id;
        tokio::select! {
            biased;

            () = shutdown.cancelled() => Some(CloseReason::Shutdown),
            flow = self.dispatch_all(frames) => {
                (flow == Flow::Disconnect).then_some(CloseReason::ClientDisconnect)
            }
            () = keepalive::expired(deadline) => {
                warn!("keepalive expired during dispatch: id={id}");
                Some(CloseReason::KeepaliveTimeout)
            }
        }
    }

    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    async fn next_event(&mut self, shutdown: &CancellationToken) -> ReadEvent {
        let deadline = self.keepalive.deadline();
        tokio::select! {
            biased;

            () = shutdown.cancelled() => ReadEvent::Shutdown,
            read = self.reader.read(&mut self.buf) => match read {
                Ok(0) => ReadEvent::Eof,
                Ok(n) => ReadEvent::Data(n),
                Err(e) => ReadEvent::Failed(e),
            },
            () = keepalive::expired(deadline) => ReadEvent::Expired,
        }
    }

    /// Dispatch `frames` in decode order. Frames after a DISCONNECT are
    /// discarded.
    async fn dispatch_all(&mut self, frames: Vec<Frame>) -> Flow {
        let total = frames.len();
        for (index, frame) in frames.into_iter().enumerate() {
            metrics::inc_frames(Direction::Inbound);
            if self.dispatch(frame).await == Flow::Disconnect {
                let dropped = total - index - 1;
                if dropped > 0 {
                    debug!("frames after DISCONNECT discarded: id={}, count={dropped}", self.id);
                }
                return Flow::Disconnect;
            }
        }
        Flow::Continue
    }

    async fn publish_will(&mut self) {
        let Some(will) = self.will.take() else {
            return;
        };
        match self.ctx.bridge.publish_sync(&will.topic, will.message).await {
            Ok(_) => info!("will published: id={}, topic={}", self.id, will.topic),
            Err(e) => warn!("will publish failed: id={}, topic={}, error={e}", self.id, will.topic),
        }
    }

    /// Write `frame`, logging failures. Responses are best effort.
    async fn respond(&mut self, frame: Frame) {
        if let Err(e) = self.writer.send(frame).await {
            metrics::inc_errors();
            warn!("write failed: id={}, error={e}", self.id);
        }
    }

    /// Closing path shared by every exit.
    async fn close(&mut self, reason: CloseReason) {
        self.advance(ConnectionState::Closing);
        if let Some(task) = self.assurance_task.take() {
            task.abort();
        }
        self.subscriptions.close_all();
        self.writer.begin_close();
        let limit = self.ctx.settings.drain_timeout;
        if !self.writer.drain(limit).await {
            warn!(
                "drain timed out: id={}, in_flight={}, timeout={limit:?}",
                self.id,
                self.writer.in_flight()
            );
        }
        self.writer.abort();
        self.subscriptions.abort_tasks();
        if !self.writer.shutdown(limit).await {
            warn!("socket shutdown timed out: id={}, timeout={limit:?}", self.id);
        }
        if let Some(lease) = self.lease.take() {
            lease.release().await;
        }
        self.scope.cancel();
        self.advance(ConnectionState::Closed);
        info!("connection closed: id={}, reason={reason}", self.id);
    }
}
