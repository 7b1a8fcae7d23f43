//! Error types raised while serving a connection.

use std::{io, time::Duration};

use thiserror::Error;

use super::ConnectionState;
use crate::codec::{CodecError, PacketType};

/// A handshake that cannot be accepted. The connection is closed without a
/// response.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    /// The first frame was not a CONNECT.
    #[error("expected CONNECT, received {actual}")]
    UnexpectedPacket { actual: PacketType },

    /// No complete frame arrived before the handshake deadline.
    #[error("no CONNECT within {0:?}")]
    HandshakeTimeout(Duration),

    /// Bytes preceding the first frame could not be decoded.
    #[error("undecodable handshake: {discarded} bytes discarded")]
    MalformedHandshake { discarded: usize },

    /// The peer closed the stream before sending CONNECT.
    #[error("peer closed before CONNECT")]
    PeerClosed,

    /// Reading the handshake failed.
    #[error("handshake read failed: {0}")]
    Io(#[from] io::Error),
}

/// Failure to hand a frame to the socket.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The connection has begun closing and accepts no new writes.
    #[error("connection is closing")]
    Closing,

    /// The write was abandoned because the connection stopped waiting for it.
    #[error("write abandoned while closing")]
    Aborted,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A lifecycle transition that the state machine does not allow.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid connection state transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}
