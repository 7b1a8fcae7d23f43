//! Error types for the codec layer.
//!
//! Decoding distinguishes two outcomes that callers treat very differently:
//!
//! - [`DecodeError::Incomplete`]: the buffer ends before the frame does. The
//!   bytes are kept and decoding is retried once more data arrives.
//! - [`DecodeError::Malformed`]: the bytes cannot be a valid frame. The stream
//!   reassembler reacts by scanning forward for the next frame boundary.

use std::io;

use thiserror::Error;

use super::frame::{PacketType, QoS};

/// Reasons a byte sequence cannot be decoded as a frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MalformedFrame {
    /// Packet type nibble is `0` or `15`.
    #[error("reserved packet type {0}")]
    ReservedPacketType(u8),

    /// Fixed header flags are not permitted for this packet type.
    #[error("invalid fixed header flags {flags:#06b} for {packet}")]
    InvalidFlags {
        /// Packet whose header carried the flags.
        packet: PacketType,
        /// Offending low nibble.
        flags: u8,
    },

    /// QoS bits hold the reserved value `3`.
    #[error("invalid QoS level {0}")]
    InvalidQos(u8),

    /// Remaining length does not fit the platform's address space.
    #[error("remaining length overflows")]
    LengthOverflow,

    /// Declared frame size exceeds the configured cap.
    #[error("frame exceeds max length: {size} > {max}")]
    Oversized {
        /// Declared remaining length.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A field would read past the declared remaining-length window.
    #[error("{packet} field `{field}` needs {needed} bytes but {available} remain in the frame")]
    FieldOverrun {
        packet: PacketType,
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// A fixed-size frame declared more bytes than its fields consume.
    #[error("{packet} frame has {extra} unexpected trailing bytes")]
    TrailingBytes { packet: PacketType, extra: usize },

    #[error("{packet} field `{field}` is not valid UTF-8")]
    InvalidUtf8 {
        packet: PacketType,
        field: &'static str,
    },

    /// SUBSCRIBE or UNSUBSCRIBE without a single filter.
    #[error("{packet} frame carries no topic filters")]
    EmptyFilterList { packet: PacketType },

    #[error("CONNECT reserved flag bit is set")]
    ReservedConnectFlag,

    /// Will QoS or retain bits set while the Will flag is clear.
    #[error("CONNECT will qos/retain set without will flag")]
    InconsistentWillFlags,

    #[error("unknown CONNACK return code {0}")]
    UnknownReturnCode(u8),
}

/// Failure to decode a frame from a byte slice.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// More bytes are needed before the frame can be decoded.
    #[error("incomplete frame: {needed} more bytes needed")]
    Incomplete {
        /// Lower bound on the number of additional bytes required.
        needed: usize,
    },

    #[error("malformed frame: {0}")]
    Malformed(#[from] MalformedFrame),
}

impl DecodeError {
    #[must_use]
    pub fn is_incomplete(&self) -> bool { matches!(self, Self::Incomplete { .. }) }
}

/// Failure to encode a frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// A string or binary field exceeds the 16-bit length prefix.
    #[error("field `{field}` is {len} bytes, longer than a u16 length prefix allows")]
    FieldTooLong { field: &'static str, len: usize },

    /// PUBLISH message id presence disagrees with its QoS.
    #[error("publish at {qos:?} requires message id: {expected}")]
    MessageIdMismatch { qos: QoS, expected: bool },
}

/// Error surfaced by the `tokio_util` codec adapter.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Malformed(#[from] MalformedFrame),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}
