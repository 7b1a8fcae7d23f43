//! Codec for the gateway's MQTT-style wire protocol.
//!
//! Every frame starts with a one-byte fixed header (`type << 4`, plus the
//! PUBLISH flags in the low nibble), followed by the base-128 remaining
//! length and then a type-specific variable header and payload.
//!
//! The free functions [`decode`] and [`encode`] are pure and perform no I/O.
//! [`MqttCodec`] adapts them to `tokio_util`'s `Decoder`/`Encoder` traits for
//! use with `FramedRead`/`FramedWrite`.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

mod decode;
mod encode;
pub mod error;
pub mod frame;
pub mod varint;

pub use decode::{decode, decode_with_limit};
pub use encode::{encode, encode_to_bytes};
pub use error::{CodecError, DecodeError, EncodeError, MalformedFrame};
pub use frame::{
    ConnAck,
    Connect,
    ConnectFlags,
    ConnectReturnCode,
    Frame,
    PacketType,
    Publish,
    PublishFlags,
    QoS,
    SUBACK_FAILURE,
    SubAck,
    Subscribe,
    SubscribeFilter,
    Unsubscribe,
    Will,
};

/// Smallest frame size cap accepted by [`MqttCodec::new`].
pub const MIN_FRAME_LENGTH: usize = 64;

/// Largest remaining length the four-byte protocol varint can express
/// (256 MiB minus one).
pub const MAX_FRAME_LENGTH: usize = 268_435_455;

/// Frame size cap used when none is configured (1 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1024 * 1024;

pub(crate) fn clamp_frame_length(value: usize) -> usize {
    value.clamp(MIN_FRAME_LENGTH, MAX_FRAME_LENGTH)
}

/// `tokio_util` codec for [`Frame`]s.
///
/// Decoding fails hard on malformed input; the connection read path uses the
/// resynchronising [`StreamReassembler`](crate::reassembly::StreamReassembler)
/// instead and relies on this type for the write side.
#[derive(Clone, Copy, Debug)]
pub struct MqttCodec {
    max_frame_length: usize,
}

impl MqttCodec {
    /// Create a codec that rejects frames larger than `max_frame_length`.
    ///
    /// The value is clamped to `MIN_FRAME_LENGTH..=MAX_FRAME_LENGTH`.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: clamp_frame_length(max_frame_length),
        }
    }

    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }
}

impl Default for MqttCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_FRAME_LENGTH) }
}

impl Decoder for MqttCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match decode_with_limit(src, self.max_frame_length) {
            Ok((frame, consumed)) => {
                src.advance(consumed);
                Ok(Some(frame))
            }
            Err(DecodeError::Incomplete { needed }) => {
                src.reserve(needed);
                Ok(None)
            }
            Err(DecodeError::Malformed(err)) => Err(err.into()),
        }
    }
}

impl Encoder<Frame> for MqttCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode(&item, dst)?;
        crate::metrics::inc_frames(crate::metrics::Direction::Outbound);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests;
