//! Frame decoding.
//!
//! Decoding happens in two stages. The fixed header and remaining length fix
//! the frame's window; when the window extends past the input the result is
//! [`DecodeError::Incomplete`]. Type-specific fields are then read strictly
//! inside that window, so a bogus length can never pull in bytes belonging to
//! the next frame.

use bytes::Bytes;

use super::{
    MAX_FRAME_LENGTH,
    error::{DecodeError, MalformedFrame},
    frame::{
        ConnAck,
        Connect,
        ConnectFlags,
        ConnectReturnCode,
        Frame,
        PacketType,
        Publish,
        PublishFlags,
        QoS,
        SubAck,
        Subscribe,
        SubscribeFilter,
        Unsubscribe,
        Will,
    },
    varint::decode_remaining_length,
};
use crate::byte_order::read_network_u16_at;

/// Decode one frame from the start of `src` using the protocol maximum as
/// the frame size cap.
///
/// Returns the frame and the number of bytes it occupied.
///
/// # Errors
///
/// See [`decode_with_limit`].
pub fn decode(src: &[u8]) -> Result<(Frame, usize), DecodeError> {
    decode_with_limit(src, MAX_FRAME_LENGTH)
}

/// Decode one frame from the start of `src`, rejecting frames whose remaining
/// length exceeds `max_frame_length`.
///
/// # Errors
///
/// Returns [`DecodeError::Incomplete`] when `src` ends before the frame does
/// and [`DecodeError::Malformed`] when the bytes cannot form a valid frame.
pub fn decode_with_limit(src: &[u8], max_frame_length: usize) -> Result<(Frame, usize), DecodeError> {
    let Some(&first) = src.first() else {
        return Err(DecodeError::Incomplete { needed: 1 });
    };
    let packet =
        PacketType::from_nibble(first >> 4).ok_or(MalformedFrame::ReservedPacketType(first >> 4))?;
    let flags = first & 0x0f;
    if !packet.accepts_flags(flags) {
        return Err(MalformedFrame::InvalidFlags { packet, flags }.into());
    }
    let publish_flags = if packet == PacketType::Publish {
        Some(PublishFlags::from_bits(flags)?)
    } else {
        None
    };

    let (remaining, length_len) = decode_remaining_length(&src[1..])?;
    if remaining > max_frame_length {
        return Err(MalformedFrame::Oversized {
            size: remaining,
            max: max_frame_length,
        }
        .into());
    }
    let header_len = 1 + length_len;
    let total = header_len
        .checked_add(remaining)
        .ok_or(MalformedFrame::LengthOverflow)?;
    if src.len() < total {
        return Err(DecodeError::Incomplete {
            needed: total - src.len(),
        });
    }

    let mut fields = FieldReader::new(packet, &src[header_len..total]);
    let frame = match packet {
        PacketType::Connect => Frame::Connect(decode_connect(&mut fields)?),
        PacketType::ConnAck => {
            let ack_flags = fields.u8("ack flags")?;
            let return_code = ConnectReturnCode::from_u8(fields.u8("return code")?)?;
            Frame::ConnAck(ConnAck {
                session_present: ack_flags & 0x01 != 0,
                return_code,
            })
        }
        PacketType::Publish => {
            let flags = publish_flags.unwrap_or_default();
            Frame::Publish(decode_publish(flags, &mut fields)?)
        }
        PacketType::PubAck => Frame::PubAck(fields.message_id()?),
        PacketType::PubRec => Frame::PubRec(fields.message_id()?),
        PacketType::PubRel => Frame::PubRel(fields.message_id()?),
        PacketType::PubComp => Frame::PubComp(fields.message_id()?),
        PacketType::UnsubAck => Frame::UnsubAck(fields.message_id()?),
        PacketType::Subscribe => Frame::Subscribe(decode_subscribe(&mut fields)?),
        PacketType::SubAck => Frame::SubAck(SubAck {
            message_id: fields.message_id()?,
            return_codes: fields.rest().to_vec(),
        }),
        PacketType::Unsubscribe => Frame::Unsubscribe(decode_unsubscribe(&mut fields)?),
        PacketType::PingReq => Frame::PingReq,
        PacketType::PingResp => Frame::PingResp,
        PacketType::Disconnect => Frame::Disconnect,
    };
    fields.finish()?;
    Ok((frame, total))
}

fn decode_connect(fields: &mut FieldReader<'_>) -> Result<Connect, MalformedFrame> {
    let protocol_name = fields.string("protocol name")?;
    let protocol_version = fields.u8("protocol version")?;
    let flags = ConnectFlags::from_byte(fields.u8("connect flags")?)?;
    let keep_alive = fields.u16("keepalive")?;
    let client_id = fields.string("client id")?;
    let will = if flags.will {
        Some(Will {
            topic: fields.string("will topic")?,
            message: Bytes::copy_from_slice(fields.binary("will message")?),
            qos: flags.will_qos,
            retain: flags.will_retain,
        })
    } else {
        None
    };
    let user_name = if flags.user_name {
        Some(fields.string("user name")?)
    } else {
        None
    };
    let password = if flags.password {
        Some(Bytes::copy_from_slice(fields.binary("password")?))
    } else {
        None
    };
    Ok(Connect {
        protocol_name,
        protocol_version,
        clean_session: flags.clean_session,
        keep_alive,
        client_id,
        will,
        user_name,
        password,
    })
}

fn decode_publish(
    flags: PublishFlags,
    fields: &mut FieldReader<'_>,
) -> Result<Publish, MalformedFrame> {
    let topic = fields.string("topic")?;
    let message_id = if flags.qos.requires_message_id() {
        Some(fields.message_id()?)
    } else {
        None
    };
    Ok(Publish {
        dup: flags.dup,
        qos: flags.qos,
        retain: flags.retain,
        topic,
        message_id,
        payload: Bytes::copy_from_slice(fields.rest()),
    })
}

fn decode_subscribe(fields: &mut FieldReader<'_>) -> Result<Subscribe, MalformedFrame> {
    let message_id = fields.message_id()?;
    let mut filters = Vec::new();
    while fields.remaining() > 0 {
        let filter = fields.string("topic filter")?;
        let qos = QoS::from_bits(fields.u8("requested qos")?)?;
        filters.push(SubscribeFilter { filter, qos });
    }
    if filters.is_empty() {
        return Err(MalformedFrame::EmptyFilterList {
            packet: PacketType::Subscribe,
        });
    }
    Ok(Subscribe {
        message_id,
        filters,
    })
}

fn decode_unsubscribe(fields: &mut FieldReader<'_>) -> Result<Unsubscribe, MalformedFrame> {
    let message_id = fields.message_id()?;
    let mut filters = Vec::new();
    while fields.remaining() > 0 {
        filters.push(fields.string("topic filter")?);
    }
    if filters.is_empty() {
        return Err(MalformedFrame::EmptyFilterList {
            packet: PacketType::Unsubscribe,
        });
    }
    Ok(Unsubscribe {
        message_id,
        filters,
    })
}

/// Cursor over the remaining-length window of a single frame.
struct FieldReader<'a> {
    packet: PacketType,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(packet: PacketType, buf: &'a [u8]) -> Self { Self { packet, buf, pos: 0 } }

    fn remaining(&self) -> usize { self.buf.len() - self.pos }

    fn overrun(&self, field: &'static str, needed: usize) -> MalformedFrame {
        MalformedFrame::FieldOverrun {
            packet: self.packet,
            field,
            needed,
            available: self.remaining(),
        }
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], MalformedFrame> {
        if len > self.remaining() {
            return Err(self.overrun(field, len));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, MalformedFrame> {
        Ok(self.take(field, 1)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, MalformedFrame> {
        let value = read_network_u16_at(self.buf, self.pos).ok_or_else(|| self.overrun(field, 2))?;
        self.pos += 2;
        Ok(value)
    }

    fn message_id(&mut self) -> Result<u16, MalformedFrame> { self.u16("message id") }

    fn binary(&mut self, field: &'static str) -> Result<&'a [u8], MalformedFrame> {
        let len = self.u16(field)?;
        self.take(field, usize::from(len))
    }

    fn string(&mut self, field: &'static str) -> Result<String, MalformedFrame> {
        let bytes = self.binary(field)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| MalformedFrame::InvalidUtf8 {
                packet: self.packet,
                field,
            })
    }

    fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }

    fn finish(self) -> Result<(), MalformedFrame> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(MalformedFrame::TrailingBytes {
                packet: self.packet,
                extra,
            }),
        }
    }
}
