//! Frame encoding.

use bytes::{BufMut, Bytes, BytesMut};

use super::{
    error::EncodeError,
    frame::{Connect, Frame, Publish},
    varint::encode_remaining_length,
};
use crate::byte_order::put_network_u16;

/// Append the encoding of `frame` to `dst`.
///
/// The remaining length is derived from the frame's content, so the output
/// always occupies exactly [`Frame::encoded_len`] bytes.
///
/// # Errors
///
/// Returns [`EncodeError`] when a field exceeds its 16-bit length prefix or a
/// PUBLISH message id disagrees with its QoS. Nothing is written on error.
pub fn encode(frame: &Frame, dst: &mut BytesMut) -> Result<(), EncodeError> {
    validate(frame)?;
    let remaining = frame.remaining_length();
    dst.reserve(frame.encoded_len());
    dst.put_u8(frame.fixed_header_byte());
    encode_remaining_length(remaining, dst);

    match frame {
        Frame::Connect(connect) => put_connect(connect, dst),
        Frame::ConnAck(ack) => {
            dst.put_u8(u8::from(ack.session_present));
            dst.put_u8(ack.return_code as u8);
        }
        Frame::Publish(publish) => {
            put_str(dst, &publish.topic);
            if let Some(id) = publish.message_id {
                put_network_u16(dst, id);
            }
            dst.put_slice(&publish.payload);
        }
        Frame::PubAck(id)
        | Frame::PubRec(id)
        | Frame::PubRel(id)
        | Frame::PubComp(id)
        | Frame::UnsubAck(id) => put_network_u16(dst, *id),
        Frame::Subscribe(subscribe) => {
            put_network_u16(dst, subscribe.message_id);
            for request in &subscribe.filters {
                put_str(dst, &request.filter);
                dst.put_u8(request.qos.as_u8());
            }
        }
        Frame::SubAck(ack) => {
            put_network_u16(dst, ack.message_id);
            dst.put_slice(&ack.return_codes);
        }
        Frame::Unsubscribe(unsubscribe) => {
            put_network_u16(dst, unsubscribe.message_id);
            for filter in &unsubscribe.filters {
                put_str(dst, filter);
            }
        }
        Frame::PingReq | Frame::PingResp | Frame::Disconnect => {}
    }
    Ok(())
}

/// Encode `frame` into a freshly allocated buffer.
///
/// # Errors
///
/// See [`encode`].
pub fn encode_to_bytes(frame: &Frame) -> Result<Bytes, EncodeError> {
    let mut dst = BytesMut::with_capacity(frame.encoded_len());
    encode(frame, &mut dst)?;
    Ok(dst.freeze())
}

fn put_connect(connect: &Connect, dst: &mut BytesMut) {
    put_str(dst, &connect.protocol_name);
    dst.put_u8(connect.protocol_version);
    dst.put_u8(connect.flags().to_byte());
    put_network_u16(dst, connect.keep_alive);
    put_str(dst, &connect.client_id);
    if let Some(will) = &connect.will {
        put_str(dst, &will.topic);
        put_binary(dst, &will.message);
    }
    if let Some(user_name) = &connect.user_name {
        put_str(dst, user_name);
    }
    if let Some(password) = &connect.password {
        put_binary(dst, password);
    }
}

fn put_str(dst: &mut BytesMut, value: &str) { put_binary(dst, value.as_bytes()); }

#[expect(
    clippy::cast_possible_truncation,
    reason = "validate() rejects fields longer than u16::MAX before encoding"
)]
fn put_binary(dst: &mut BytesMut, value: &[u8]) {
    put_network_u16(dst, value.len() as u16);
    dst.put_slice(value);
}

fn check_len(field: &'static str, len: usize) -> Result<(), EncodeError> {
    if len > usize::from(u16::MAX) {
        return Err(EncodeError::FieldTooLong { field, len });
    }
    Ok(())
}

fn validate_publish(publish: &Publish) -> Result<(), EncodeError> {
    check_len("topic", publish.topic.len())?;
    let expected = publish.qos.requires_message_id();
    if publish.message_id.is_some() != expected {
        return Err(EncodeError::MessageIdMismatch {
            qos: publish.qos,
            expected,
        });
    }
    Ok(())
}

fn validate(frame: &Frame) -> Result<(), EncodeError> {
    match frame {
        Frame::Connect(connect) => {
            check_len("protocol name", connect.protocol_name.len())?;
            check_len("client id", connect.client_id.len())?;
            if let Some(will) = &connect.will {
                check_len("will topic", will.topic.len())?;
                check_len("will message", will.message.len())?;
            }
            if let Some(user_name) = &connect.user_name {
                check_len("user name", user_name.len())?;
            }
            if let Some(password) = &connect.password {
                check_len("password", password.len())?;
            }
            Ok(())
        }
        Frame::Publish(publish) => validate_publish(publish),
        Frame::Subscribe(subscribe) => subscribe
            .filters
            .iter()
            .try_for_each(|f| check_len("topic filter", f.filter.len())),
        Frame::Unsubscribe(unsubscribe) => unsubscribe
            .filters
            .iter()
            .try_for_each(|f| check_len("topic filter", f.len())),
        _ => Ok(()),
    }
}
