//! Shorthand constructors for frames used throughout the test suites.

use bytes::Bytes;
use wiregate::codec::{
    Connect,
    Frame,
    Publish,
    QoS,
    Subscribe,
    SubscribeFilter,
    Unsubscribe,
    Will,
    encode_to_bytes,
};

/// CONNECT for `client_id` with keepalive disabled.
pub fn connect(client_id: &str) -> Frame { Frame::Connect(Connect::new(client_id)) }

/// CONNECT declaring `keep_alive` seconds and an optional will on `will_topic`.
pub fn connect_with_will(client_id: &str, keep_alive: u16, will_topic: &str, message: &'static [u8]) -> Frame {
    Frame::Connect(Connect::new(client_id).with_keep_alive(keep_alive).with_will(Will {
        topic: will_topic.to_owned(),
        message: Bytes::from_static(message),
        qos: QoS::AtMostOnce,
        retain: false,
    }))
}

/// PUBLISH of `payload` to `topic`; `message_id` is ignored at QoS 0.
pub fn publish(topic: &str, payload: &'static [u8], qos: QoS, message_id: u16) -> Frame {
    Frame::Publish(Publish::new(topic, Bytes::from_static(payload)).with_qos(qos, message_id))
}

/// SUBSCRIBE requesting each `(filter, qos)` pair.
pub fn subscribe(message_id: u16, filters: &[(&str, QoS)]) -> Frame {
    Frame::Subscribe(Subscribe {
        message_id,
        filters: filters
            .iter()
            .map(|(filter, qos)| SubscribeFilter::new(*filter, *qos))
            .collect(),
    })
}

/// UNSUBSCRIBE carrying each string as one length-prefixed entry.
pub fn unsubscribe(message_id: u16, filters: &[&str]) -> Frame {
    Frame::Unsubscribe(Unsubscribe {
        message_id,
        filters: filters.iter().map(|f| (*f).to_owned()).collect(),
    })
}

/// Wire bytes of `frame`.
///
/// # Panics
///
/// Panics if the frame cannot be encoded.
pub fn wire(frame: &Frame) -> Vec<u8> {
    encode_to_bytes(frame).expect("test frame must encode").to_vec()
}

/// Concatenated wire bytes of `frames`, as a client writing them in one burst
/// would produce.
pub fn wire_all(frames: &[Frame]) -> Vec<u8> { frames.iter().flat_map(wire).collect() }
