//! Logical frame model for the gateway wire protocol.
//!
//! A [`Frame`] is the decoded form of one protocol message. The remaining
//! length is never stored: it is always derived from the frame's content via
//! [`Frame::remaining_length`], which guarantees that encoding reproduces a
//! self-consistent header.

use std::fmt;

use bytes::Bytes;

use super::{error::MalformedFrame, varint::remaining_length_len};

/// Protocol name announced by conforming clients in CONNECT.
pub const PROTOCOL_NAME: &str = "MQTT";
/// Protocol level for the 3.1.1 dialect spoken by the gateway.
pub const PROTOCOL_LEVEL: u8 = 4;
/// SUBACK return code signalling that a filter could not be subscribed.
pub const SUBACK_FAILURE: u8 = 0x80;

/// Control packet type carried in the high nibble of the fixed header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// Map a fixed-header nibble onto a packet type.
    ///
    /// Returns `None` for the reserved values `0` and `15`.
    #[must_use]
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        Some(match nibble {
            1 => Self::Connect,
            2 => Self::ConnAck,
            3 => Self::Publish,
            4 => Self::PubAck,
            5 => Self::PubRec,
            6 => Self::PubRel,
            7 => Self::PubComp,
            8 => Self::Subscribe,
            9 => Self::SubAck,
            10 => Self::Unsubscribe,
            11 => Self::UnsubAck,
            12 => Self::PingReq,
            13 => Self::PingResp,
            14 => Self::Disconnect,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_u8(self) -> u8 { self as u8 }

    /// Fixed-header flag nibbles accepted on decode for this packet type.
    ///
    /// PUBLISH flags are validated separately by [`PublishFlags::from_bits`].
    /// PUBREL, SUBSCRIBE and UNSUBSCRIBE tolerate the `0b0010` value emitted by
    /// standard clients as well as the bare nibble the gateway itself writes.
    pub(crate) fn accepts_flags(self, flags: u8) -> bool {
        match self {
            Self::Publish => true,
            Self::PubRel | Self::Subscribe | Self::Unsubscribe => flags == 0 || flags == 0b0010,
            _ => flags == 0,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::ConnAck => "CONNACK",
            Self::Publish => "PUBLISH",
            Self::PubAck => "PUBACK",
            Self::PubRec => "PUBREC",
            Self::PubRel => "PUBREL",
            Self::PubComp => "PUBCOMP",
            Self::Subscribe => "SUBSCRIBE",
            Self::SubAck => "SUBACK",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::UnsubAck => "UNSUBACK",
            Self::PingReq => "PINGREQ",
            Self::PingResp => "PINGRESP",
            Self::Disconnect => "DISCONNECT",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

/// Delivery assurance level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum QoS {
    /// Fire and forget.
    #[default]
    AtMostOnce = 0,
    /// Acknowledged with a single PUBACK.
    AtLeastOnce = 1,
    /// Two-phase PUBREC/PUBREL/PUBCOMP handshake.
    ExactlyOnce = 2,
}

impl QoS {
    /// Parse a two-bit QoS value, rejecting the reserved level `3`.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedFrame::InvalidQos`] for any value above `2`.
    pub fn from_bits(bits: u8) -> Result<Self, MalformedFrame> {
        match bits {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(MalformedFrame::InvalidQos(other)),
        }
    }

    #[must_use]
    pub fn as_u8(self) -> u8 { self as u8 }

    /// Whether frames at this level carry a message id.
    #[must_use]
    pub fn requires_message_id(self) -> bool { self != Self::AtMostOnce }
}

/// PUBLISH flags packed into the low nibble of the fixed header as
/// `retain | qos << 1 | dup << 3`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishFlags {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishFlags {
    #[must_use]
    pub fn to_bits(self) -> u8 {
        u8::from(self.retain) | (self.qos.as_u8() << 1) | (u8::from(self.dup) << 3)
    }

    /// Unpack the low nibble of a PUBLISH fixed header.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedFrame::InvalidQos`] when both QoS bits are set.
    pub fn from_bits(bits: u8) -> Result<Self, MalformedFrame> {
        Ok(Self {
            retain: bits & 0b0001 != 0,
            qos: QoS::from_bits((bits >> 1) & 0b11)?,
            dup: bits & 0b1000 != 0,
        })
    }
}

/// CONNECT flags byte.
///
/// Bit layout, most significant first: `userName`, `password`, `willRetain`,
/// `willQos` (two bits), `willFlag`, `cleanSession`, `reserved`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectFlags {
    pub user_name: bool,
    pub password: bool,
    pub will_retain: bool,
    pub will_qos: QoS,
    pub will: bool,
    pub clean_session: bool,
    pub reserved: bool,
}

impl ConnectFlags {
    #[must_use]
    pub fn to_byte(self) -> u8 {
        (u8::from(self.user_name) << 7)
            | (u8::from(self.password) << 6)
            | (u8::from(self.will_retain) << 5)
            | (self.will_qos.as_u8() << 3)
            | (u8::from(self.will) << 2)
            | (u8::from(self.clean_session) << 1)
            | u8::from(self.reserved)
    }

    /// Unpack and validate a CONNECT flags byte.
    ///
    /// # Errors
    ///
    /// Fails when the reserved bit is set, when the Will QoS is `3`, or when
    /// Will QoS/retain bits are present without the Will flag.
    pub fn from_byte(byte: u8) -> Result<Self, MalformedFrame> {
        let flags = Self {
            user_name: byte & 0x80 != 0,
            password: byte & 0x40 != 0,
            will_retain: byte & 0x20 != 0,
            will_qos: QoS::from_bits((byte >> 3) & 0b11)?,
            will: byte & 0x04 != 0,
            clean_session: byte & 0x02 != 0,
            reserved: byte & 0x01 != 0,
        };
        if flags.reserved {
            return Err(MalformedFrame::ReservedConnectFlag);
        }
        if !flags.will && (flags.will_retain || flags.will_qos != QoS::AtMostOnce) {
            return Err(MalformedFrame::InconsistentWillFlags);
        }
        Ok(flags)
    }
}

/// Message a client registers at connect time for publication on abnormal
/// disconnect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub message: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// CONNECT variable header and payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connect {
    pub protocol_name: String,
    pub protocol_version: u8,
    pub clean_session: bool,
    /// Declared keepalive in seconds. `0` disables the keepalive timer.
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub user_name: Option<String>,
    pub password: Option<Bytes>,
}

impl Connect {
    /// CONNECT for `client_id` with the default protocol name and level.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            protocol_name: PROTOCOL_NAME.to_owned(),
            protocol_version: PROTOCOL_LEVEL,
            clean_session: true,
            keep_alive: 0,
            client_id: client_id.into(),
            will: None,
            user_name: None,
            password: None,
        }
    }

    #[must_use]
    pub fn with_keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    #[must_use]
    pub fn with_will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, user_name: impl Into<String>, password: Bytes) -> Self {
        self.user_name = Some(user_name.into());
        self.password = Some(password);
        self
    }

    /// Flags byte implied by the optional fields present.
    #[must_use]
    pub fn flags(&self) -> ConnectFlags {
        ConnectFlags {
            user_name: self.user_name.is_some(),
            password: self.password.is_some(),
            will_retain: self.will.as_ref().is_some_and(|w| w.retain),
            will_qos: self.will.as_ref().map_or(QoS::AtMostOnce, |w| w.qos),
            will: self.will.is_some(),
            clean_session: self.clean_session,
            reserved: false,
        }
    }
}

/// CONNACK return codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadCredentials = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    /// # Errors
    ///
    /// Returns [`MalformedFrame::UnknownReturnCode`] for values above `5`.
    pub fn from_u8(code: u8) -> Result<Self, MalformedFrame> {
        Ok(match code {
            0 => Self::Accepted,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadCredentials,
            5 => Self::NotAuthorized,
            other => return Err(MalformedFrame::UnknownReturnCode(other)),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl ConnAck {
    #[must_use]
    pub fn accepted() -> Self {
        Self {
            session_present: false,
            return_code: ConnectReturnCode::Accepted,
        }
    }
}

/// PUBLISH frame.
///
/// `message_id` is `Some` exactly when `qos` is above [`QoS::AtMostOnce`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub message_id: Option<u16>,
    pub payload: Bytes,
}

impl Publish {
    /// QoS 0 publish of `payload` to `topic`.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: topic.into(),
            message_id: None,
            payload: payload.into(),
        }
    }

    /// Raise the delivery level, tagging the frame with `message_id` when the
    /// level requires one.
    #[must_use]
    pub fn with_qos(mut self, qos: QoS, message_id: u16) -> Self {
        self.qos = qos;
        self.message_id = qos.requires_message_id().then_some(message_id);
        self
    }

    #[must_use]
    pub fn flags(&self) -> PublishFlags {
        PublishFlags {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        }
    }
}

/// One `(filter, qos)` request inside a SUBSCRIBE.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeFilter {
    pub filter: String,
    pub qos: QoS,
}

impl SubscribeFilter {
    #[must_use]
    pub fn new(filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            filter: filter.into(),
            qos,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscribe {
    pub message_id: u16,
    pub filters: Vec<SubscribeFilter>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubAck {
    pub message_id: u16,
    /// One granted QoS (or [`SUBACK_FAILURE`]) per requested filter.
    pub return_codes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unsubscribe {
    pub message_id: u16,
    /// Raw filter strings; each may hold several comma-separated filters.
    pub filters: Vec<String>,
}

/// One decoded protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(u16),
    PubRec(u16),
    PubRel(u16),
    PubComp(u16),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(u16),
    PingReq,
    PingResp,
    Disconnect,
}

const MESSAGE_ID_LEN: usize = 2;
const LENGTH_PREFIX_LEN: usize = 2;

fn prefixed(len: usize) -> usize { LENGTH_PREFIX_LEN + len }

impl Frame {
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnAck(_) => PacketType::ConnAck,
            Self::Publish(_) => PacketType::Publish,
            Self::PubAck(_) => PacketType::PubAck,
            Self::PubRec(_) => PacketType::PubRec,
            Self::PubRel(_) => PacketType::PubRel,
            Self::PubComp(_) => PacketType::PubComp,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubAck(_) => PacketType::SubAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubAck(_) => PacketType::UnsubAck,
            Self::PingReq => PacketType::PingReq,
            Self::PingResp => PacketType::PingResp,
            Self::Disconnect => PacketType::Disconnect,
        }
    }

    /// First byte of the encoded frame.
    #[must_use]
    pub fn fixed_header_byte(&self) -> u8 {
        let high = self.packet_type().as_u8() << 4;
        match self {
            Self::Publish(publish) => high | publish.flags().to_bits(),
            _ => high,
        }
    }

    /// Message id carried by the frame, if its type has one.
    #[must_use]
    pub fn message_id(&self) -> Option<u16> {
        match self {
            Self::Publish(publish) => publish.message_id,
            Self::PubAck(id)
            | Self::PubRec(id)
            | Self::PubRel(id)
            | Self::PubComp(id)
            | Self::UnsubAck(id) => Some(*id),
            Self::Subscribe(subscribe) => Some(subscribe.message_id),
            Self::SubAck(ack) => Some(ack.message_id),
            Self::Unsubscribe(unsubscribe) => Some(unsubscribe.message_id),
            Self::Connect(_) | Self::ConnAck(_) | Self::PingReq | Self::PingResp | Self::Disconnect => {
                None
            }
        }
    }

    /// Byte length of the variable header and payload.
    #[must_use]
    pub fn remaining_length(&self) -> usize {
        match self {
            Self::Connect(connect) => {
                let will = connect
                    .will
                    .as_ref()
                    .map_or(0, |w| prefixed(w.topic.len()) + prefixed(w.message.len()));
                prefixed(connect.protocol_name.len())
                    + 1 // protocol level
                    + 1 // flags
                    + 2 // keepalive
                    + prefixed(connect.client_id.len())
                    + will
                    + connect.user_name.as_ref().map_or(0, |u| prefixed(u.len()))
                    + connect.password.as_ref().map_or(0, |p| prefixed(p.len()))
            }
            Self::ConnAck(_) => 2,
            Self::Publish(publish) => {
                let id = if publish.qos.requires_message_id() {
                    MESSAGE_ID_LEN
                } else {
                    0
                };
                prefixed(publish.topic.len()) + id + publish.payload.len()
            }
            Self::PubAck(_)
            | Self::PubRec(_)
            | Self::PubRel(_)
            | Self::PubComp(_)
            | Self::UnsubAck(_) => MESSAGE_ID_LEN,
            Self::Subscribe(subscribe) => {
                MESSAGE_ID_LEN
                    + subscribe
                        .filters
                        .iter()
                        .map(|f| prefixed(f.filter.len()) + 1)
                        .sum::<usize>()
            }
            Self::SubAck(ack) => MESSAGE_ID_LEN + ack.return_codes.len(),
            Self::Unsubscribe(unsubscribe) => {
                MESSAGE_ID_LEN
                    + unsubscribe
                        .filters
                        .iter()
                        .map(|f| prefixed(f.len()))
                        .sum::<usize>()
            }
            Self::PingReq | Self::PingResp | Self::Disconnect => 0,
        }
    }

    /// Total encoded size: fixed header byte, varint length, then body.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let remaining = self.remaining_length();
        1 + remaining_length_len(remaining) + remaining
    }
}

impl From<Publish> for Frame {
    fn from(value: Publish) -> Self { Self::Publish(value) }
}

impl From<Connect> for Frame {
    fn from(value: Connect) -> Self { Self::Connect(value) }
}
