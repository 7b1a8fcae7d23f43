//! Unit tests for frame encoding and decoding.

use bytes::{Bytes, BytesMut};
use rstest::rstest;
use tokio_util::codec::{Decoder, Encoder};

use super::*;

pub(crate) mod property;

fn publish_qos1() -> Frame {
    Frame::Publish(Publish::new("t", Bytes::from_static(b"hi")).with_qos(QoS::AtLeastOnce, 7))
}

fn retained_publish() -> Frame {
    let mut publish = Publish::new("a", Bytes::from_static(b"x"));
    publish.retain = true;
    Frame::Publish(publish)
}

fn connect_with_keepalive() -> Frame { Frame::Connect(Connect::new("c").with_keep_alive(2)) }

fn subscribe_one() -> Frame {
    Frame::Subscribe(Subscribe {
        message_id: 1,
        filters: vec![SubscribeFilter::new("a", QoS::AtLeastOnce)],
    })
}

fn suback_one() -> Frame {
    Frame::SubAck(SubAck {
        message_id: 1,
        return_codes: vec![1],
    })
}

#[rstest]
#[case::puback(Frame::PubAck(7), &[0x40, 0x02, 0x00, 0x07])]
#[case::pubrec(Frame::PubRec(9), &[0x50, 0x02, 0x00, 0x09])]
#[case::pubrel(Frame::PubRel(9), &[0x60, 0x02, 0x00, 0x09])]
#[case::pubcomp(Frame::PubComp(9), &[0x70, 0x02, 0x00, 0x09])]
#[case::unsuback(Frame::UnsubAck(3), &[0xb0, 0x02, 0x00, 0x03])]
#[case::pingreq(Frame::PingReq, &[0xc0, 0x00])]
#[case::pingresp(Frame::PingResp, &[0xd0, 0x00])]
#[case::disconnect(Frame::Disconnect, &[0xe0, 0x00])]
#[case::connack(Frame::ConnAck(ConnAck::accepted()), &[0x20, 0x02, 0x00, 0x00])]
#[case::publish_qos1(publish_qos1(), &[0x32, 0x07, 0x00, 0x01, b't', 0x00, 0x07, b'h', b'i'])]
#[case::publish_retained(retained_publish(), &[0x31, 0x04, 0x00, 0x01, b'a', b'x'])]
#[case::subscribe(subscribe_one(), &[0x80, 0x06, 0x00, 0x01, 0x00, 0x01, b'a', 0x01])]
#[case::suback(suback_one(), &[0x90, 0x03, 0x00, 0x01, 0x01])]
#[case::connect(
    connect_with_keepalive(),
    &[0x10, 0x0d, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x02, 0x00, 0x01, b'c']
)]
fn encodes_byte_exact_frames(#[case] frame: Frame, #[case] wire: &[u8]) {
    let encoded = encode_to_bytes(&frame).expect("encode");
    assert_eq!(&encoded[..], wire);
    assert_eq!(frame.encoded_len(), wire.len());
    assert_eq!(decode(wire), Ok((frame, wire.len())));
}

#[test]
fn connect_with_will_and_credentials_sets_flag_bits() {
    let connect = Connect::new("dev-1")
        .with_keep_alive(30)
        .with_will(Will {
            topic: "status".into(),
            message: Bytes::from_static(b"gone"),
            qos: QoS::AtLeastOnce,
            retain: true,
        })
        .with_credentials("user", Bytes::from_static(b"secret"));
    assert_eq!(connect.flags().to_byte(), 0b1110_1110);

    let frame = Frame::Connect(connect);
    let encoded = encode_to_bytes(&frame).expect("encode");
    assert_eq!(decode(&encoded), Ok((frame, encoded.len())));
}

#[test]
fn accepts_standard_subscribe_flags() {
    let wire = [0x82, 0x06, 0x00, 0x01, 0x00, 0x01, b'a', 0x01];
    assert_eq!(decode(&wire), Ok((subscribe_one(), wire.len())));
}

#[test]
fn decodes_only_the_first_of_concatenated_frames() {
    let wire = [0x40, 0x02, 0x00, 0x07, 0xc0, 0x00];
    assert_eq!(decode(&wire), Ok((Frame::PubAck(7), 4)));
    assert_eq!(decode(&wire[4..]), Ok((Frame::PingReq, 2)));
}

#[rstest]
#[case::reserved_zero(&[0x00, 0x00], MalformedFrame::ReservedPacketType(0))]
#[case::reserved_fifteen(&[0xf0, 0x00], MalformedFrame::ReservedPacketType(15))]
#[case::ack_flags(
    &[0x41, 0x02, 0x00, 0x07],
    MalformedFrame::InvalidFlags { packet: PacketType::PubAck, flags: 1 }
)]
#[case::qos_three(&[0x36, 0x03, 0x00, 0x01, b't'], MalformedFrame::InvalidQos(3))]
#[case::ack_trailing(
    &[0x40, 0x03, 0x00, 0x07, 0xc0],
    MalformedFrame::TrailingBytes { packet: PacketType::PubAck, extra: 1 }
)]
#[case::ack_short(
    &[0x40, 0x01, 0x00],
    MalformedFrame::FieldOverrun {
        packet: PacketType::PubAck,
        field: "message id",
        needed: 2,
        available: 1,
    }
)]
#[case::topic_past_window(
    &[0x30, 0x03, 0x00, 0x05, b'a', b'b', b'c', b'd', b'e'],
    MalformedFrame::FieldOverrun {
        packet: PacketType::Publish,
        field: "topic",
        needed: 5,
        available: 1,
    }
)]
#[case::invalid_utf8(
    &[0x30, 0x04, 0x00, 0x02, 0xff, 0xfe],
    MalformedFrame::InvalidUtf8 { packet: PacketType::Publish, field: "topic" }
)]
#[case::subscribe_without_filters(
    &[0x82, 0x02, 0x00, 0x01],
    MalformedFrame::EmptyFilterList { packet: PacketType::Subscribe }
)]
#[case::connect_reserved_bit(
    &[0x10, 0x0d, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x03, 0x00, 0x02, 0x00, 0x01, b'c'],
    MalformedFrame::ReservedConnectFlag
)]
#[case::unknown_connack_code(&[0x20, 0x02, 0x00, 0x09], MalformedFrame::UnknownReturnCode(9))]
fn rejects_malformed_frames(#[case] wire: &[u8], #[case] want: MalformedFrame) {
    assert_eq!(decode(wire), Err(DecodeError::Malformed(want)));
}

#[rstest]
#[case::empty(&[], 1)]
#[case::header_only(&[0x40], 1)]
#[case::partial_body(&[0x40, 0x02, 0x00], 1)]
#[case::partial_publish(&[0x30, 0x05, 0x00, 0x01], 3)]
fn reports_incomplete_frames(#[case] wire: &[u8], #[case] needed: usize) {
    assert_eq!(decode(wire), Err(DecodeError::Incomplete { needed }));
}

#[test]
fn caps_declared_frame_size() {
    let wire = [0x30, 0x80, 0x01];
    assert_eq!(
        decode_with_limit(&wire, 64),
        Err(DecodeError::Malformed(MalformedFrame::Oversized {
            size: 128,
            max: 64
        }))
    );
}

#[test]
fn refuses_publish_with_inconsistent_message_id() {
    let mut publish = Publish::new("t", Bytes::new());
    publish.qos = QoS::ExactlyOnce;
    assert_eq!(
        encode_to_bytes(&Frame::Publish(publish)),
        Err(EncodeError::MessageIdMismatch {
            qos: QoS::ExactlyOnce,
            expected: true
        })
    );
}

#[test]
fn refuses_oversized_string_fields() {
    let topic = "a".repeat(usize::from(u16::MAX) + 1);
    let mut dst = BytesMut::new();
    let err = encode(&Frame::Publish(Publish::new(topic, Bytes::new())), &mut dst)
        .expect_err("topic longer than u16::MAX must fail");
    assert!(matches!(err, EncodeError::FieldTooLong { field: "topic", .. }));
    assert!(dst.is_empty(), "nothing is written on error");
}

#[test]
fn codec_adapter_yields_frames_then_waits_for_more() {
    let mut codec = MqttCodec::default();
    let mut buf = BytesMut::new();
    codec.encode(Frame::PubAck(1), &mut buf).expect("encode");
    codec.encode(Frame::PingResp, &mut buf).expect("encode");
    buf.extend_from_slice(&[0x40, 0x02]);

    assert_eq!(codec.decode(&mut buf).expect("decode"), Some(Frame::PubAck(1)));
    assert_eq!(codec.decode(&mut buf).expect("decode"), Some(Frame::PingResp));
    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    assert_eq!(&buf[..], &[0x40, 0x02]);
}

#[test]
fn codec_adapter_surfaces_malformed_input() {
    let mut codec = MqttCodec::default();
    let mut buf = BytesMut::from(&[0x00u8, 0x00][..]);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(CodecError::Malformed(MalformedFrame::ReservedPacketType(0)))
    ));
}

#[rstest]
#[case::below_min(1, MIN_FRAME_LENGTH)]
#[case::default(DEFAULT_MAX_FRAME_LENGTH, DEFAULT_MAX_FRAME_LENGTH)]
#[case::above_max(usize::MAX, MAX_FRAME_LENGTH)]
fn codec_clamps_frame_length(#[case] requested: usize, #[case] effective: usize) {
    assert_eq!(MqttCodec::new(requested).max_frame_length(), effective);
}
