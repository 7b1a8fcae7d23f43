//! Shared proptest strategies for codec and reassembly property tests.

use bytes::Bytes;
use proptest::{
    collection::vec,
    option,
    prelude::{Just, Strategy, any, prop_oneof},
    test_runner::{Config as ProptestConfig, RngAlgorithm, TestRng, TestRunner},
};

use crate::codec::{
    ConnAck,
    Connect,
    ConnectReturnCode,
    Frame,
    Publish,
    QoS,
    SubAck,
    Subscribe,
    SubscribeFilter,
    Unsubscribe,
    Will,
};

pub(crate) fn deterministic_runner(cases: u32) -> TestRunner {
    let config = ProptestConfig {
        cases,
        ..ProptestConfig::default()
    };
    let rng = TestRng::deterministic_rng(RngAlgorithm::ChaCha);
    TestRunner::new_with_rng(config, rng)
}

fn qos_strategy() -> impl Strategy<Value = QoS> {
    prop_oneof![
        Just(QoS::AtMostOnce),
        Just(QoS::AtLeastOnce),
        Just(QoS::ExactlyOnce),
    ]
}

fn topic_strategy() -> impl Strategy<Value = String> { "[a-z0-9./_*-]{0,24}" }

fn payload_strategy() -> impl Strategy<Value = Bytes> { vec(any::<u8>(), 0..96).prop_map(Bytes::from) }

fn will_strategy() -> impl Strategy<Value = Will> {
    (topic_strategy(), payload_strategy(), qos_strategy(), any::<bool>()).prop_map(
        |(topic, message, qos, retain)| Will {
            topic,
            message,
            qos,
            retain,
        },
    )
}

fn connect_strategy() -> impl Strategy<Value = Frame> {
    (
        "[A-Za-z]{0,8}",
        any::<u8>(),
        any::<bool>(),
        any::<u16>(),
        "[a-z0-9-]{0,23}",
        option::of(will_strategy()),
        option::of("[a-z]{1,12}"),
        option::of(payload_strategy()),
    )
        .prop_map(
            |(protocol_name, protocol_version, clean_session, keep_alive, client_id, will, user_name, password)| {
                Frame::Connect(Connect {
                    protocol_name,
                    protocol_version,
                    clean_session,
                    keep_alive,
                    client_id,
                    will,
                    user_name,
                    password,
                })
            },
        )
}

fn connack_strategy() -> impl Strategy<Value = Frame> {
    (any::<bool>(), 0u8..=5).prop_map(|(session_present, code)| {
        Frame::ConnAck(ConnAck {
            session_present,
            return_code: ConnectReturnCode::from_u8(code).expect("code within 0..=5"),
        })
    })
}

pub(crate) fn publish_strategy() -> impl Strategy<Value = Frame> {
    (
        any::<bool>(),
        qos_strategy(),
        any::<bool>(),
        topic_strategy(),
        any::<u16>(),
        payload_strategy(),
    )
        .prop_map(|(dup, qos, retain, topic, id, payload)| {
            Frame::Publish(Publish {
                dup,
                qos,
                retain,
                topic,
                message_id: qos.requires_message_id().then_some(id),
                payload,
            })
        })
}

fn ack_strategy() -> impl Strategy<Value = Frame> {
    (0u8..5, any::<u16>()).prop_map(|(kind, id)| match kind {
        0 => Frame::PubAck(id),
        1 => Frame::PubRec(id),
        2 => Frame::PubRel(id),
        3 => Frame::PubComp(id),
        _ => Frame::UnsubAck(id),
    })
}

fn subscribe_strategy() -> impl Strategy<Value = Frame> {
    (
        any::<u16>(),
        vec(
            (topic_strategy(), qos_strategy()).prop_map(|(f, q)| SubscribeFilter::new(f, q)),
            1..4,
        ),
    )
        .prop_map(|(message_id, filters)| Frame::Subscribe(Subscribe { message_id, filters }))
}

fn suback_strategy() -> impl Strategy<Value = Frame> {
    (any::<u16>(), vec(any::<u8>(), 0..4)).prop_map(|(message_id, return_codes)| {
        Frame::SubAck(SubAck {
            message_id,
            return_codes,
        })
    })
}

fn unsubscribe_strategy() -> impl Strategy<Value = Frame> {
    (any::<u16>(), vec(topic_strategy(), 1..4))
        .prop_map(|(message_id, filters)| Frame::Unsubscribe(Unsubscribe { message_id, filters }))
}

fn bodyless_strategy() -> impl Strategy<Value = Frame> {
    prop_oneof![
        Just(Frame::PingReq),
        Just(Frame::PingResp),
        Just(Frame::Disconnect),
    ]
}

/// Any frame the codec can encode.
pub(crate) fn frame_strategy() -> impl Strategy<Value = Frame> {
    prop_oneof![
        connect_strategy(),
        connack_strategy(),
        publish_strategy(),
        ack_strategy(),
        subscribe_strategy(),
        suback_strategy(),
        unsubscribe_strategy(),
        bodyless_strategy(),
    ]
}
