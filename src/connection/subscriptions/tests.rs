//! Tests for subscription fan-out delivery.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::StreamExt;
use rstest::{fixture, rstest};
use tokio::{
    io::{DuplexStream, duplex},
    time,
};
use tokio_util::{codec::FramedRead, sync::CancellationToken};

use super::SubscriptionSet;
use crate::{
    bus::{ConsumerSession, MessageBus, TopicPattern, memory::MemoryBus},
    codec::{Frame, MqttCodec, Publish, QoS},
    connection::FrameWriter,
};

struct Harness {
    bus: MemoryBus,
    session: Arc<dyn ConsumerSession>,
    writer: FrameWriter,
    frames: FramedRead<DuplexStream, MqttCodec>,
    set: SubscriptionSet,
}

#[fixture]
async fn harness() -> Harness {
    let bus = MemoryBus::new(2);
    let session = bus.open_consumer().await.expect("session");
    let (client, server) = duplex(4096);
    Harness {
        bus,
        session,
        writer: FrameWriter::new(server, MqttCodec::default()),
        frames: FramedRead::new(client, MqttCodec::default()),
        set: SubscriptionSet::new(CancellationToken::new()),
    }
}

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

async fn next_publish(frames: &mut FramedRead<DuplexStream, MqttCodec>) -> Publish {
    match frames.next().await.expect("frame").expect("decode") {
        Frame::Publish(publish) => publish,
        other => panic!("expected PUBLISH, got {other:?}"),
    }
}

#[rstest]
#[tokio::test]
async fn delivers_with_increasing_message_ids(#[future] harness: Harness) {
    let mut h = harness.await;
    let subscription = h.session.subscribe("t", 8).await.expect("subscribe");
    assert_eq!(subscription.partition_count(), 2);
    h.set.insert(subscription, QoS::AtLeastOnce, &h.writer);

    h.bus.publish("t", Bytes::from_static(b"a")).await.expect("publish");
    h.bus.publish("t", Bytes::from_static(b"b")).await.expect("publish");

    let mut ids = Vec::new();
    for _ in 0..2 {
        let publish = next_publish(&mut h.frames).await;
        assert_eq!(publish.topic, "t");
        assert_eq!(publish.qos, QoS::AtLeastOnce);
        ids.push(publish.message_id.expect("message id"));
    }
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1]);
    assert_eq!(h.set.next_message_id("t"), Some(2));
}

#[rstest]
#[tokio::test]
async fn qos0_delivery_carries_no_message_id(#[future] harness: Harness) {
    let mut h = harness.await;
    let subscription = h.session.subscribe("t", 8).await.expect("subscribe");
    h.set.insert(subscription, QoS::AtMostOnce, &h.writer);
    h.bus.publish("t", Bytes::from_static(b"x")).await.expect("publish");

    let publish = next_publish(&mut h.frames).await;
    assert_eq!(publish.message_id, None);
    assert_eq!(publish.payload, Bytes::from_static(b"x"));
}

#[rstest]
#[tokio::test]
async fn unsubscribe_stops_delivery(#[future] harness: Harness) {
    let mut h = harness.await;
    for topic in ["a.1", "a.2", "b.1"] {
        let subscription = h.session.subscribe(topic, 8).await.expect("subscribe");
        h.set.insert(subscription, QoS::AtMostOnce, &h.writer);
    }
    let pattern = TopicPattern::new("a\\..*").expect("pattern");
    assert_eq!(h.set.remove_matching(&pattern), 2);
    assert_eq!(h.set.topics(), vec!["b.1".to_owned()]);
    settle().await;
    assert_eq!(h.bus.reader_count("a.1"), 0);

    h.bus.publish("a.1", Bytes::from_static(b"gone")).await.expect("publish");
    let quiet = time::timeout(Duration::from_millis(50), h.frames.next()).await;
    assert!(quiet.is_err());
}

#[rstest]
#[tokio::test]
async fn resubscribing_replaces_the_previous_subscription(#[future] harness: Harness) {
    let mut h = harness.await;
    let first = h.session.subscribe("t", 8).await.expect("subscribe");
    h.set.insert(first, QoS::AtMostOnce, &h.writer);
    let second = h.session.subscribe("t", 8).await.expect("subscribe");
    h.set.insert(second, QoS::ExactlyOnce, &h.writer);

    assert_eq!(h.set.len(), 1);
    assert_eq!(h.set.qos("t"), Some(QoS::ExactlyOnce));
    settle().await;
    assert_eq!(h.bus.reader_count("t"), 2);
}

#[rstest]
#[tokio::test]
async fn close_all_detaches_every_reader(#[future] harness: Harness) {
    let mut h = harness.await;
    let subscription = h.session.subscribe("t", 8).await.expect("subscribe");
    h.set.insert(subscription, QoS::AtMostOnce, &h.writer);
    h.set.close_all();
    settle().await;
    assert!(h.set.is_empty());
    assert_eq!(h.bus.reader_count("t"), 0);
}

#[rstest]
#[case("a\\.1", &["a.2", "b.1"])]
#[case("1", &["a.2"])]
#[case("^b", &["a.1", "a.2"])]
#[tokio::test]
async fn unsubscribe_filters_are_regexes_matched_anywhere(
    #[future] harness: Harness,
    #[case] pattern: &str,
    #[case] remaining: &[&str],
) {
    let mut h = harness.await;
    for topic in ["a.1", "a.2", "b.1"] {
        let subscription = h.session.subscribe(topic, 8).await.expect("subscribe");
        h.set.insert(subscription, QoS::AtMostOnce, &h.writer);
    }
    let pattern = TopicPattern::new(pattern).expect("pattern");
    h.set.remove_matching(&pattern);
    assert_eq!(h.set.topics(), remaining);
}

#[rstest]
#[tokio::test]
async fn abort_tasks_stops_delivery_blocked_on_a_silent_peer() {
    let bus = MemoryBus::new(1);
    let session = bus.open_consumer().await.expect("session");
    // The peer never reads, so the first delivery fills the pipe and blocks.
    let (_client, server) = duplex(8);
    let writer = FrameWriter::new(server, MqttCodec::default());
    let mut set = SubscriptionSet::new(CancellationToken::new());
    let subscription = session.subscribe("t", 8).await.expect("subscribe");
    set.insert(subscription, QoS::AtMostOnce, &writer);

    bus.publish("t", Bytes::from(vec![7; 64])).await.expect("publish");
    settle().await;
    assert_eq!(writer.in_flight(), 1);

    set.close_all();
    settle().await;
    assert_eq!(set.live_tasks(), 1);

    set.abort_tasks();
    settle().await;
    assert_eq!(set.live_tasks(), 0);
    assert_eq!(writer.in_flight(), 0);
}
