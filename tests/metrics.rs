#![cfg(feature = "metrics")]
//! Tests for `wiregate` metrics.
//!
//! Counters and gauges are observed through
//! `metrics_util::debugging::DebuggingRecorder`.

use ::metrics::{SharedString, Unit};
use metrics_util::{
    CompositeKey,
    debugging::{DebugValue, DebuggingRecorder, Snapshotter},
};
use rstest::rstest;
use wiregate::{
    bus::BridgeSettings,
    codec::Frame,
    connection::ConnectionSettings,
    metrics::{self, Direction},
};
use wiregate_testing::{Gateway, frames};

type Recorded = [(CompositeKey, Option<Unit>, Option<SharedString>, DebugValue)];

/// Creates a debugging recorder and snapshotter for metrics testing.
fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

/// Sum of the counters named `name` in one snapshot, optionally narrowed to
/// a label. Taking a snapshot drains counters, so take it once per test.
fn counter(recorded: &Recorded, name: &str, label: Option<(&str, &str)>) -> u64 {
    recorded
        .iter()
        .filter(|(key, _, _, _)| {
            key.key().name() == name
                && label.is_none_or(|(k, v)| key.key().labels().any(|l| l.key() == k && l.value() == v))
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(c) => *c,
            _ => 0,
        })
        .sum()
}

#[rstest]
#[case(Direction::Inbound, "inbound")]
#[case(Direction::Outbound, "outbound")]
fn frame_metric_is_labelled_by_direction(#[case] direction: Direction, #[case] label: &str) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    ::metrics::with_local_recorder(&recorder, || metrics::inc_frames(direction));
    let recorded = snapshotter.snapshot().into_vec();
    assert_eq!(counter(&recorded, metrics::FRAMES_PROCESSED, Some(("direction", label))), 1);
}

#[rstest]
#[case(1)]
#[case(2)]
fn inc_connection_panics_counts(#[case] expected: u64) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    ::metrics::with_local_recorder(&recorder, || {
        (0..expected).for_each(|_| metrics::inc_connection_panics());
    });
    let recorded = snapshotter.snapshot().into_vec();
    assert_eq!(counter(&recorded, metrics::CONNECTION_PANICS, None), expected);
}

#[test]
fn connection_gauge_returns_to_zero() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    ::metrics::with_local_recorder(&recorder, || {
        metrics::inc_connections();
        metrics::inc_connections();
        metrics::dec_connections();
        metrics::dec_connections();
    });
    let gauge = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find(|(key, _, _, _)| key.key().name() == metrics::CONNECTIONS_ACTIVE)
        .map(|(_, _, _, value)| value);
    assert!(matches!(gauge, Some(DebugValue::Gauge(g)) if g.into_inner() == 0.0));
}

#[test]
fn connection_session_is_counted() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    ::metrics::with_local_recorder(&recorder, || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async {
            let gateway = Gateway::start(1, BridgeSettings::default(), ConnectionSettings::default()).await;
            let mut session = gateway.connect();
            session.client.send_raw(&frames::wire(&frames::connect("c"))).await.expect("send CONNECT");
            assert!(matches!(session.client.expect_frame().await, Frame::ConnAck(_)));

            let mut burst = vec![0x00, 0x00, 0x00];
            burst.extend(frames::wire(&Frame::PingReq));
            session.client.send_raw(&burst).await.expect("send burst");
            assert_eq!(session.client.expect_frame().await, Frame::PingResp);

            session.client.send_raw(&frames::wire(&Frame::Disconnect)).await.expect("send DISCONNECT");
            session.client.expect_closed().await;
            gateway.shutdown().await;
        });
    });

    let recorded = snapshotter.snapshot().into_vec();
    assert_eq!(counter(&recorded, metrics::RESYNC_BYTES_DISCARDED, None), 3);
    assert_eq!(
        counter(&recorded, metrics::FRAMES_PROCESSED, Some(("direction", "outbound"))),
        2
    );
    assert!(counter(&recorded, metrics::FRAMES_PROCESSED, Some(("direction", "inbound"))) >= 2);
}
