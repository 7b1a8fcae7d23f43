//! Sanity checks for the in-memory gateway harness.

use rstest::rstest;
use wiregate::{codec::Frame, connection::CloseReason};
use wiregate_testing::{Gateway, frames, gateway};

#[rstest]
#[tokio::test]
async fn drive_bytes_returns_gateway_output(#[future] gateway: Gateway) {
    let gateway = gateway.await;
    let burst = frames::wire_all(&[frames::connect("c"), Frame::Disconnect]);
    let (out, reason) = gateway.drive_bytes(&burst).await.expect("drive");
    assert_eq!(out, [0x20, 0x02, 0x00, 0x00]);
    assert_eq!(reason, CloseReason::ClientDisconnect);
    gateway.shutdown().await;
}

#[rstest]
#[tokio::test]
async fn connections_get_distinct_sessions(#[future] gateway: Gateway) {
    let gateway = gateway.await;
    let mut a = gateway.connect();
    let mut b = gateway.connect();
    a.client.handshake(frames::connect("a")).await;
    b.client.handshake(frames::connect("b")).await;
    a.client.shutdown().await.expect("close a");
    a.client.expect_closed().await;
    assert_eq!(a.task.await.expect("join"), CloseReason::PeerClosed);
    b.client.send(Frame::PingReq).await.expect("send PINGREQ");
    assert_eq!(b.client.expect_frame().await, Frame::PingResp);
    gateway.shutdown().await;
}
