//! A framed MQTT client for driving a gateway connection.

use std::{io, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    time::timeout,
};
use tokio_util::codec::Framed;
use wiregate::codec::{CodecError, ConnAck, Frame, MqttCodec};

/// How long [`TestClient::recv`] waits before declaring the gateway silent.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Client half of a gateway connection.
pub struct TestClient<S> {
    framed: Framed<S, MqttCodec>,
}

impl<S> TestClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: S) -> Self {
        Self {
            framed: Framed::new(io, MqttCodec::default()),
        }
    }

    /// Send `frame`.
    ///
    /// # Errors
    ///
    /// Propagates encode and transport failures.
    pub async fn send(&mut self, frame: Frame) -> Result<(), CodecError> { self.framed.send(frame).await }

    /// Write raw bytes, bypassing the encoder.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        let io = self.framed.get_mut();
        io.write_all(bytes).await?;
        io.flush().await
    }

    /// Next frame from the gateway, or `None` once it has closed the stream.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives within [`RECV_TIMEOUT`] or the bytes do not
    /// decode.
    pub async fn recv(&mut self) -> Option<Frame> {
        timeout(RECV_TIMEOUT, self.framed.next())
            .await
            .expect("gateway did not respond in time")
            .map(|frame| frame.expect("gateway sent an undecodable frame"))
    }

    /// Next frame, which must exist.
    ///
    /// # Panics
    ///
    /// Panics if the gateway closed the stream instead.
    pub async fn expect_frame(&mut self) -> Frame { self.recv().await.expect("gateway closed the connection") }

    /// Wait for the gateway to close the stream.
    ///
    /// # Panics
    ///
    /// Panics if a frame arrives first.
    pub async fn expect_closed(&mut self) {
        if let Some(frame) = self.recv().await {
            panic!("expected close, got {frame:?}");
        }
    }

    /// Send `connect` and assert the gateway accepts it.
    ///
    /// # Panics
    ///
    /// Panics if sending fails or the reply is not an accepting CONNACK.
    pub async fn handshake(&mut self, connect: Frame) {
        self.send(connect).await.expect("send CONNECT");
        assert_eq!(self.expect_frame().await, Frame::ConnAck(ConnAck::accepted()));
    }

    /// Close the write half, signalling a clean EOF to the gateway.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub async fn shutdown(&mut self) -> io::Result<()> { self.framed.get_mut().shutdown().await }

    pub fn into_inner(self) -> S { self.framed.into_inner() }
}
