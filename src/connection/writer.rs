//! Serialised frame writes shared by every task of a connection.
//!
//! The dispatch loop, the assurance retransmit task and every subscription
//! delivery task write to the same socket. Writes are serialised through an
//! async mutex and counted so the closing path can wait for outstanding
//! writes before shutting the socket down. Once the drain limit has passed,
//! [`FrameWriter::abort`] releases any write still blocked on a peer that
//! stopped reading.

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::SinkExt;
use log::debug;
use tokio::{
    io::AsyncWrite,
    sync::{Mutex, Notify},
    time,
};
use tokio_util::{codec::FramedWrite, sync::CancellationToken};

use super::error::WriteError;
use crate::codec::{Frame, MqttCodec};

type Sink = FramedWrite<Pin<Box<dyn AsyncWrite + Send>>, MqttCodec>;

struct WriterInner {
    sink: Mutex<Sink>,
    in_flight: AtomicUsize,
    idle: Notify,
    closing: AtomicBool,
    aborted: CancellationToken,
}

/// Cloneable handle to a connection's write half.
#[derive(Clone)]
pub struct FrameWriter {
    inner: Arc<WriterInner>,
}

struct InFlight<'a>(&'a WriterInner);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a WriterInner) -> Self {
        inner.in_flight.fetch_add(1, Ordering::AcqRel);
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl FrameWriter {
    pub fn new<W>(io: W, codec: MqttCodec) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        let io: Pin<Box<dyn AsyncWrite + Send>> = Box::pin(io);
        Self {
            inner: Arc::new(WriterInner {
                sink: Mutex::new(FramedWrite::new(io, codec)),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                closing: AtomicBool::new(false),
                aborted: CancellationToken::new(),
            }),
        }
    }

    /// Encode and flush `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Closing`] once [`begin_close`](Self::begin_close)
    /// has been called, [`WriteError::Aborted`] if [`abort`](Self::abort)
    /// fires while the write is pending, or the codec/I/O failure of the
    /// write.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn send(&self, frame: Frame) -> Result<(), WriteError> {
        if self.is_closing() {
            return Err(WriteError::Closing);
        }
        let _in_flight = InFlight::enter(&self.inner);
        let write = async {
            let mut sink = self.inner.sink.lock().await;
            sink.send(frame).await
        };
        tokio::select! {
            biased;

            () = self.inner.aborted.cancelled() => Err(WriteError::Aborted),
            result = write => result.map_err(WriteError::from),
        }
    }

    /// Refuse further writes. Writes already started still complete.
    pub fn begin_close(&self) { self.inner.closing.store(true, Ordering::Release); }

    /// Refuse further writes and abandon any write still pending, releasing
    /// the socket lock it holds.
    pub fn abort(&self) {
        self.begin_close();
        self.inner.aborted.cancel();
    }

    #[must_use]
    pub fn is_closing(&self) -> bool { self.inner.closing.load(Ordering::Acquire) }

    #[must_use]
    pub fn in_flight(&self) -> usize { self.inner.in_flight.load(Ordering::Acquire) }

    /// Wait up to `limit` for in-flight writes to finish. Returns `false` if
    /// the limit was reached first.
    pub async fn drain(&self, limit: Duration) -> bool {
        let wait = async {
            loop {
                let idle = self.inner.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                idle.await;
            }
        };
        time::timeout(limit, wait).await.is_ok()
    }

    /// Flush and shut down the write half, giving up after `limit`. Returns
    /// `false` on timeout; the socket then closes when the last handle drops.
    pub async fn shutdown(&self, limit: Duration) -> bool {
        let close = async {
            let mut sink = self.inner.sink.lock().await;
            if let Err(e) = sink.close().await {
                debug!("socket shutdown failed: error={e}");
            }
        };
        time::timeout(limit, close).await.is_ok()
    }
}
