//! QoS 2 in-flight bookkeeping.
//!
//! Every PUBREC sent to the client stays pending until the matching PUBREL
//! arrives and is resent on every assurance tick meanwhile. There is no retry
//! limit; the loop ends with the connection.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use log::debug;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::{FrameWriter, WriteError};
use crate::codec::Frame;

/// Pending PUBREC frames keyed by message id.
#[derive(Clone, Debug, Default)]
pub struct AssuranceSet {
    pending: Arc<Mutex<BTreeMap<u16, Frame>>>,
}

impl AssuranceSet {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Record the PUBREC for `message_id` and return it for sending.
    pub fn record(&self, message_id: u16) -> Frame {
        let frame = Frame::PubRec(message_id);
        self.lock().insert(message_id, frame.clone());
        frame
    }

    /// Drop the entry for `message_id`; `true` if one was pending.
    pub fn acknowledge(&self, message_id: u16) -> bool { self.lock().remove(&message_id).is_some() }

    #[must_use]
    pub fn contains(&self, message_id: u16) -> bool { self.lock().contains_key(&message_id) }

    #[must_use]
    pub fn len(&self) -> usize { self.lock().len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.lock().is_empty() }

    /// Pending frames in message id order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Frame> { self.lock().values().cloned().collect() }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u16, Frame>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resend every pending PUBREC each `tick` until `stop` fires or the writer
/// starts closing.
pub(crate) fn spawn_retransmit(
    set: AssuranceSet,
    writer: FrameWriter,
    tick: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(retransmit(set, writer, tick, stop))
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn retransmit(set: AssuranceSet, writer: FrameWriter, tick: Duration, stop: CancellationToken) {
    let mut ticker = time::interval(tick.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;

            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                for frame in set.snapshot() {
                    match writer.send(frame).await {
                        Ok(()) => {}
                        Err(WriteError::Closing | WriteError::Aborted) => return,
                        Err(e) => debug!("assurance resend failed: error={e}"),
                    }
                }
            }
        }
    }
}
