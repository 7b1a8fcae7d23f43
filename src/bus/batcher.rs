//! Time-based batching for unacknowledged publishes.
//!
//! QoS 0 messages are appended to a per-topic buffer and submitted to the bus
//! in one batch per topic each interval. A failed batch is logged and
//! dropped. A topic's buffer is discarded once it stays empty for a whole
//! interval.

use std::{
    mem,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, warn};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::MessageBus;

type Buffer = Arc<Mutex<Vec<Bytes>>>;

/// Per-topic buffers flushed to the bus on a fixed interval.
pub struct PublishBatcher {
    bus: Arc<dyn MessageBus>,
    buffers: DashMap<String, Buffer>,
    interval: Duration,
}

impl PublishBatcher {
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, interval: Duration) -> Self {
        Self {
            bus,
            buffers: DashMap::new(),
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration { self.interval }

    /// Queue `payload` for the next batch on `topic`.
    pub fn append(&self, topic: &str, payload: Bytes) {
        let buffer = match self.buffers.get(topic) {
            Some(buffer) => Arc::clone(buffer.value()),
            None => Arc::clone(self.buffers.entry(topic.to_owned()).or_default().value()),
        };
        buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);
    }

    /// Number of payloads waiting for `topic`.
    #[must_use]
    pub fn pending(&self, topic: &str) -> usize {
        self.buffers.get(topic).map_or(0, |buffer| {
            buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
        })
    }

    /// Number of topics currently holding a buffer.
    #[must_use]
    pub fn buffered_topics(&self) -> usize { self.buffers.len() }

    /// Submit every non-empty buffer as one batch and return how many batches
    /// were attempted.
    ///
    /// Buffers are swapped out before submission so appends made during the
    /// flush land in the next batch. Buffers already empty are discarded.
    pub async fn flush(&self) -> usize {
        let snapshot: Vec<(String, Buffer)> = self
            .buffers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        let mut batches = 0;
        let mut idle = Vec::new();
        for (topic, buffer) in snapshot {
            let payloads = mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner));
            if payloads.is_empty() {
                idle.push(topic);
                continue;
            }
            batches += 1;
            let count = payloads.len();
            crate::metrics::inc_publish_batches();
            if let Err(e) = self.bus.publish_batch(&topic, payloads).await {
                crate::metrics::inc_bus_publish_failures();
                warn!("batch publish failed, messages dropped: topic={topic}, count={count}, error={e}");
            } else {
                debug!("batch published: topic={topic}, count={count}");
            }
        }
        for topic in idle {
            // A buffer still shared is being appended to.
            self.buffers.remove_if(&topic, |_, buffer| {
                Arc::strong_count(buffer) == 1
                    && buffer.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
            });
        }
        batches
    }

    /// Flush on every interval tick until `shutdown` fires, then flush once
    /// more.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush().await;
                }
            }
        }
        self.flush().await;
    }
}
