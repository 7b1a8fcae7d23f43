//! Bridge between protocol traffic and the external message bus.
//!
//! The gateway depends on the bus only through the narrow [`MessageBus`] and
//! [`ConsumerSession`] traits. [`BusBridge`] layers the gateway's policies on
//! top of them:
//!
//! - synchronous publish for acknowledged deliveries,
//! - time-batched asynchronous publish via [`PublishBatcher`],
//! - literal and wildcard topic subscription,
//! - a fixed pool of reusable consumer sessions ([`ConsumerPool`]).
//!
//! [`memory::MemoryBus`] is an in-process implementation used by default and
//! in tests. The `kafka` feature adds an `rdkafka`-backed implementation.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

mod batcher;
mod bridge;
mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
mod pool;

pub use batcher::PublishBatcher;
pub use bridge::{BridgeSettings, BusBridge, TopicFilter, TopicPattern, WILDCARD};
pub use error::BusError;
pub use pool::{ConsumerLease, ConsumerPool};

/// Message received from a bus partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Bytes,
}

/// Broker acknowledgment of a synchronous publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Producer side of the bus plus a factory for consumer sessions.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publish one message and wait for the broker to acknowledge it.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<Delivery, BusError>;

    /// Submit several messages for `topic` as one batch.
    async fn publish_batch(&self, topic: &str, payloads: Vec<Bytes>) -> Result<(), BusError>;

    /// Open a new consumer session.
    async fn open_consumer(&self) -> Result<Arc<dyn ConsumerSession>, BusError>;
}

/// A bus-level consumer session able to serve many topic subscriptions.
#[async_trait]
pub trait ConsumerSession: Send + Sync + 'static {
    /// Names of the topics currently known to the bus.
    async fn topics(&self) -> Result<Vec<String>, BusError>;

    /// Start consuming every partition of `topic` from the newest offset.
    ///
    /// Each partition stream buffers up to `buffer` undelivered messages.
    async fn subscribe(&self, topic: &str, buffer: usize) -> Result<TopicSubscription, BusError>;

    /// Release broker resources held by the session.
    async fn close(&self);
}

/// Messages arriving on one partition of a subscribed topic.
#[derive(Debug)]
pub struct PartitionStream {
    partition: i32,
    receiver: mpsc::Receiver<BusMessage>,
}

impl PartitionStream {
    #[must_use]
    pub fn new(partition: i32, receiver: mpsc::Receiver<BusMessage>) -> Self {
        Self {
            partition,
            receiver,
        }
    }

    #[must_use]
    pub fn partition(&self) -> i32 { self.partition }

    /// Wait for the next message; `None` once the partition feed has ended.
    pub async fn recv(&mut self) -> Option<BusMessage> { self.receiver.recv().await }
}

/// Live subscription to one bus topic.
///
/// Dropping the subscription, or the guard returned by [`into_parts`], stops
/// the backend's partition feeds.
///
/// [`into_parts`]: TopicSubscription::into_parts
#[derive(Debug)]
pub struct TopicSubscription {
    topic: String,
    partitions: Vec<PartitionStream>,
    guard: DropGuard,
}

impl TopicSubscription {
    /// Bundle partition streams with the token that stops their feeds.
    #[must_use]
    pub fn new(topic: impl Into<String>, partitions: Vec<PartitionStream>, stop: CancellationToken) -> Self {
        Self {
            topic: topic.into(),
            partitions,
            guard: stop.drop_guard(),
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str { &self.topic }

    #[must_use]
    pub fn partition_count(&self) -> usize { self.partitions.len() }

    /// Split into the topic name, its partition streams and the guard that
    /// closes the feeds when dropped.
    #[must_use]
    pub fn into_parts(self) -> (String, Vec<PartitionStream>, DropGuard) {
        (self.topic, self.partitions, self.guard)
    }
}
