//! In-process message bus.
//!
//! `MemoryBus` models the parts of a partitioned log broker the gateway
//! relies on: topics split into partitions, monotonically increasing offsets
//! per partition, and consumers that start at the newest offset. Topics are
//! created on first use. Availability can be toggled to exercise failure
//! paths.

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use log::warn;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use super::{
    BusError,
    BusMessage,
    ConsumerSession,
    Delivery,
    MessageBus,
    PartitionStream,
    TopicSubscription,
};

#[derive(Default)]
struct PartitionLog {
    records: Vec<Bytes>,
    readers: Vec<mpsc::Sender<BusMessage>>,
}

struct MemoryTopic {
    partitions: Vec<Mutex<PartitionLog>>,
    next_partition: AtomicUsize,
}

impl MemoryTopic {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Mutex::default()).collect(),
            next_partition: AtomicUsize::new(0),
        }
    }
}

struct Inner {
    partitions: usize,
    topics: DashMap<String, Arc<MemoryTopic>>,
    available: AtomicBool,
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
    batches: AtomicUsize,
}

impl Inner {
    fn topic(&self, name: &str) -> Arc<MemoryTopic> {
        if let Some(topic) = self.topics.get(name) {
            return Arc::clone(topic.value());
        }
        Arc::clone(
            self.topics
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(MemoryTopic::new(self.partitions)))
                .value(),
        )
    }

    fn ensure_available(&self) -> Result<(), BusError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BusError::Unavailable("memory bus marked unavailable".into()))
        }
    }

    fn append(&self, name: &str, payload: Bytes) -> Delivery {
        let topic = self.topic(name);
        let index = topic.next_partition.fetch_add(1, Ordering::Relaxed) % topic.partitions.len();
        let mut log = topic.partitions[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let partition = partition_id(index);
        let offset = i64::try_from(log.records.len()).unwrap_or(i64::MAX);
        log.records.push(payload.clone());
        let message = BusMessage {
            topic: name.to_owned(),
            partition,
            offset,
            payload,
        };
        log.readers.retain(|reader| match reader.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("subscriber buffer full, message dropped: topic={name}, partition={partition}, offset={offset}");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        Delivery { partition, offset }
    }
}

fn partition_id(index: usize) -> i32 { i32::try_from(index).unwrap_or(i32::MAX) }

/// In-process [`MessageBus`].
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl Default for MemoryBus {
    fn default() -> Self { Self::new(1) }
}

impl MemoryBus {
    /// Create a bus whose topics each have `partitions` partitions (at least
    /// one).
    #[must_use]
    pub fn new(partitions: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                topics: DashMap::new(),
                available: AtomicBool::new(true),
                sessions_opened: AtomicUsize::new(0),
                sessions_closed: AtomicUsize::new(0),
                batches: AtomicUsize::new(0),
            }),
        }
    }

    /// Create `topic` if it does not exist yet.
    pub fn create_topic(&self, topic: &str) { let _ = self.inner.topic(topic); }

    /// Every payload stored for `topic`, partition by partition in offset
    /// order.
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<Bytes> {
        let Some(topic) = self.inner.topics.get(topic).map(|t| Arc::clone(t.value())) else {
            return Vec::new();
        };
        topic
            .partitions
            .iter()
            .flat_map(|p| p.lock().unwrap_or_else(PoisonError::into_inner).records.clone())
            .collect()
    }

    /// Make subsequent publish and session calls fail (`false`) or succeed.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::Release);
    }

    #[must_use]
    pub fn sessions_opened(&self) -> usize { self.inner.sessions_opened.load(Ordering::Acquire) }

    #[must_use]
    pub fn sessions_closed(&self) -> usize { self.inner.sessions_closed.load(Ordering::Acquire) }

    /// Number of batch publish calls accepted so far.
    #[must_use]
    pub fn batches_published(&self) -> usize { self.inner.batches.load(Ordering::Acquire) }

    /// Live partition readers attached to `topic`.
    #[must_use]
    pub fn reader_count(&self, topic: &str) -> usize {
        self.inner.topics.get(topic).map_or(0, |topic| {
            topic
                .partitions
                .iter()
                .map(|p| {
                    p.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .readers
                        .iter()
                        .filter(|r| !r.is_closed())
                        .count()
                })
                .sum()
        })
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<Delivery, BusError> {
        self.inner.ensure_available()?;
        Ok(self.inner.append(topic, payload))
    }

    async fn publish_batch(&self, topic: &str, payloads: Vec<Bytes>) -> Result<(), BusError> {
        self.inner.ensure_available()?;
        for payload in payloads {
            self.inner.append(topic, payload);
        }
        self.inner.batches.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn open_consumer(&self) -> Result<Arc<dyn ConsumerSession>, BusError> {
        self.inner.ensure_available()?;
        self.inner.sessions_opened.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(MemoryConsumer {
            bus: Arc::clone(&self.inner),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConsumer {
    bus: Arc<Inner>,
    closed: AtomicBool,
}

impl MemoryConsumer {
    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        self.bus.ensure_available()
    }
}

#[async_trait]
impl ConsumerSession for MemoryConsumer {
    async fn topics(&self) -> Result<Vec<String>, BusError> {
        self.ensure_open()?;
        let names: BTreeSet<String> = self.bus.topics.iter().map(|t| t.key().clone()).collect();
        Ok(names.into_iter().collect())
    }

    async fn subscribe(&self, topic: &str, buffer: usize) -> Result<TopicSubscription, BusError> {
        self.ensure_open()?;
        let log = self.bus.topic(topic);
        let streams = log
            .partitions
            .iter()
            .enumerate()
            .map(|(index, partition)| {
                let (tx, rx) = mpsc::channel(buffer.max(1));
                partition
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .readers
                    .push(tx);
                PartitionStream::new(partition_id(index), rx)
            })
            .collect();
        // Readers are detached lazily once their receivers are dropped.
        Ok(TopicSubscription::new(topic, streams, CancellationToken::new()))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.bus.sessions_closed.fetch_add(1, Ordering::AcqRel);
        }
    }
}
