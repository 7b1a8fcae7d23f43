//! Kafka-backed [`MessageBus`] built on `rdkafka`.
//!
//! Synchronous publishes wait for acknowledgment from every in-sync replica.
//! Batches are enqueued on the producer without waiting for delivery
//! reports.
//!
//! Each consumer session owns a single `StreamConsumer`. Subscribing extends
//! its partition assignment from the newest offset and registers a route per
//! partition; one forwarding task per session hands received messages to the
//! matching routes. A partition is unassigned again once no subscription
//! routes it.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use rdkafka::{
    ClientConfig,
    Message,
    Offset,
    TopicPartitionList,
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    producer::{FutureProducer, FutureRecord},
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task,
    time,
};
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

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const CONSUMER_GROUP: &str = "wiregate";
/// Pause after a failed receive before polling the consumer again.
const RECV_BACKOFF: Duration = Duration::from_millis(500);

/// Producer plus the settings needed to open consumer sessions.
pub struct KafkaBus {
    servers: String,
    producer: FutureProducer,
}

impl KafkaBus {
    /// Connect a producer to the comma-joined `servers`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Unavailable`] if the producer cannot be created.
    pub fn new(servers: &[String]) -> Result<Self, BusError> {
        let servers = servers.join(",");
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &servers)
            .set("acks", "all")
            .set("message.timeout.ms", "5000")
            .create()?;
        Ok(Self { servers, producer })
    }

    fn consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.servers)
            .set("group.id", CONSUMER_GROUP)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest");
        config
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<Delivery, BusError> {
        let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(topic).payload(&payload[..]);
        let (partition, offset) = self
            .producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(e, _)| BusError::from(e))?;
        Ok(Delivery { partition, offset })
    }

    async fn publish_batch(&self, topic: &str, payloads: Vec<Bytes>) -> Result<(), BusError> {
        let mut first_error = None;
        for payload in &payloads {
            let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(topic).payload(&payload[..]);
            // The delivery future is dropped; the record stays queued.
            if let Err((e, _)) = self.producer.send_result(record) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn open_consumer(&self) -> Result<Arc<dyn ConsumerSession>, BusError> {
        let consumer: Arc<StreamConsumer> = Arc::new(self.consumer_config().create()?);
        let router = Arc::new(Mutex::new(Router::default()));
        let stop = CancellationToken::new();
        tokio::spawn(forward(Arc::clone(&consumer), Arc::clone(&router), stop.clone()));
        Ok(Arc::new(KafkaConsumer {
            consumer,
            router,
            stop,
        }))
    }
}

/// Subscription routes of one consumer session, keyed by topic partition.
#[derive(Default)]
struct Router {
    next_id: u64,
    routes: HashMap<(String, i32), Vec<(u64, mpsc::Sender<BusMessage>)>>,
}

impl Router {
    /// Register one sender per partition of `topic` under a new subscription
    /// id. Also returns the partitions that had no route before and so still
    /// need assigning.
    fn add(&mut self, topic: &str, senders: Vec<(i32, mpsc::Sender<BusMessage>)>) -> (u64, Vec<i32>) {
        let id = self.next_id;
        self.next_id += 1;
        let mut fresh = Vec::new();
        for (partition, sender) in senders {
            let routes = self.routes.entry((topic.to_owned(), partition)).or_default();
            if routes.is_empty() {
                fresh.push(partition);
            }
            routes.push((id, sender));
        }
        (id, fresh)
    }

    /// Drop subscription `id` on `topic` and return the partitions no
    /// subscription routes any more.
    fn remove(&mut self, topic: &str, id: u64) -> Vec<i32> {
        let mut idle = Vec::new();
        self.routes.retain(|(name, partition), routes| {
            if name != topic {
                return true;
            }
            routes.retain(|(route, _)| *route != id);
            if routes.is_empty() {
                idle.push(*partition);
                false
            } else {
                true
            }
        });
        idle.sort_unstable();
        idle
    }

    /// Hand `message` to every route of its partition. A full route drops
    /// the message; a closed one is forgotten.
    fn dispatch(&mut self, message: &BusMessage) {
        let key = (message.topic.clone(), message.partition);
        let Some(routes) = self.routes.get_mut(&key) else {
            return;
        };
        routes.retain(|(_, sender)| match sender.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "subscriber buffer full, message dropped: topic={}, partition={}, offset={}",
                    message.topic, message.partition, message.offset
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    #[cfg(test)]
    fn is_routed(&self, topic: &str, partition: i32) -> bool {
        self.routes
            .get(&(topic.to_owned(), partition))
            .is_some_and(|routes| !routes.is_empty())
    }
}

fn partition_list(topic: &str, partitions: &[i32], offset: Offset) -> Result<TopicPartitionList, KafkaError> {
    let mut list = TopicPartitionList::new();
    for partition in partitions {
        list.add_partition_offset(topic, *partition, offset)?;
    }
    Ok(list)
}

struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
    router: Arc<Mutex<Router>>,
    stop: CancellationToken,
}

impl KafkaConsumer {
    fn router(&self) -> MutexGuard<'_, Router> { self.router.lock().unwrap_or_else(PoisonError::into_inner) }

    async fn partitions(&self, topic: &str) -> Result<Vec<i32>, BusError> {
        let consumer = Arc::clone(&self.consumer);
        let name = topic.to_owned();
        let partitions = task::spawn_blocking(move || {
            let metadata = consumer.fetch_metadata(Some(name.as_str()), METADATA_TIMEOUT)?;
            Ok::<_, BusError>(
                metadata
                    .topics()
                    .iter()
                    .filter(|t| t.name() == name && t.error().is_none())
                    .flat_map(|t| t.partitions().iter().map(|p| p.id()))
                    .collect::<Vec<_>>(),
            )
        })
        .await
        .map_err(|e| BusError::Unavailable(e.to_string()))??;
        if partitions.is_empty() {
            return Err(BusError::UnknownTopic(topic.to_owned()));
        }
        Ok(partitions)
    }

    fn assign(&self, topic: &str, partitions: &[i32]) -> Result<(), KafkaError> {
        if partitions.is_empty() {
            return Ok(());
        }
        self.consumer
            .incremental_assign(&partition_list(topic, partitions, Offset::End)?)
    }
}

#[async_trait]
impl ConsumerSession for KafkaConsumer {
    async fn topics(&self) -> Result<Vec<String>, BusError> {
        if self.stop.is_cancelled() {
            return Err(BusError::Closed);
        }
        let consumer = Arc::clone(&self.consumer);
        task::spawn_blocking(move || {
            let metadata = consumer.fetch_metadata(None, METADATA_TIMEOUT)?;
            let mut names: Vec<String> = metadata.topics().iter().map(|t| t.name().to_owned()).collect();
            names.sort_unstable();
            Ok(names)
        })
        .await
        .map_err(|e| BusError::Unavailable(e.to_string()))?
    }

    async fn subscribe(&self, topic: &str, buffer: usize) -> Result<TopicSubscription, BusError> {
        if self.stop.is_cancelled() {
            return Err(BusError::Closed);
        }
        let partitions = self.partitions(topic).await?;
        let mut senders = Vec::with_capacity(partitions.len());
        let mut streams = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let (tx, rx) = mpsc::channel(buffer.max(1));
            senders.push((partition, tx));
            streams.push(PartitionStream::new(partition, rx));
        }
        let (id, fresh) = self.router().add(topic, senders);
        if let Err(e) = self.assign(topic, &fresh) {
            self.router().remove(topic, id);
            return Err(e.into());
        }
        debug!("kafka partitions assigned: topic={topic}, partitions={fresh:?}");

        let stop = self.stop.child_token();
        tokio::spawn(unroute_on_stop(
            Arc::clone(&self.consumer),
            Arc::clone(&self.router),
            topic.to_owned(),
            id,
            stop.clone(),
        ));
        Ok(TopicSubscription::new(topic, streams, stop))
    }

    async fn close(&self) { self.stop.cancel(); }
}

/// Wait for a subscription to end, then drop its routes and unassign the
/// partitions nobody else reads.
async fn unroute_on_stop(
    consumer: Arc<StreamConsumer>,
    router: Arc<Mutex<Router>>,
    topic: String,
    id: u64,
    stop: CancellationToken,
) {
    stop.cancelled().await;
    let idle = router
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&topic, id);
    if idle.is_empty() {
        return;
    }
    let unassigned = partition_list(&topic, &idle, Offset::Invalid)
        .and_then(|list| consumer.incremental_unassign(&list));
    match unassigned {
        Ok(()) => debug!("kafka partitions unassigned: topic={topic}, partitions={idle:?}"),
        Err(e) => debug!("kafka unassign failed: topic={topic}, error={e}"),
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn forward(consumer: Arc<StreamConsumer>, router: Arc<Mutex<Router>>, stop: CancellationToken) {
    loop {
        let received = tokio::select! {
            biased;

            () = stop.cancelled() => break,
            received = consumer.recv() => received.map(|message| BusMessage {
                topic: message.topic().to_owned(),
                partition: message.partition(),
                offset: message.offset(),
                payload: Bytes::copy_from_slice(message.payload().unwrap_or_default()),
            }),
        };
        match received {
            Ok(message) => router
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .dispatch(&message),
            Err(e) => {
                warn!("kafka receive failed: error={e}, backoff={RECV_BACKOFF:?}");
                tokio::select! {
                    biased;

                    () = stop.cancelled() => break,
                    () = time::sleep(RECV_BACKOFF) => {}
                }
            }
        }
    }
    debug!("kafka consumer session stopped");
}
