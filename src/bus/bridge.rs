//! Gateway-facing facade over a [`MessageBus`].

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::future::join_all;
use log::{debug, warn};
use regex::Regex;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    BusError,
    ConsumerLease,
    ConsumerPool,
    ConsumerSession,
    Delivery,
    MessageBus,
    PublishBatcher,
    TopicSubscription,
};

/// Token that turns a topic filter into a regular-expression pattern.
pub const WILDCARD: char = '*';

/// A regular expression over bus topic names.
///
/// Matching is unanchored: a topic matches when the expression matches
/// anywhere in its name. Use `^` and `$` to pin a whole name.
#[derive(Clone, Debug)]
pub struct TopicPattern {
    source: String,
    regex: Regex,
}

impl TopicPattern {
    /// Compile `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidPattern`] if `pattern` is not a valid
    /// regular expression.
    pub fn new(pattern: &str) -> Result<Self, BusError> {
        let regex = Regex::new(pattern).map_err(|source| BusError::InvalidPattern {
            pattern: pattern.to_owned(),
            source,
        })?;
        Ok(Self {
            source: pattern.to_owned(),
            regex,
        })
    }

    #[must_use]
    pub fn matches(&self, topic: &str) -> bool { self.regex.is_match(topic) }

    #[must_use]
    pub fn as_str(&self) -> &str { &self.source }
}

/// A subscribe filter.
///
/// Unsubscribe filters are always patterns; see [`TopicPattern`].
#[derive(Clone, Debug)]
pub enum TopicFilter {
    /// Names exactly one topic.
    Literal(String),
    /// Selects every topic whose name the pattern matches.
    Pattern(TopicPattern),
}

impl TopicFilter {
    /// Classify `filter`: it is a pattern when it contains [`WILDCARD`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidPattern`] for an uncompilable pattern.
    pub fn parse(filter: &str) -> Result<Self, BusError> {
        if filter.contains(WILDCARD) {
            TopicPattern::new(filter).map(Self::Pattern)
        } else {
            Ok(Self::Literal(filter.to_owned()))
        }
    }

    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Literal(name) => name == topic,
            Self::Pattern(pattern) => pattern.matches(topic),
        }
    }
}

/// Tunables for [`BusBridge`].
#[derive(Clone, Copy, Debug)]
pub struct BridgeSettings {
    pub consumer_pool_size: usize,
    pub batch_interval: Duration,
    pub subscription_buffer: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            consumer_pool_size: 8,
            batch_interval: Duration::from_millis(100),
            subscription_buffer: 200,
        }
    }
}

/// Process-wide access point to the bus shared by every connection.
pub struct BusBridge {
    bus: Arc<dyn MessageBus>,
    batcher: Arc<PublishBatcher>,
    pool: ConsumerPool,
    subscription_buffer: usize,
}

impl BusBridge {
    /// Build the bridge and open its consumer pool.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the pooled consumer sessions cannot be opened.
    pub async fn new(bus: Arc<dyn MessageBus>, settings: BridgeSettings) -> Result<Self, BusError> {
        let pool = ConsumerPool::new(Arc::clone(&bus), settings.consumer_pool_size).await?;
        let batcher = Arc::new(PublishBatcher::new(Arc::clone(&bus), settings.batch_interval));
        Ok(Self {
            bus,
            batcher,
            pool,
            subscription_buffer: settings.subscription_buffer.max(1),
        })
    }

    /// Publish and wait for the broker acknowledgment.
    ///
    /// # Errors
    ///
    /// Propagates the bus failure; nothing is retried.
    pub async fn publish_sync(&self, topic: &str, payload: Bytes) -> Result<Delivery, BusError> {
        let result = self.bus.publish(topic, payload).await;
        if let Err(e) = &result {
            crate::metrics::inc_bus_publish_failures();
            warn!("bus publish failed: topic={topic}, error={e}");
        }
        result
    }

    /// Queue `payload` for the next batch on `topic`.
    pub fn publish_async(&self, topic: &str, payload: Bytes) { self.batcher.append(topic, payload); }

    #[must_use]
    pub fn batcher(&self) -> &Arc<PublishBatcher> { &self.batcher }

    #[must_use]
    pub fn pool(&self) -> &ConsumerPool { &self.pool }

    /// Borrow a consumer session from the pool.
    ///
    /// # Errors
    ///
    /// See [`ConsumerPool::acquire`].
    pub async fn acquire_consumer(&self) -> Result<ConsumerLease, BusError> { self.pool.acquire().await }

    /// Open the subscriptions selected by `filter` on `session`.
    ///
    /// A literal filter yields exactly one subscription. A pattern is matched
    /// once against the bus's current topic listing and yields one
    /// subscription per matching topic; topics that fail to subscribe are
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] when the literal subscription, the pattern
    /// compilation or the topic listing fails.
    pub async fn subscribe(
        &self,
        session: &dyn ConsumerSession,
        filter: &str,
    ) -> Result<Vec<TopicSubscription>, BusError> {
        match TopicFilter::parse(filter)? {
            TopicFilter::Literal(topic) => {
                let subscription = session.subscribe(&topic, self.subscription_buffer).await?;
                Ok(vec![subscription])
            }
            TopicFilter::Pattern(pattern) => {
                let topics = session.topics().await?;
                let matched: Vec<String> = topics.into_iter().filter(|t| pattern.matches(t)).collect();
                debug!(
                    "pattern resolved: pattern={}, topics={matched:?}",
                    pattern.as_str()
                );
                let attempts = join_all(
                    matched
                        .iter()
                        .map(|topic| session.subscribe(topic, self.subscription_buffer)),
                )
                .await;
                let mut subscriptions = Vec::with_capacity(attempts.len());
                for (topic, attempt) in matched.iter().zip(attempts) {
                    match attempt {
                        Ok(subscription) => subscriptions.push(subscription),
                        Err(e) => warn!("subscribe failed: topic={topic}, error={e}"),
                    }
                }
                Ok(subscriptions)
            }
        }
    }

    /// Run the publish batcher on `tracker` until `shutdown` fires.
    pub fn spawn_batcher(&self, tracker: &TaskTracker, shutdown: CancellationToken) {
        tracker.spawn(Arc::clone(&self.batcher).run(shutdown));
    }

    /// Flush pending batches and close the pooled consumer sessions.
    pub async fn close(&self) {
        self.batcher.flush().await;
        self.pool.close().await;
    }
}
