//! A connection's open bus subscriptions and their delivery tasks.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU16, Ordering},
    },
};

use log::debug;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::{FrameWriter, WriteError};
use crate::{
    bus::{PartitionStream, TopicPattern, TopicSubscription},
    codec::{Publish, QoS},
};

struct ActiveSubscription {
    qos: QoS,
    stop: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    next_id: Arc<AtomicU16>,
    _feeds: DropGuard,
}

impl ActiveSubscription {
    /// Ask the delivery tasks to stop after their current write and hand
    /// back their handles.
    fn close(self) -> Vec<JoinHandle<()>> {
        self.stop.cancel();
        self.tasks
    }
}

/// Subscriptions keyed by bus topic.
///
/// Delivery tasks of closed subscriptions are kept until they finish so
/// [`abort_tasks`](Self::abort_tasks) can cut off one stuck on a write.
pub struct SubscriptionSet {
    entries: HashMap<String, ActiveSubscription>,
    retired: Vec<JoinHandle<()>>,
    scope: CancellationToken,
}

impl SubscriptionSet {
    /// Create an empty set whose delivery tasks stop when `scope` is
    /// cancelled.
    #[must_use]
    pub fn new(scope: CancellationToken) -> Self {
        Self {
            entries: HashMap::new(),
            retired: Vec::new(),
            scope,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Subscribed topics in name order.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.entries.keys().cloned().collect();
        topics.sort_unstable();
        topics
    }

    #[must_use]
    pub fn qos(&self, topic: &str) -> Option<QoS> { self.entries.get(topic).map(|s| s.qos) }

    /// Start delivering `subscription` to `writer` at `qos`. An existing
    /// subscription to the same topic is closed first.
    pub fn insert(&mut self, subscription: TopicSubscription, qos: QoS, writer: &FrameWriter) {
        let (topic, partitions, feeds) = subscription.into_parts();
        let stop = self.scope.child_token();
        let next_id = Arc::new(AtomicU16::new(0));
        let tasks = partitions
            .into_iter()
            .map(|stream| {
                tokio::spawn(deliver(
                    stream,
                    qos,
                    Arc::clone(&next_id),
                    writer.clone(),
                    stop.clone(),
                ))
            })
            .collect();
        let active = ActiveSubscription {
            qos,
            stop,
            tasks,
            next_id,
            _feeds: feeds,
        };
        if let Some(previous) = self.entries.insert(topic, active) {
            let tasks = previous.close();
            self.retire(tasks);
        }
    }

    /// Close every subscription whose topic `pattern` matches and return how
    /// many were closed.
    pub fn remove_matching(&mut self, pattern: &TopicPattern) -> usize {
        let matched: Vec<String> = self
            .entries
            .keys()
            .filter(|topic| pattern.matches(topic))
            .cloned()
            .collect();
        for topic in &matched {
            if let Some(subscription) = self.entries.remove(topic) {
                let tasks = subscription.close();
                self.retire(tasks);
            }
        }
        matched.len()
    }

    /// Message id the next delivery on `topic` will carry.
    #[must_use]
    pub fn next_message_id(&self, topic: &str) -> Option<u16> {
        self.entries
            .get(topic)
            .map(|s| s.next_id.load(Ordering::Acquire))
    }

    /// Delivery tasks not yet finished, including those of closed
    /// subscriptions.
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.entries
            .values()
            .flat_map(|s| &s.tasks)
            .chain(&self.retired)
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Close every subscription. Their delivery tasks finish the write in
    /// progress, if any, and then stop.
    pub fn close_all(&mut self) {
        let tasks: Vec<JoinHandle<()>> = self
            .entries
            .drain()
            .flat_map(|(_, subscription)| subscription.close())
            .collect();
        self.retire(tasks);
    }

    /// Close every subscription and abort all delivery tasks, including any
    /// still blocked on a write.
    pub fn abort_tasks(&mut self) {
        self.close_all();
        for task in self.retired.drain(..) {
            task.abort();
        }
    }

    fn retire(&mut self, tasks: Vec<JoinHandle<()>>) {
        self.retired.retain(|task| !task.is_finished());
        self.retired.extend(tasks);
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) { self.abort_tasks(); }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn deliver(
    mut stream: PartitionStream,
    qos: QoS,
    next_id: Arc<AtomicU16>,
    writer: FrameWriter,
    stop: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;

            () = stop.cancelled() => break,
            message = stream.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        let message_id = next_id.fetch_add(1, Ordering::AcqRel);
        let publish = Publish::new(message.topic, message.payload).with_qos(qos, message_id);
        match writer.send(publish.into()).await {
            Ok(()) => {}
            Err(WriteError::Closing | WriteError::Aborted) => break,
            Err(e) => debug!(
                "delivery write failed: partition={}, offset={}, error={e}",
                message.partition, message.offset
            ),
        }
    }
}

#[cfg(test)]
mod tests;
