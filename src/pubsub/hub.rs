//! Registry of live subscribers and per-topic fan-out.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::backend::{Backend, BackendError, Message, MessageStream, Topic};
use crate::net::ConnectionId;
use crate::observability::metrics;

struct Subscriber {
    id: ConnectionId,
    sender: mpsc::Sender<Message>,
    overflowed: Arc<AtomicBool>,
}

impl Subscriber {
    /// Queue `message`; false means this subscriber must be removed.
    fn deliver(&self, message: &Message) -> bool {
        match self.sender.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.overflowed.store(true, Ordering::Release);
                tracing::warn!(
                    connection_id = %self.id,
                    topic = %message.topic,
                    "Subscriber queue full; closing its stream"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

struct TopicEntry {
    generation: u64,
    subscribers: Vec<Subscriber>,
    pump: JoinHandle<()>,
}

struct HubInner {
    backend: Arc<dyn Backend>,
    topics: DashMap<Topic, TopicEntry>,
    buffer: usize,
    next_generation: AtomicU64,
}

impl HubInner {
    fn detach(&self, topic: &Topic, id: ConnectionId) {
        let idle = match self.topics.get_mut(topic) {
            Some(mut entry) => {
                entry.subscribers.retain(|s| s.id != id);
                entry.subscribers.is_empty()
            }
            None => false,
        };
        if idle {
            if let Some((_, entry)) = self.topics.remove_if(topic, |_, e| e.subscribers.is_empty()) {
                entry.pump.abort();
                tracing::debug!(topic = %topic, "Last subscriber left; upstream subscription closed");
            }
        }
    }
}

/// Server-wide registry of subscribed connections.
#[derive(Clone)]
pub struct SubscriptionHub {
    inner: Arc<HubInner>,
}

impl SubscriptionHub {
    /// `buffer` is the number of messages queued per subscriber before it is
    /// considered too slow.
    pub fn new(backend: Arc<dyn Backend>, buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                backend,
                topics: DashMap::new(),
                buffer: buffer.max(1),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Attach connection `id` to every topic. Resolves once all upstream
    /// subscriptions are confirmed; on error nothing stays attached.
    pub async fn subscribe(
        &self,
        id: ConnectionId,
        topics: Vec<Topic>,
    ) -> Result<Subscription, BackendError> {
        let (sender, receiver) = mpsc::channel(self.inner.buffer);
        let overflowed = Arc::new(AtomicBool::new(false));
        metrics::subscription_opened();
        let mut subscription = Subscription {
            id,
            topics: Vec::with_capacity(topics.len()),
            receiver,
            overflowed: overflowed.clone(),
            hub: self.inner.clone(),
        };

        for topic in topics {
            if subscription.topics.contains(&topic) {
                continue;
            }
            let subscriber = Subscriber {
                id,
                sender: sender.clone(),
                overflowed: overflowed.clone(),
            };
            self.attach(topic.clone(), subscriber).await?;
            subscription.topics.push(topic);
        }

        tracing::debug!(
            connection_id = %id,
            topics = subscription.topics.len(),
            "Subscription registered"
        );
        Ok(subscription)
    }

    async fn attach(&self, topic: Topic, subscriber: Subscriber) -> Result<(), BackendError> {
        if let Some(mut entry) = self.inner.topics.get_mut(&topic) {
            entry.subscribers.push(subscriber);
            return Ok(());
        }

        let stream = self.inner.backend.subscribe(topic.clone()).await?;
        match self.inner.topics.entry(topic.clone()) {
            // Another connection opened the topic while we were waiting;
            // join its fan-out and let our upstream stream drop.
            Entry::Occupied(mut occupied) => occupied.get_mut().subscribers.push(subscriber),
            Entry::Vacant(vacant) => {
                let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                let pump = tokio::spawn(pump(
                    Arc::downgrade(&self.inner),
                    topic,
                    generation,
                    stream,
                ));
                vacant.insert(TopicEntry {
                    generation,
                    subscribers: vec![subscriber],
                    pump,
                });
            }
        }
        Ok(())
    }

    /// Number of topics with a live upstream subscription.
    pub fn topic_count(&self) -> usize {
        self.inner.topics.len()
    }

    /// Number of (connection, topic) registrations.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .topics
            .iter()
            .map(|entry| entry.subscribers.len())
            .sum()
    }
}

/// Forward every upstream message of one topic to its subscribers, in order.
async fn pump(hub: Weak<HubInner>, topic: Topic, generation: u64, mut stream: MessageStream) {
    while let Some(message) = stream.next().await {
        let hub = match hub.upgrade() {
            Some(hub) => hub,
            None => return,
        };
        let idle = match hub.topics.get_mut(&topic) {
            Some(mut entry) if entry.generation == generation => {
                entry.subscribers.retain(|s| s.deliver(&message));
                entry.subscribers.is_empty()
            }
            _ => return,
        };
        if idle
            && hub
                .topics
                .remove_if(&topic, |_, e| e.generation == generation && e.subscribers.is_empty())
                .is_some()
        {
            return;
        }
    }

    tracing::debug!(topic = %topic, "Upstream subscription ended");
    if let Some(hub) = hub.upgrade() {
        hub.topics.remove_if(&topic, |_, e| e.generation == generation);
    }
}

/// One connection's standing subscription. Dropping it detaches the
/// connection from every topic.
pub struct Subscription {
    id: ConnectionId,
    topics: Vec<Topic>,
    receiver: mpsc::Receiver<Message>,
    overflowed: Arc<AtomicBool>,
    hub: Arc<HubInner>,
}

impl Subscription {
    /// Next message in publish order. `None` when the upstream ended or this
    /// subscriber fell too far behind.
    pub async fn next_message(&mut self) -> Option<Message> {
        if self.overflowed.load(Ordering::Acquire) {
            return None;
        }
        let message = self.receiver.recv().await?;
        if self.overflowed.load(Ordering::Acquire) {
            return None;
        }
        Some(message)
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for topic in &self.topics {
            self.hub.detach(topic, self.id);
        }
        metrics::subscription_closed();
        tracing::debug!(connection_id = %self.id, "Subscription closed");
    }
}
