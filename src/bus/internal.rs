//! In-process transport for tests and single-process hosts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::mapper::Publication;
use crate::message::{Id, Message, RoutingKey};
use crate::pump::{OnMissingChannel, Subscription};

use super::channel::{Channel, ChannelError, ChannelFactory, Consumer};
use super::producer::{Producer, ProducerError};

/// Moves a message to a dead letter topic once it has been received
/// `max_receive_count` times without being acknowledged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedrivePolicy {
    pub max_receive_count: u32,
    pub dead_letter_topic: RoutingKey,
}

impl RedrivePolicy {
    pub fn new(max_receive_count: u32, dead_letter_topic: impl Into<RoutingKey>) -> Self {
        Self {
            max_receive_count,
            dead_letter_topic: dead_letter_topic.into(),
        }
    }
}

#[derive(Default)]
struct BusState {
    queues: Mutex<HashMap<RoutingKey, VecDeque<Message>>>,
    arrivals: Notify,
}

/// Shared topic → queue map. Clones share the same queues.
///
/// ```
/// use courier_rust::{InternalBus, Message, MessageHeader, MessageType, Id};
///
/// let bus = InternalBus::new();
/// bus.enqueue(Message::new(MessageHeader::new(Id::random(), "greetings", MessageType::Event), "hi"));
/// assert_eq!(bus.len(&"greetings".into()), 1);
/// ```
#[derive(Clone, Default)]
pub struct InternalBus {
    state: Arc<BusState>,
}

impl InternalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, message: Message) {
        self.queues()
            .entry(message.topic().clone())
            .or_default()
            .push_back(message);
        self.state.arrivals.notify_waiters();
    }

    pub fn dequeue(&self, topic: &RoutingKey) -> Option<Message> {
        self.queues().get_mut(topic).and_then(VecDeque::pop_front)
    }

    /// Snapshot of the messages waiting on a topic.
    pub fn stream(&self, topic: &RoutingKey) -> Vec<Message> {
        self.queues()
            .get(topic)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, topic: &RoutingKey) -> usize {
        self.queues().get(topic).map_or(0, VecDeque::len)
    }

    pub fn ensure_topic(&self, topic: &RoutingKey) {
        self.queues().entry(topic.clone()).or_default();
    }

    pub fn has_topic(&self, topic: &RoutingKey) -> bool {
        self.queues().contains_key(topic)
    }

    pub fn topics(&self) -> Vec<RoutingKey> {
        self.queues().keys().cloned().collect()
    }

    pub fn purge(&self, topic: &RoutingKey) {
        if let Some(queue) = self.queues().get_mut(topic) {
            queue.clear();
        }
    }

    /// Wait until a message for `topic` arrives or the deadline passes.
    async fn dequeue_until(&self, topic: &RoutingKey, deadline: Instant) -> Option<Message> {
        loop {
            let arrival = self.state.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            if let Some(message) = self.dequeue(topic) {
                return Some(message);
            }
            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return None;
            }
        }
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<RoutingKey, VecDeque<Message>>> {
        self.state.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer that enqueues onto an [`InternalBus`].
pub struct InMemoryProducer {
    bus: InternalBus,
    publication: Publication,
}

impl InMemoryProducer {
    pub fn new(bus: InternalBus, publication: Publication) -> Self {
        Self { bus, publication }
    }
}

#[async_trait]
impl Producer for InMemoryProducer {
    fn publication(&self) -> &Publication {
        &self.publication
    }

    async fn send(&self, message: Message) -> Result<(), ProducerError> {
        if message.topic().is_empty() {
            return Err(ProducerError::Rejected(format!(
                "message {} has no topic",
                message.id()
            )));
        }
        debug!(message_id = %message.id(), topic = %message.topic(), "enqueued on internal bus");
        self.bus.enqueue(message);
        Ok(())
    }

    async fn send_with_delay(&self, message: Message, delay: Duration) -> Result<(), ProducerError> {
        if delay.is_zero() {
            return self.send(message).await;
        }
        let bus = self.bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bus.enqueue(message);
        });
        Ok(())
    }
}

/// Consumer reading one topic of an [`InternalBus`], tracking receive counts for redrive.
pub struct InMemoryConsumer {
    bus: InternalBus,
    topic: RoutingKey,
    redrive: Option<RedrivePolicy>,
    receive_counts: Mutex<HashMap<Id, u32>>,
}

impl InMemoryConsumer {
    pub fn new(bus: InternalBus, topic: impl Into<RoutingKey>) -> Self {
        Self {
            bus,
            topic: topic.into(),
            redrive: None,
            receive_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_redrive_policy(mut self, policy: RedrivePolicy) -> Self {
        self.redrive = Some(policy);
        self
    }

    /// How often the transport has delivered this message.
    pub fn receive_count(&self, id: &Id) -> u32 {
        self.counts().get(id).copied().unwrap_or(0)
    }

    fn counts(&self) -> MutexGuard<'_, HashMap<Id, u32>> {
        self.receive_counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forget(&self, id: &Id) {
        self.counts().remove(id);
    }

    fn dead_letter(&self, message: &Message) -> bool {
        let Some(policy) = &self.redrive else {
            return false;
        };
        let mut dead = message.clone();
        dead.header.bag.insert(
            Message::ORIGINAL_MESSAGE_ID.to_string(),
            message.id().to_string(),
        );
        dead.header.bag.insert("original_topic".to_string(), message.topic().to_string());
        dead.header.topic = policy.dead_letter_topic.clone();
        warn!(
            message_id = %message.id(),
            dead_letter_topic = %policy.dead_letter_topic,
            "message moved to dead letter topic"
        );
        self.bus.enqueue(dead);
        true
    }
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    async fn receive(&self, timeout: Duration, max_messages: usize) -> Result<Vec<Message>, ChannelError> {
        let deadline = Instant::now() + timeout;
        let Some(first) = self.bus.dequeue_until(&self.topic, deadline).await else {
            return Ok(Vec::new());
        };

        let mut batch = vec![first];
        while batch.len() < max_messages {
            match self.bus.dequeue(&self.topic) {
                Some(message) => batch.push(message),
                None => break,
            }
        }
        let mut counts = self.counts();
        for message in &batch {
            *counts.entry(message.id().clone()).or_insert(0) += 1;
        }
        Ok(batch)
    }

    async fn acknowledge(&self, message: &Message) -> Result<(), ChannelError> {
        self.forget(message.id());
        Ok(())
    }

    async fn reject(&self, message: &Message) -> Result<bool, ChannelError> {
        self.forget(message.id());
        Ok(self.dead_letter(message))
    }

    async fn requeue(&self, message: &Message, delay: Duration) -> Result<bool, ChannelError> {
        if let Some(policy) = &self.redrive {
            if self.receive_count(message.id()) >= policy.max_receive_count {
                self.forget(message.id());
                self.dead_letter(message);
                return Ok(false);
            }
        }

        let mut again = message.clone();
        again.header.topic = self.topic.clone();
        if delay.is_zero() {
            self.bus.enqueue(again);
        } else {
            let bus = self.bus.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                bus.enqueue(again);
            });
        }
        Ok(true)
    }

    async fn purge(&self) -> Result<(), ChannelError> {
        self.bus.purge(&self.topic);
        self.counts().clear();
        Ok(())
    }
}

/// Builds [`InMemoryConsumer`] channels, honouring the subscription's `OnMissingChannel`.
#[derive(Clone)]
pub struct InMemoryChannelFactory {
    bus: InternalBus,
    redrive: Option<RedrivePolicy>,
}

impl InMemoryChannelFactory {
    pub fn new(bus: InternalBus) -> Self {
        Self { bus, redrive: None }
    }

    pub fn with_redrive_policy(mut self, policy: RedrivePolicy) -> Self {
        self.redrive = Some(policy);
        self
    }
}

impl ChannelFactory for InMemoryChannelFactory {
    fn create_channel(&self, subscription: &Subscription) -> Result<Channel, ChannelError> {
        let topic = &subscription.routing_key;
        match subscription.make_channels {
            OnMissingChannel::Create => self.bus.ensure_topic(topic),
            OnMissingChannel::Validate if !self.bus.has_topic(topic) => {
                return Err(ChannelError::MissingChannel(subscription.channel_name.clone()));
            }
            OnMissingChannel::Validate | OnMissingChannel::Assume => {}
        }

        let mut consumer = InMemoryConsumer::new(self.bus.clone(), topic.clone());
        if let Some(policy) = &self.redrive {
            consumer = consumer.with_redrive_policy(policy.clone());
        }
        Ok(Channel::new(
            subscription.channel_name.clone(),
            topic.clone(),
            Arc::new(consumer),
            subscription.buffer_size,
        ))
    }
}
