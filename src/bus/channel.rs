use std::collections::VecDeque;
use std::error::Error;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::message::{Message, RoutingKey};
use crate::pump::Subscription;

/// Error type for receiving from a transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// The transport failed while receiving; the pump backs off and retries.
    #[error("channel failure: {0}")]
    ChannelFailure(String),
    /// The transport's own circuit is open.
    #[error("channel circuit broken: {0}")]
    BrokenCircuit(String),
    /// The channel was required to exist but does not.
    #[error("channel '{0}' does not exist")]
    MissingChannel(String),
    #[error("channel error: {0}")]
    Other(Arc<dyn Error + Send + Sync>),
}

/// Pull side of a transport.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Wait up to `timeout` for at most `max_messages`. An empty vec means
    /// nothing arrived.
    async fn receive(&self, timeout: Duration, max_messages: usize) -> Result<Vec<Message>, ChannelError>;

    async fn acknowledge(&self, message: &Message) -> Result<(), ChannelError>;

    /// Returns `true` when the transport moved the message to a dead letter destination.
    async fn reject(&self, message: &Message) -> Result<bool, ChannelError>;

    /// Returns `false` when the transport dead-lettered the message instead of requeueing it.
    async fn requeue(&self, message: &Message, delay: Duration) -> Result<bool, ChannelError>;

    async fn purge(&self) -> Result<(), ChannelError>;
}

/// A consumer plus a local buffer, bound to one routing key.
///
/// `receive` drains the local buffer before asking the consumer, which is
/// how `stop` gets a quit message in front of anything not yet fetched.
pub struct Channel {
    name: String,
    routing_key: RoutingKey,
    consumer: Arc<dyn Consumer>,
    buffer: Mutex<VecDeque<Message>>,
    buffer_size: usize,
}

impl Channel {
    pub fn new(
        name: impl Into<String>,
        routing_key: impl Into<RoutingKey>,
        consumer: Arc<dyn Consumer>,
        buffer_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            routing_key: routing_key.into(),
            consumer,
            buffer: Mutex::new(VecDeque::new()),
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Next message, or the `none` sentinel if nothing arrived in time.
    ///
    /// An empty buffer is refilled with up to `buffer_size` messages.
    pub async fn receive(&self, timeout: Duration) -> Result<Message, ChannelError> {
        if let Some(message) = self.pop() {
            return Ok(message);
        }

        let mut batch = VecDeque::from(self.consumer.receive(timeout, self.buffer_size).await?);
        let Some(first) = batch.pop_front() else {
            return Ok(Message::none());
        };
        if !batch.is_empty() {
            self.lock_buffer().extend(batch);
        }
        Ok(first)
    }

    /// Put a message at the back of the local buffer.
    pub fn enqueue(&self, message: Message) {
        self.lock_buffer().push_back(message);
    }

    /// Ask the pump reading this channel to stop.
    pub fn stop(&self) {
        self.enqueue(Message::quit(self.routing_key.clone()));
    }

    pub async fn acknowledge(&self, message: &Message) -> Result<(), ChannelError> {
        self.consumer.acknowledge(message).await
    }

    pub async fn reject(&self, message: &Message) -> Result<bool, ChannelError> {
        self.consumer.reject(message).await
    }

    pub async fn requeue(&self, message: &Message, delay: Duration) -> Result<bool, ChannelError> {
        self.consumer.requeue(message, delay).await
    }

    /// Drop everything buffered locally and on the transport.
    pub async fn purge(&self) -> Result<(), ChannelError> {
        self.lock_buffer().clear();
        self.consumer.purge().await
    }

    fn pop(&self) -> Option<Message> {
        self.lock_buffer().pop_front()
    }

    fn lock_buffer(&self) -> std::sync::MutexGuard<'_, VecDeque<Message>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates the channel a pump performer reads from.
pub trait ChannelFactory: Send + Sync {
    fn create_channel(&self, subscription: &Subscription) -> Result<Channel, ChannelError>;
}
