use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::mapper::Publication;
use crate::message::{Message, Request, RoutingKey};

/// Error type for producer sends.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProducerError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("message rejected: {0}")]
    Rejected(String),
    #[error("send timed out")]
    Timeout,
    #[error("no producer registered for topic '{0}'")]
    MissingTopic(RoutingKey),
    #[error("producer error: {0}")]
    Other(Arc<dyn Error + Send + Sync>),
}

/// Sends messages to one topic of a transport.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait Producer: Send + Sync {
    fn publication(&self) -> &Publication;

    async fn send(&self, message: Message) -> Result<(), ProducerError>;

    /// Default waits out the delay locally, then sends.
    async fn send_with_delay(&self, message: Message, delay: Duration) -> Result<(), ProducerError> {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.send(message).await
    }

    /// Default sends sequentially and stops at the first failure.
    async fn send_batch(&self, messages: Vec<Message>) -> Result<(), ProducerError> {
        for message in messages {
            self.send(message).await?;
        }
        Ok(())
    }
}

/// Producers keyed by the topic of their publication.
#[derive(Clone, Default)]
pub struct ProducerRegistry {
    producers: HashMap<RoutingKey, Arc<dyn Producer>>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, producer: impl Producer + 'static) -> Self {
        self.add(Arc::new(producer));
        self
    }

    pub fn add(&mut self, producer: Arc<dyn Producer>) {
        let topic = producer.publication().topic.clone();
        self.producers.insert(topic, producer);
    }

    pub fn lookup_by(&self, topic: &RoutingKey) -> Result<Arc<dyn Producer>, ProducerError> {
        self.producers
            .get(topic)
            .cloned()
            .ok_or_else(|| ProducerError::MissingTopic(topic.clone()))
    }

    /// The publication declared for request type `R`, if any producer serves it.
    pub fn find_publication<R: Request>(&self) -> Option<Publication> {
        self.find_publication_by_type(std::any::type_name::<R>())
    }

    pub fn find_publication_by_type(&self, request_type: &str) -> Option<Publication> {
        self.producers
            .values()
            .map(|producer| producer.publication())
            .find(|publication| publication.request_type.as_deref() == Some(request_type))
            .cloned()
    }

    pub fn topics(&self) -> impl Iterator<Item = &RoutingKey> {
        self.producers.keys()
    }

    pub fn producers(&self) -> impl Iterator<Item = &Arc<dyn Producer>> {
        self.producers.values()
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }
}
