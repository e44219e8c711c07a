use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{Producer, ProducerRegistry};
use crate::error::HandlerError;
use crate::message::{Id, Message, RequestContext, RoutingKey};
use crate::policy::{Attempt, PolicyRegistry, RETRY_POLICY};

use super::circuit_breaker::OutboxCircuitBreaker;
use super::error::OutboxError;
use super::store::{Outbox, OutstandingQuery, UnitOfWork};

/// Outcome of one clear cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClearResult {
    /// Sent and marked dispatched.
    pub dispatched: usize,
    /// Already dispatched before this clear; nothing sent.
    pub already_dispatched: usize,
    /// Left outstanding because their topic is tripped.
    pub skipped: usize,
    /// Send failed; left outstanding and their topic tripped.
    pub failed: usize,
    /// The cancellation token fired before the batch finished.
    pub cancelled: bool,
}

impl ClearResult {
    pub fn attempted(&self) -> usize {
        self.dispatched + self.failed
    }
}

/// Bridges the outbox to transport producers.
///
/// Only one clear runs at a time per mediator. Sends go through the
/// registry's `RETRY_POLICY` when one is registered. A send that still
/// fails trips the message's topic and the batch carries on; the message
/// stays outstanding for a later cycle.
pub struct OutboxProducerMediator {
    outbox: Arc<dyn Outbox>,
    producers: ProducerRegistry,
    policies: Arc<PolicyRegistry>,
    circuit_breaker: Option<Arc<dyn OutboxCircuitBreaker>>,
    max_outstanding_messages: Option<usize>,
    clear_lock: Mutex<()>,
}

impl OutboxProducerMediator {
    pub fn new(outbox: Arc<dyn Outbox>, producers: ProducerRegistry) -> Self {
        Self {
            outbox,
            producers,
            policies: Arc::new(PolicyRegistry::new()),
            circuit_breaker: None,
            max_outstanding_messages: None,
            clear_lock: Mutex::new(()),
        }
    }

    pub fn with_policies(mut self, policies: Arc<PolicyRegistry>) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<dyn OutboxCircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    /// Refuse deposits once this many messages are outstanding.
    pub fn with_max_outstanding_messages(mut self, limit: usize) -> Self {
        self.max_outstanding_messages = Some(limit);
        self
    }

    pub fn outbox(&self) -> &Arc<dyn Outbox> {
        &self.outbox
    }

    pub fn producers(&self) -> &ProducerRegistry {
        &self.producers
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<dyn OutboxCircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    /// Fails with `LimitReached` if `incoming` more messages would exceed the limit.
    pub async fn ensure_capacity(&self, incoming: usize) -> Result<(), OutboxError> {
        let Some(limit) = self.max_outstanding_messages else {
            return Ok(());
        };
        let outstanding = self.outbox.outstanding_count().await?;
        if outstanding + incoming > limit {
            warn!(outstanding, limit, "outbox outstanding limit reached");
            return Err(OutboxError::LimitReached(limit));
        }
        Ok(())
    }

    pub async fn add_to_outbox(
        &self,
        message: Message,
        ctx: &RequestContext,
        tx: Option<&mut UnitOfWork>,
    ) -> Result<(), OutboxError> {
        if message.topic().is_empty() {
            return Err(OutboxError::MissingTopic(message.id().clone()));
        }
        self.ensure_capacity(1).await?;
        debug!(message_id = %message.id(), topic = %message.topic(), "adding message to outbox");
        self.outbox.add(message, ctx, tx).await
    }

    /// Send specific outbox entries. Entries already dispatched are skipped.
    pub async fn clear_outbox(
        &self,
        ids: &[Id],
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<ClearResult, HandlerError> {
        let _clearing = self.clear_lock.lock().await;
        let mut result = ClearResult::default();

        for id in ids {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            let entry = self
                .outbox
                .get(id)
                .await?
                .ok_or_else(|| OutboxError::NotFound(id.clone()))?;
            if entry.is_dispatched() {
                debug!(message_id = %id, "message already dispatched");
                result.already_dispatched += 1;
                continue;
            }
            self.dispatch(&entry.message, ctx, &mut result).await?;
        }

        self.cool_down();
        Ok(result)
    }

    /// Send outstanding messages older than `min_age`.
    ///
    /// At most `max_count` messages are taken unless `bulk` is set, in which
    /// case every outstanding message is taken and sent per topic through
    /// `Producer::send_batch`. Tripped topics are left for a later cycle.
    pub async fn clear_outstanding_from_outbox(
        &self,
        max_count: usize,
        min_age: Duration,
        bulk: bool,
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<ClearResult, HandlerError> {
        let _clearing = self.clear_lock.lock().await;
        let mut result = ClearResult::default();

        let tripped = self
            .circuit_breaker
            .as_ref()
            .map(|breaker| breaker.tripped_topics())
            .unwrap_or_default();
        let page_size = if bulk { usize::MAX } else { max_count };
        let query = OutstandingQuery::new(min_age)
            .with_page_size(page_size)
            .excluding(tripped);
        let messages = self.outbox.outstanding_messages(&query).await?;
        debug!(found = messages.len(), max_count, bulk, "clearing outstanding messages");

        if bulk {
            self.dispatch_bulk(messages, ctx, cancel, &mut result).await?;
        } else {
            for message in &messages {
                if cancel.is_cancelled() {
                    result.cancelled = true;
                    break;
                }
                self.dispatch(message, ctx, &mut result).await?;
            }
        }

        self.cool_down();
        info!(
            dispatched = result.dispatched,
            skipped = result.skipped,
            failed = result.failed,
            "outbox cleared"
        );
        Ok(result)
    }

    async fn dispatch(
        &self,
        message: &Message,
        ctx: &RequestContext,
        result: &mut ClearResult,
    ) -> Result<(), HandlerError> {
        let topic = message.topic();
        if self.is_tripped(topic) {
            debug!(message_id = %message.id(), %topic, "topic tripped, leaving message outstanding");
            result.skipped += 1;
            return Ok(());
        }

        let sent = match self.producers.lookup_by(topic) {
            Ok(producer) => {
                let mut attempt = SendOne {
                    producer: producer.as_ref(),
                    message,
                };
                self.guarded(&mut attempt).await
            }
            Err(err) => Err(err.into()),
        };

        match sent {
            Ok(()) => {
                self.outbox
                    .mark_dispatched(message.id(), ctx, Some(SystemTime::now()))
                    .await?;
                result.dispatched += 1;
            }
            Err(err) => {
                self.send_failed(topic, std::slice::from_ref(message), &err);
                result.failed += 1;
            }
        }
        Ok(())
    }

    async fn dispatch_bulk(
        &self,
        messages: Vec<Message>,
        ctx: &RequestContext,
        cancel: &CancellationToken,
        result: &mut ClearResult,
    ) -> Result<(), HandlerError> {
        let mut batches: Vec<(RoutingKey, Vec<Message>)> = Vec::new();
        for message in messages {
            match batches.iter_mut().find(|(topic, _)| topic == message.topic()) {
                Some((_, batch)) => batch.push(message),
                None => batches.push((message.topic().clone(), vec![message])),
            }
        }

        for (topic, batch) in batches {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            if self.is_tripped(&topic) {
                result.skipped += batch.len();
                continue;
            }

            let sent = match self.producers.lookup_by(&topic) {
                Ok(producer) => {
                    let mut attempt = SendBatch {
                        producer: producer.as_ref(),
                        messages: &batch,
                    };
                    self.guarded(&mut attempt).await
                }
                Err(err) => Err(err.into()),
            };

            match sent {
                Ok(()) => {
                    let now = SystemTime::now();
                    for message in &batch {
                        self.outbox.mark_dispatched(message.id(), ctx, Some(now)).await?;
                    }
                    result.dispatched += batch.len();
                }
                Err(err) => {
                    self.send_failed(&topic, &batch, &err);
                    result.failed += batch.len();
                }
            }
        }
        Ok(())
    }

    async fn guarded(&self, attempt: &mut (dyn Attempt + '_)) -> Result<(), HandlerError> {
        match self.policies.get(RETRY_POLICY) {
            Some(policy) => policy.execute(attempt).await,
            None => attempt.attempt().await,
        }
    }

    fn send_failed(&self, topic: &RoutingKey, messages: &[Message], err: &HandlerError) {
        for message in messages {
            warn!(message_id = %message.id(), %topic, error = %err, "outbox send failed, message stays outstanding");
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker.trip_topic(topic);
        }
    }

    fn is_tripped(&self, topic: &RoutingKey) -> bool {
        self.circuit_breaker
            .as_ref()
            .is_some_and(|breaker| breaker.is_tripped(topic))
    }

    fn cool_down(&self) {
        if let Some(breaker) = &self.circuit_breaker {
            breaker.cool_down();
        }
    }
}

struct SendOne<'a> {
    producer: &'a dyn Producer,
    message: &'a Message,
}

#[async_trait]
impl<'a> Attempt for SendOne<'a> {
    async fn attempt(&mut self) -> Result<(), HandlerError> {
        let delay = self.message.header.delayed;
        if delay.is_zero() {
            self.producer.send(self.message.clone()).await?;
        } else {
            self.producer.send_with_delay(self.message.clone(), delay).await?;
        }
        Ok(())
    }
}

struct SendBatch<'a> {
    producer: &'a dyn Producer,
    messages: &'a [Message],
}

#[async_trait]
impl<'a> Attempt for SendBatch<'a> {
    async fn attempt(&mut self) -> Result<(), HandlerError> {
        self.producer.send_batch(self.messages.to_vec()).await?;
        Ok(())
    }
}
