use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bus::ProducerRegistry;
use crate::mapper::MessageMapperRegistry;
use crate::message::{InMemoryRequestContextFactory, RequestContextFactory};
use crate::outbox::{InMemoryOutbox, Outbox, OutboxCircuitBreaker, OutboxProducerMediator};
use crate::pipeline::{PipelineBuilder, SubscriberRegistry};
use crate::policy::PolicyRegistry;
use crate::scheduler::Scheduler;

use super::processor::CommandProcessor;

/// When `post` drains the message it just deposited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClearMode {
    /// Clear before `post` returns.
    #[default]
    Immediate,
    /// Clear on a spawned task; `post` returns once the message is in the outbox.
    Background,
}

/// Fluent configuration for a [`CommandProcessor`].
///
/// An outbox mediator is created when producers or an outbox are supplied.
/// With producers but no outbox, an [`InMemoryOutbox`] is used.
#[derive(Default)]
pub struct CommandProcessorBuilder {
    subscribers: SubscriberRegistry,
    policies: Option<PolicyRegistry>,
    mappers: MessageMapperRegistry,
    producers: ProducerRegistry,
    outbox: Option<Arc<dyn Outbox>>,
    circuit_breaker: Option<Arc<dyn OutboxCircuitBreaker>>,
    max_outstanding_messages: Option<usize>,
    scheduler: Option<Arc<dyn Scheduler>>,
    context_factory: Option<Arc<dyn RequestContextFactory>>,
    clear_mode: ClearMode,
}

impl CommandProcessorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribers(mut self, subscribers: SubscriberRegistry) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Defaults to [`PolicyRegistry::defaults`].
    pub fn policies(mut self, policies: PolicyRegistry) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn mappers(mut self, mappers: MessageMapperRegistry) -> Self {
        self.mappers = mappers;
        self
    }

    pub fn producers(mut self, producers: ProducerRegistry) -> Self {
        self.producers = producers;
        self
    }

    pub fn outbox(mut self, outbox: Arc<dyn Outbox>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn outbox_circuit_breaker(mut self, breaker: Arc<dyn OutboxCircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn max_outstanding_messages(mut self, limit: usize) -> Self {
        self.max_outstanding_messages = Some(limit);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn context_factory(mut self, factory: Arc<dyn RequestContextFactory>) -> Self {
        self.context_factory = Some(factory);
        self
    }

    pub fn clear_mode(mut self, mode: ClearMode) -> Self {
        self.clear_mode = mode;
        self
    }

    pub fn build(self) -> CommandProcessor {
        let policies = Arc::new(self.policies.unwrap_or_else(PolicyRegistry::defaults));

        let outbox = match self.outbox {
            Some(outbox) => Some(outbox),
            None if !self.producers.is_empty() => Some(Arc::new(InMemoryOutbox::new()) as Arc<dyn Outbox>),
            None => None,
        };
        let mediator = outbox.map(|outbox| {
            let mut mediator = OutboxProducerMediator::new(outbox, self.producers.clone())
                .with_policies(Arc::clone(&policies));
            if let Some(breaker) = self.circuit_breaker {
                mediator = mediator.with_circuit_breaker(breaker);
            }
            if let Some(limit) = self.max_outstanding_messages {
                mediator = mediator.with_max_outstanding_messages(limit);
            }
            Arc::new(mediator)
        });

        CommandProcessor::new(
            PipelineBuilder::new(Arc::new(self.subscribers), policies),
            Arc::new(self.mappers),
            self.producers,
            self.context_factory
                .unwrap_or_else(|| Arc::new(InMemoryRequestContextFactory) as Arc<dyn RequestContextFactory>),
            mediator,
            self.scheduler,
            self.clear_mode,
        )
    }
}
