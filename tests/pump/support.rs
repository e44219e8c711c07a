//! Requests, handlers and bus wiring for the pump tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use courier_rust::{
    Channel, ChannelError, CommandProcessor, Consumer, Handler, HandlerError, HandlerRegistration,
    Id, InMemoryConsumer, InMemoryProducer, InMemoryScheduler, InternalBus, JsonMessageMapper, Message,
    MessageMapper, MessageMapperRegistry, Next, PolicyRegistry, Producer, ProducerRegistry,
    Publication, RedrivePolicy, Request, RequestContext, RequestKind, RoutingKey,
    SubscriberRegistry, Subscription,
};
use serde::{Deserialize, Serialize};

pub const ORDERS: &str = "orders";
pub const EVENTS: &str = "order-events";
pub const DEAD_LETTERS: &str = "orders.dlq";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub id: Id,
    pub sku: String,
}

impl PlaceOrder {
    pub fn new(sku: &str) -> Self {
        Self {
            id: Id::random(),
            sku: sku.to_string(),
        }
    }
}

impl Request for PlaceOrder {
    fn id(&self) -> &Id {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub id: Id,
    pub sku: String,
}

impl Request for OrderPlaced {
    fn id(&self) -> &Id {
        &self.id
    }

    fn kind(&self) -> RequestKind {
        RequestKind::Event
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Outcome {
    Succeed,
    Fail,
    Defer,
    Configuration,
    Panic,
}

/// Counts calls and how many arrived with their originating message.
pub struct CountingHandler {
    calls: Arc<AtomicUsize>,
    with_origin: Arc<AtomicUsize>,
    outcome: Outcome,
}

#[async_trait]
impl<R: Request> Handler<R> for CountingHandler {
    async fn handle(
        &self,
        request: &mut R,
        ctx: &mut RequestContext,
        next: Next<'_, R>,
    ) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if ctx.originating_message().is_some() {
            self.with_origin.fetch_add(1, Ordering::SeqCst);
        }
        match self.outcome {
            Outcome::Succeed => next.handle(request, ctx).await,
            Outcome::Fail => Err(HandlerError::failed("inventory down")),
            Outcome::Defer => Err(HandlerError::defer("inventory busy")),
            Outcome::Configuration => Err(HandlerError::configuration("no warehouse")),
            Outcome::Panic => panic!("warehouse index corrupted"),
        }
    }
}

/// A processor, an internal bus and a scheduler, with counting handlers
/// for both request types.
pub struct Harness {
    pub bus: InternalBus,
    pub processor: Arc<CommandProcessor>,
    pub scheduler: Arc<InMemoryScheduler>,
    pub calls: Arc<AtomicUsize>,
    pub with_origin: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(outcome: Outcome) -> Self {
        Self::with_event_subscribers(outcome, 1)
    }

    pub fn with_event_subscribers(outcome: Outcome, event_subscribers: usize) -> Self {
        let bus = InternalBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let with_origin = Arc::new(AtomicUsize::new(0));

        let handler = || {
            Arc::new(CountingHandler {
                calls: Arc::clone(&calls),
                with_origin: Arc::clone(&with_origin),
                outcome,
            })
        };
        let mut subscribers =
            SubscriberRegistry::new().register(HandlerRegistration::<PlaceOrder>::from_handler(handler()));
        for _ in 0..event_subscribers {
            subscribers.add(HandlerRegistration::<OrderPlaced>::from_handler(handler()));
        }

        let mut producers = ProducerRegistry::new();
        producers.add(Arc::new(InMemoryProducer::new(
            bus.clone(),
            Publication::for_request::<PlaceOrder>(ORDERS),
        )) as Arc<dyn Producer>);

        let scheduler = Arc::new(InMemoryScheduler::new());
        let processor = CommandProcessor::builder()
            .subscribers(subscribers)
            .policies(PolicyRegistry::new())
            .mappers(
                MessageMapperRegistry::new()
                    .register_json::<PlaceOrder>()
                    .register_json::<OrderPlaced>(),
            )
            .producers(producers)
            .scheduler(Arc::clone(&scheduler) as Arc<dyn courier_rust::Scheduler>)
            .build();

        Self {
            bus,
            processor: Arc::new(processor),
            scheduler,
            calls,
            with_origin,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn with_origin(&self) -> usize {
        self.with_origin.load(Ordering::SeqCst)
    }

    pub fn channel(&self, topic: &str, redrive: Option<RedrivePolicy>) -> Arc<Channel> {
        let mut consumer = InMemoryConsumer::new(self.bus.clone(), topic);
        if let Some(policy) = redrive {
            consumer = consumer.with_redrive_policy(policy);
        }
        Arc::new(Channel::new(format!("{topic}-channel"), topic, Arc::new(consumer), 1))
    }

    /// Put a `PlaceOrder` command straight onto the bus.
    pub fn enqueue_order(&self, sku: &str) -> Id {
        let order = PlaceOrder::new(sku);
        let message = JsonMessageMapper::<PlaceOrder>::new()
            .map_to_message(&order, &Publication::new(ORDERS))
            .unwrap();
        self.bus.enqueue(message);
        order.id
    }

    pub fn enqueue_event(&self, sku: &str) {
        let event = OrderPlaced {
            id: Id::random(),
            sku: sku.to_string(),
        };
        let message = JsonMessageMapper::<OrderPlaced>::new()
            .map_to_message(&event, &Publication::new(EVENTS))
            .unwrap();
        self.bus.enqueue(message);
    }

    pub fn pending(&self, topic: &str) -> usize {
        self.bus.len(&RoutingKey::new(topic))
    }
}

/// Fast polling so tests do not wait on production defaults.
pub fn subscription(topic: &str) -> Subscription {
    Subscription::new(format!("{topic}-subscription"), format!("{topic}-channel"), topic)
        .with_timeout(Duration::from_millis(20))
        .with_empty_channel_delay(Duration::from_millis(5))
        .with_channel_failure_delay(Duration::from_millis(5))
}

pub async fn wait_for(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Fails `failures` receives, then hands out queued messages.
pub struct FlakyConsumer {
    failures: Mutex<usize>,
    queued: Mutex<VecDeque<Message>>,
}

impl FlakyConsumer {
    pub fn new(failures: usize, queued: Vec<Message>) -> Self {
        Self {
            failures: Mutex::new(failures),
            queued: Mutex::new(queued.into()),
        }
    }
}

#[async_trait]
impl Consumer for FlakyConsumer {
    async fn receive(&self, _timeout: Duration, _max_messages: usize) -> Result<Vec<Message>, ChannelError> {
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(ChannelError::ChannelFailure("connection reset".into()));
            }
        }
        Ok(self.queued.lock().unwrap().pop_front().into_iter().collect())
    }

    async fn acknowledge(&self, _message: &Message) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn reject(&self, _message: &Message) -> Result<bool, ChannelError> {
        Ok(false)
    }

    async fn requeue(&self, message: &Message, _delay: Duration) -> Result<bool, ChannelError> {
        self.queued.lock().unwrap().push_back(message.clone());
        Ok(true)
    }

    async fn purge(&self) -> Result<(), ChannelError> {
        self.queued.lock().unwrap().clear();
        Ok(())
    }
}
