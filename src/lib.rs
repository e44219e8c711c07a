mod bus;
mod command_processor;
mod error;
mod mapper;
mod message;
mod outbox;
mod pipeline;
mod policy;
mod pump;
mod scheduler;

pub use bus::{
    Channel, ChannelError, ChannelFactory, Consumer, InMemoryChannelFactory, InMemoryConsumer,
    InMemoryProducer, InternalBus, Producer, ProducerError, ProducerRegistry, RedrivePolicy,
};
#[cfg(feature = "emitter")]
pub use bus::LocalEmitterProducer;
pub use command_processor::{ClearMode, CommandProcessor, CommandProcessorBuilder};
pub use error::HandlerError;
pub use mapper::{
    BitcodeMessageMapper, JsonMessageMapper, MessageMapper, MessageMapperRegistry, Publication,
};
pub use message::{
    Id, InMemoryRequestContextFactory, Message, MessageBody, MessageHeader, MessageType, Request,
    RequestContext, RequestContextFactory, RequestKind, RoutingKey,
};
pub use outbox::{
    ArchiveProvider, ClearResult, InMemoryArchiveProvider, InMemoryOutbox,
    InMemoryOutboxCircuitBreaker, Outbox, OutboxArchiver, OutboxCircuitBreaker, OutboxEntry,
    OutboxError, OutboxProducerMediator, OutboxSweeper, OutstandingQuery, SweeperHandle,
    SweeperStats, UnitOfWork,
};
pub use pipeline::{
    FallbackPolicyHandler, FallbackTrigger, Handler, HandlerRegistration, Next, Pipeline,
    PipelineBuilder, PolicyHandler, RequestLoggingHandler, SubscriberRegistry,
};
pub use policy::{
    Attempt, CircuitBreakerPolicy, CircuitState, ErrorFilter, Policy, PolicyRegistry, RetryPolicy,
    CIRCUIT_BREAKER_POLICY, RETRY_POLICY,
};
pub use pump::{
    Dispatcher, MessagePump, MessagePumpType, OnMissingChannel, Proactor, PumpExit, PumpStats,
    Reactor, Subscription,
};
pub use scheduler::{
    InMemoryScheduler, RequestSchedulerType, ScheduledJob, Scheduler, SchedulerError, SchedulerId,
};

// Re-export the EventEmitter from the event_emitter_rs crate
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;

// Cancellation token taken by outbox clears
pub use tokio_util::sync::CancellationToken;
