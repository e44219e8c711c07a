use std::error::Error;
use std::sync::Arc;

use crate::bus::{ChannelError, ProducerError};
use crate::outbox::OutboxError;
use crate::scheduler::SchedulerError;

/// Error type for request dispatch.
///
/// Causes are reference counted so an error can be recorded in the
/// `RequestContext` and still be returned to the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// A handler failed while processing the request.
    #[error("handler failed: {0}")]
    Failed(String),
    /// Registration or routing is wrong; never retried.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A circuit breaker policy is open and refused the call.
    #[error("circuit broken: {0}")]
    BrokenCircuit(String),
    /// The handler asks for the message to be requeued and retried later.
    #[error("deferred: {0}")]
    Defer(String),
    /// A message could not be mapped to or from a request.
    #[error("message mapping failed: {0}")]
    Mapping(String),
    /// The fallback walk reached the end of the chain without a handler absorbing the failure.
    #[error("no handler absorbed the failure")]
    FallbackUnhandled,
    /// Several event subscribers failed.
    #[error("{} subscribers failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<HandlerError>),
    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),
    #[error("producer error: {0}")]
    Producer(#[from] ProducerError),
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("handler error: {0}")]
    Other(Arc<dyn Error + Send + Sync>),
}

fn join_errors(errors: &[HandlerError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        HandlerError::Configuration(message.into())
    }

    pub fn defer(reason: impl Into<String>) -> Self {
        HandlerError::Defer(reason.into())
    }

    pub fn other<E: Error + Send + Sync + 'static>(err: E) -> Self {
        HandlerError::Other(Arc::new(err))
    }

    /// Collapse a list of subscriber failures: none is `Ok`, one is itself.
    pub fn collect(mut errors: Vec<HandlerError>) -> Result<(), HandlerError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(HandlerError::Aggregate(errors)),
        }
    }

    /// True for configuration errors, including inside an aggregate.
    pub fn is_configuration(&self) -> bool {
        match self {
            HandlerError::Configuration(_) => true,
            HandlerError::Aggregate(errors) => errors.iter().any(HandlerError::is_configuration),
            _ => false,
        }
    }

    pub fn is_broken_circuit(&self) -> bool {
        matches!(self, HandlerError::BrokenCircuit(_))
    }

    /// True for defer requests, including inside an aggregate.
    pub fn is_defer(&self) -> bool {
        match self {
            HandlerError::Defer(_) => true,
            HandlerError::Aggregate(errors) => errors.iter().any(HandlerError::is_defer),
            _ => false,
        }
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, HandlerError::Mapping(_))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Mapping(err.to_string())
    }
}

impl From<bitcode::Error> for HandlerError {
    fn from(err: bitcode::Error) -> Self {
        HandlerError::Mapping(err.to_string())
    }
}
