use std::collections::HashMap;

use serde_json::Value;

use crate::error::HandlerError;

use super::id::Id;
use super::message::Message;

/// Per-dispatch mutable state. One context is created for every
/// send / publish / post call and never shared between dispatches.
#[derive(Debug)]
pub struct RequestContext {
    correlation_id: Option<Id>,
    fallback_cause: Option<HandlerError>,
    originating_message: Option<Message>,
    span: tracing::Span,
    bag: HashMap<String, Value>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            correlation_id: None,
            fallback_cause: None,
            originating_message: None,
            span: tracing::Span::none(),
            bag: HashMap::new(),
        }
    }

    pub fn correlation_id(&self) -> Option<&Id> {
        self.correlation_id.as_ref()
    }

    pub fn set_correlation_id(&mut self, id: Id) {
        self.correlation_id = Some(id);
    }

    /// The error that sent this dispatch down the fallback path, if any.
    pub fn fallback_cause(&self) -> Option<&HandlerError> {
        self.fallback_cause.as_ref()
    }

    pub fn set_fallback_cause(&mut self, cause: HandlerError) {
        self.fallback_cause = Some(cause);
    }

    /// The transport message this request was mapped from (pump dispatches only).
    pub fn originating_message(&self) -> Option<&Message> {
        self.originating_message.as_ref()
    }

    pub fn set_originating_message(&mut self, message: Message) {
        self.originating_message = Some(message);
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn set_span(&mut self, span: tracing::Span) {
        self.span = span;
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.bag.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.bag.insert(key.into(), value.into());
    }

    pub fn bag(&self) -> &HashMap<String, Value> {
        &self.bag
    }
}

/// Creates a fresh `RequestContext` for each dispatch.
pub trait RequestContextFactory: Send + Sync {
    fn create(&self) -> RequestContext;
}

/// Factory producing empty contexts.
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryRequestContextFactory;

impl RequestContextFactory for InMemoryRequestContextFactory {
    fn create(&self) -> RequestContext {
        RequestContext::new()
    }
}
