use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::message::{Request, RequestContext};

/// A node in a request pipeline.
///
/// `handle` is the normal path. `fallback` is only entered when a
/// `FallbackPolicyHandler` further up the chain caught a failure; the
/// default passes the walk on. A handler that returns `Ok` from `fallback`
/// without forwarding absorbs the failure. Implementations must not call
/// `next.handle` from `fallback`.
#[async_trait]
pub trait Handler<R: Request>: Send + Sync {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    async fn handle(
        &self,
        request: &mut R,
        ctx: &mut RequestContext,
        next: Next<'_, R>,
    ) -> Result<(), HandlerError>;

    async fn fallback(
        &self,
        request: &mut R,
        ctx: &mut RequestContext,
        next: Next<'_, R>,
    ) -> Result<(), HandlerError> {
        next.fallback(request, ctx).await
    }
}

/// The remainder of a pipeline after the current node.
pub struct Next<'a, R> {
    chain: &'a [Arc<dyn Handler<R>>],
}

impl<R> Clone for Next<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Next<'_, R> {}

impl<'a, R: Request> Next<'a, R> {
    pub(crate) fn new(chain: &'a [Arc<dyn Handler<R>>]) -> Self {
        Self { chain }
    }

    /// True when no handler follows.
    pub fn is_end(&self) -> bool {
        self.chain.is_empty()
    }

    /// Continue the normal path. The end of the chain succeeds.
    pub async fn handle(self, request: &mut R, ctx: &mut RequestContext) -> Result<(), HandlerError> {
        match self.chain.split_first() {
            Some((head, rest)) => head.handle(request, ctx, Next::new(rest)).await,
            None => Ok(()),
        }
    }

    /// Continue the fallback walk. Reaching the end means nothing absorbed the failure.
    pub async fn fallback(self, request: &mut R, ctx: &mut RequestContext) -> Result<(), HandlerError> {
        match self.chain.split_first() {
            Some((head, rest)) => head.fallback(request, ctx, Next::new(rest)).await,
            None => Err(HandlerError::FallbackUnhandled),
        }
    }
}

/// A built, immutable handler chain for one subscriber of a request type.
pub struct Pipeline<R> {
    handlers: Vec<Arc<dyn Handler<R>>>,
}

impl<R: Request> Pipeline<R> {
    pub(crate) fn new(handlers: Vec<Arc<dyn Handler<R>>>) -> Self {
        Self { handlers }
    }

    pub async fn handle(&self, request: &mut R, ctx: &mut RequestContext) -> Result<(), HandlerError> {
        Next::new(&self.handlers).handle(request, ctx).await
    }

    /// Handler names, outermost first.
    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<R: Request> fmt::Display for Pipeline<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(" -> "))
    }
}
