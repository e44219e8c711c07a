use std::marker::PhantomData;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::HandlerError;
use crate::message::{Request, RequestContext};

use super::handler::{Handler, Next};

/// Logs each request entering the chain, with outcome and elapsed time.
pub struct RequestLoggingHandler<R> {
    _request: PhantomData<fn() -> R>,
}

impl<R: Request> RequestLoggingHandler<R> {
    pub fn new() -> Self {
        Self {
            _request: PhantomData,
        }
    }
}

impl<R: Request> Default for RequestLoggingHandler<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Request> Handler<R> for RequestLoggingHandler<R> {
    fn name(&self) -> &'static str {
        "RequestLoggingHandler"
    }

    async fn handle(
        &self,
        request: &mut R,
        ctx: &mut RequestContext,
        next: Next<'_, R>,
    ) -> Result<(), HandlerError> {
        let request_type = std::any::type_name::<R>();
        let id = request.id().clone();
        let started = Instant::now();
        info!(request_type, request_id = %id, "handling request");

        let result = next.handle(request, ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(request_type, request_id = %id, elapsed_ms, "request handled"),
            Err(err) => warn!(request_type, request_id = %id, elapsed_ms, error = %err, "request failed"),
        }
        result
    }

    async fn fallback(
        &self,
        request: &mut R,
        ctx: &mut RequestContext,
        next: Next<'_, R>,
    ) -> Result<(), HandlerError> {
        info!(
            request_type = std::any::type_name::<R>(),
            request_id = %request.id(),
            "entering fallback"
        );
        next.fallback(request, ctx).await
    }
}
