//! Requests and handlers shared by the pipeline tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use courier_rust::{Handler, HandlerError, Id, Next, Request, RequestContext, RequestKind};
use serde::{Deserialize, Serialize};

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
    pub order: String,
}

impl OrderPlaced {
    pub fn new(order: &str) -> Self {
        Self {
            id: Id::random(),
            order: order.to_string(),
        }
    }
}

impl Request for OrderPlaced {
    fn id(&self) -> &Id {
        &self.id
    }

    fn kind(&self) -> RequestKind {
        RequestKind::Event
    }
}

/// What a `CountingHandler` does when called.
#[derive(Clone, Copy, Debug)]
pub enum Outcome {
    Succeed,
    Fail,
    Configuration,
}

/// Counts invocations and then behaves as configured.
pub struct CountingHandler {
    pub calls: Arc<AtomicUsize>,
    outcome: Outcome,
}

impl CountingHandler {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            outcome,
        }
    }

    pub fn with_counter(outcome: Outcome, calls: Arc<AtomicUsize>) -> Self {
        Self { calls, outcome }
    }
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
        match self.outcome {
            Outcome::Succeed => next.handle(request, ctx).await,
            Outcome::Fail => Err(HandlerError::failed("handler down")),
            Outcome::Configuration => Err(HandlerError::configuration("misrouted")),
        }
    }
}

/// Always fails on the normal path and absorbs the failure on the fallback path.
pub struct CompensatingHandler {
    pub calls: Arc<AtomicUsize>,
    pub compensations: Arc<AtomicUsize>,
}

impl CompensatingHandler {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            compensations: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Handler<PlaceOrder> for CompensatingHandler {
    async fn handle(
        &self,
        _request: &mut PlaceOrder,
        _ctx: &mut RequestContext,
        _next: Next<'_, PlaceOrder>,
    ) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::failed("payment gateway down"))
    }

    async fn fallback(
        &self,
        _request: &mut PlaceOrder,
        ctx: &mut RequestContext,
        _next: Next<'_, PlaceOrder>,
    ) -> Result<(), HandlerError> {
        if ctx.fallback_cause().is_some() {
            self.compensations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub fn count(calls: &Arc<AtomicUsize>) -> usize {
    calls.load(Ordering::SeqCst)
}
