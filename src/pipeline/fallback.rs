use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::HandlerError;
use crate::message::{Request, RequestContext};

use super::handler::{Handler, Next};

/// Which failures redirect a dispatch onto the fallback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FallbackTrigger {
    #[default]
    AllErrors,
    BrokenCircuit,
}

impl FallbackTrigger {
    pub fn matches(self, err: &HandlerError) -> bool {
        match self {
            FallbackTrigger::AllErrors => true,
            FallbackTrigger::BrokenCircuit => err.is_broken_circuit(),
        }
    }
}

/// Catches failures from the rest of the chain and walks its `fallback` methods.
///
/// The cause is stored in the context before the walk. If a downstream
/// handler absorbs it the dispatch succeeds; if the walk ends unabsorbed the
/// original error is returned. Failures that do not match the trigger pass
/// straight through.
pub struct FallbackPolicyHandler<R> {
    trigger: FallbackTrigger,
    _request: PhantomData<fn() -> R>,
}

impl<R: Request> FallbackPolicyHandler<R> {
    pub fn new(trigger: FallbackTrigger) -> Self {
        Self {
            trigger,
            _request: PhantomData,
        }
    }

    pub fn trigger(&self) -> FallbackTrigger {
        self.trigger
    }
}

#[async_trait]
impl<R: Request> Handler<R> for FallbackPolicyHandler<R> {
    fn name(&self) -> &'static str {
        "FallbackPolicyHandler"
    }

    async fn handle(
        &self,
        request: &mut R,
        ctx: &mut RequestContext,
        next: Next<'_, R>,
    ) -> Result<(), HandlerError> {
        let err = match next.handle(request, ctx).await {
            Ok(()) => return Ok(()),
            Err(err) if self.trigger.matches(&err) => err,
            Err(err) => return Err(err),
        };

        warn!(request_id = %request.id(), error = %err, "handler chain failed, walking fallback");
        ctx.set_fallback_cause(err.clone());

        match next.fallback(request, ctx).await {
            Ok(()) => {
                debug!(request_id = %request.id(), "fallback absorbed failure");
                Ok(())
            }
            Err(HandlerError::FallbackUnhandled) => Err(err),
            Err(other) => Err(other),
        }
    }
}
