use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::message::{Request, RequestContext};
use crate::policy::{Attempt, Policy, PolicyRegistry};

use super::handler::{Handler, Next};

/// Runs the remainder of the pipeline inside one or more named policies.
///
/// Policies nest in declared order: the first name is the outermost, so
/// `["retry", "breaker"]` retries calls that the breaker refused.
pub struct PolicyHandler<R> {
    names: Vec<String>,
    policies: Vec<Arc<dyn Policy>>,
    _request: PhantomData<fn() -> R>,
}

impl<R: Request> PolicyHandler<R> {
    /// Resolve every name from the registry. An unknown name is a configuration error.
    pub fn from_registry<I, S>(registry: &PolicyRegistry, names: I) -> Result<Self, HandlerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(HandlerError::configuration(
                "a policy handler needs at least one policy name",
            ));
        }
        let policies = names
            .iter()
            .map(|name| registry.require(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            names,
            policies,
            _request: PhantomData,
        })
    }

    pub fn policy_names(&self) -> &[String] {
        &self.names
    }
}

struct Downstream<'a, 'r, R> {
    policies: &'a [Arc<dyn Policy>],
    request: &'r mut R,
    ctx: &'r mut RequestContext,
    next: Next<'a, R>,
}

#[async_trait]
impl<'a, 'r, R: Request> Attempt for Downstream<'a, 'r, R> {
    async fn attempt(&mut self) -> Result<(), HandlerError> {
        match self.policies.split_first() {
            Some((outer, inner)) => {
                let mut inner = Downstream {
                    policies: inner,
                    request: &mut *self.request,
                    ctx: &mut *self.ctx,
                    next: self.next,
                };
                outer.execute(&mut inner).await
            }
            None => self.next.handle(self.request, self.ctx).await,
        }
    }
}

#[async_trait]
impl<R: Request> Handler<R> for PolicyHandler<R> {
    fn name(&self) -> &'static str {
        "PolicyHandler"
    }

    async fn handle(
        &self,
        request: &mut R,
        ctx: &mut RequestContext,
        next: Next<'_, R>,
    ) -> Result<(), HandlerError> {
        Downstream {
            policies: &self.policies,
            request,
            ctx,
            next,
        }
        .attempt()
        .await
    }
}
