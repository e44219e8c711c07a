use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::message::Request;
use crate::policy::PolicyRegistry;

use super::fallback::{FallbackPolicyHandler, FallbackTrigger};
use super::handler::{Handler, Pipeline};
use super::logging::RequestLoggingHandler;
use super::policy_handler::PolicyHandler;

type HandlerFactory<R> = Arc<dyn Fn() -> Arc<dyn Handler<R>> + Send + Sync>;
type DecoratorFactory<R> =
    Arc<dyn Fn(&PolicyRegistry) -> Result<Arc<dyn Handler<R>>, HandlerError> + Send + Sync>;

/// One subscriber of a request type: a business handler plus its declared decorators.
///
/// Decorators wrap in declaration order, the first one declared being the
/// outermost. The business handler always sits at the end of the chain.
pub struct HandlerRegistration<R> {
    factory: HandlerFactory<R>,
    decorators: Vec<DecoratorFactory<R>>,
}

impl<R> Clone for HandlerRegistration<R> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            decorators: self.decorators.clone(),
        }
    }
}

impl<R: Request> HandlerRegistration<R> {
    /// Register a handler built fresh by `factory` whenever the pipeline is (re)built.
    pub fn new<H, F>(factory: F) -> Self
    where
        H: Handler<R> + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(move || Arc::new(factory()) as Arc<dyn Handler<R>>),
            decorators: Vec::new(),
        }
    }

    /// Register an already shared handler instance.
    pub fn from_handler<H: Handler<R> + 'static>(handler: Arc<H>) -> Self {
        Self {
            factory: Arc::new(move || Arc::clone(&handler) as Arc<dyn Handler<R>>),
            decorators: Vec::new(),
        }
    }

    pub fn request_logging(self) -> Self {
        self.decorate(|_| Ok(Arc::new(RequestLoggingHandler::<R>::new()) as Arc<dyn Handler<R>>))
    }

    pub fn fallback(self, trigger: FallbackTrigger) -> Self {
        self.decorate(move |_| {
            Ok(Arc::new(FallbackPolicyHandler::<R>::new(trigger)) as Arc<dyn Handler<R>>)
        })
    }

    /// Guard the rest of the chain with named policies from the registry.
    pub fn use_policy<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        self.decorate(move |registry| {
            let handler = PolicyHandler::<R>::from_registry(registry, names.iter().cloned())?;
            Ok(Arc::new(handler) as Arc<dyn Handler<R>>)
        })
    }

    /// Add a custom decorator.
    pub fn decorate<F>(mut self, decorator: F) -> Self
    where
        F: Fn(&PolicyRegistry) -> Result<Arc<dyn Handler<R>>, HandlerError> + Send + Sync + 'static,
    {
        self.decorators.push(Arc::new(decorator));
        self
    }

    pub fn build(&self, policies: &PolicyRegistry) -> Result<Pipeline<R>, HandlerError> {
        let mut chain = self
            .decorators
            .iter()
            .map(|decorator| decorator(policies))
            .collect::<Result<Vec<_>, _>>()?;
        chain.push((self.factory)());
        Ok(Pipeline::new(chain))
    }
}

/// Subscribers per request type, keyed by `TypeId`.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<R: Request>(mut self, registration: HandlerRegistration<R>) -> Self {
        self.add(registration);
        self
    }

    pub fn add<R: Request>(&mut self, registration: HandlerRegistration<R>) {
        let slot = self
            .subscribers
            .entry(TypeId::of::<R>())
            .or_insert_with(|| Box::new(Vec::<HandlerRegistration<R>>::new()));
        if let Some(list) = slot.downcast_mut::<Vec<HandlerRegistration<R>>>() {
            list.push(registration);
        }
    }

    pub fn registrations<R: Request>(&self) -> &[HandlerRegistration<R>] {
        self.subscribers
            .get(&TypeId::of::<R>())
            .and_then(|slot| slot.downcast_ref::<Vec<HandlerRegistration<R>>>())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn count<R: Request>(&self) -> usize {
        self.registrations::<R>().len()
    }
}
