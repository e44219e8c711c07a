use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::error::HandlerError;
use crate::message::Request;
use crate::policy::PolicyRegistry;

use super::handler::Pipeline;
use super::registration::SubscriberRegistry;

type CachedPipelines = Arc<dyn Any + Send + Sync>;

/// Builds the pipelines for a request type once and caches them by `TypeId`.
///
/// The cache is owned by the builder (and so by one command processor);
/// `clear_cache` is the only way to drop it. Two callers racing to build the
/// same type may both build, the first insert wins.
pub struct PipelineBuilder {
    subscribers: Arc<SubscriberRegistry>,
    policies: Arc<PolicyRegistry>,
    cache: RwLock<HashMap<TypeId, CachedPipelines>>,
}

impl PipelineBuilder {
    pub fn new(subscribers: Arc<SubscriberRegistry>, policies: Arc<PolicyRegistry>) -> Self {
        Self {
            subscribers,
            policies,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }

    pub fn policies(&self) -> &Arc<PolicyRegistry> {
        &self.policies
    }

    /// One pipeline per registered subscriber of `R`, in registration order.
    pub fn build<R: Request>(&self) -> Result<Arc<Vec<Pipeline<R>>>, HandlerError> {
        if let Some(hit) = self.lookup::<R>() {
            return Ok(hit);
        }

        let pipelines = self
            .subscribers
            .registrations::<R>()
            .iter()
            .map(|registration| registration.build(&self.policies))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            request_type = std::any::type_name::<R>(),
            pipelines = pipelines.len(),
            "built pipelines"
        );

        let built: CachedPipelines = Arc::new(pipelines);
        let stored = {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cache.entry(TypeId::of::<R>()).or_insert(built))
        };
        stored.downcast::<Vec<Pipeline<R>>>().map_err(|_| {
            HandlerError::configuration(format!(
                "pipeline cache holds the wrong type for {}",
                std::any::type_name::<R>()
            ))
        })
    }

    fn lookup<R: Request>(&self) -> Option<Arc<Vec<Pipeline<R>>>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let entry = cache.get(&TypeId::of::<R>())?;
        Arc::clone(entry).downcast::<Vec<Pipeline<R>>>().ok()
    }

    pub fn is_cached<R: Request>(&self) -> bool {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&TypeId::of::<R>())
    }

    pub fn cached_types(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn clear_cache(&self) {
        self.cache.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
