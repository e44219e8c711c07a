use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::HandlerError;

use super::{CircuitBreakerPolicy, Policy, RetryPolicy};

/// Name of the retry policy the outbox mediator wraps producer sends in.
pub const RETRY_POLICY: &str = "courier.retry";
/// Name of the default circuit breaker policy.
pub const CIRCUIT_BREAKER_POLICY: &str = "courier.circuit_breaker";

/// Lookup of resilience policies by name.
#[derive(Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<String, Arc<dyn Policy>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the default retry (50/100/150ms) and circuit breaker
    /// (1 failure, 500ms) policies.
    pub fn defaults() -> Self {
        Self::new()
            .with(
                RETRY_POLICY,
                RetryPolicy::linear(3, Duration::from_millis(50)),
            )
            .with(
                CIRCUIT_BREAKER_POLICY,
                CircuitBreakerPolicy::new(1, Duration::from_millis(500))
                    .with_name(CIRCUIT_BREAKER_POLICY),
            )
    }

    /// Register a policy, builder style.
    pub fn with<P: Policy + 'static>(mut self, name: impl Into<String>, policy: P) -> Self {
        self.register(name, Arc::new(policy));
        self
    }

    pub fn register(&mut self, name: impl Into<String>, policy: Arc<dyn Policy>) {
        self.policies.insert(name.into(), policy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Policy>> {
        self.policies.get(name).cloned()
    }

    /// Look up a policy that a pipeline declared; a missing name is a configuration error.
    pub fn require(&self, name: &str) -> Result<Arc<dyn Policy>, HandlerError> {
        self.get(name)
            .ok_or_else(|| HandlerError::configuration(format!("no policy registered as '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.policies.keys().map(|s| s.as_str()).collect()
    }
}
