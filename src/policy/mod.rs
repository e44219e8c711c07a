//! Resilience policies - named retry and circuit-breaker strategies.
//!
//! Policies wrap an [`Attempt`]: a unit of work that can be run more than
//! once. The pipeline uses them to guard the remainder of a handler chain,
//! the outbox mediator uses them to guard producer sends.
//!
//! ```ignore
//! let policies = PolicyRegistry::new()
//!     .with("retry", RetryPolicy::new(vec![Duration::from_millis(50); 3]))
//!     .with("breaker", CircuitBreakerPolicy::new(2, Duration::from_secs(30)));
//! ```

mod circuit_breaker;
mod registry;
mod retry;

use async_trait::async_trait;

use crate::error::HandlerError;

pub use circuit_breaker::{CircuitBreakerPolicy, CircuitState};
pub use registry::{PolicyRegistry, CIRCUIT_BREAKER_POLICY, RETRY_POLICY};
pub use retry::RetryPolicy;

/// Predicate deciding whether a policy reacts to an error.
pub type ErrorFilter = std::sync::Arc<dyn Fn(&HandlerError) -> bool + Send + Sync>;

/// A repeatable unit of work guarded by a policy.
#[async_trait]
pub trait Attempt: Send {
    async fn attempt(&mut self) -> Result<(), HandlerError>;
}

/// A resilience strategy that decides how often, and whether, to run an attempt.
#[async_trait]
pub trait Policy: Send + Sync {
    async fn execute(&self, attempt: &mut (dyn Attempt + '_)) -> Result<(), HandlerError>;
}

/// Errors that no policy should ever retry or count.
pub(crate) fn is_transient(err: &HandlerError) -> bool {
    !err.is_configuration() && !err.is_defer()
}
