use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::message::RoutingKey;

/// Per-topic breaker consulted by the outbox mediator before each send.
///
/// Independent of the pipeline's `CircuitBreakerPolicy`, which guards a
/// handler chain rather than a topic.
pub trait OutboxCircuitBreaker: Send + Sync {
    fn trip_topic(&self, topic: &RoutingKey);

    /// Advance one clear cycle; topics whose cooldown ran out close again.
    fn cool_down(&self);

    fn tripped_topics(&self) -> Vec<RoutingKey>;

    fn is_tripped(&self, topic: &RoutingKey) -> bool {
        self.tripped_topics().contains(topic)
    }
}

/// Counts cooldown in clear cycles: a topic tripped with a cooldown count of
/// N stays tripped through N calls to `cool_down`.
pub struct InMemoryOutboxCircuitBreaker {
    cooldown_count: u32,
    tripped: Mutex<HashMap<RoutingKey, u32>>,
}

impl Default for InMemoryOutboxCircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOutboxCircuitBreaker {
    pub fn new() -> Self {
        Self {
            cooldown_count: 2,
            tripped: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cooldown_count(mut self, cooldown_count: u32) -> Self {
        self.cooldown_count = cooldown_count.max(1);
        self
    }

    pub fn cooldown_count(&self) -> u32 {
        self.cooldown_count
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RoutingKey, u32>> {
        self.tripped.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OutboxCircuitBreaker for InMemoryOutboxCircuitBreaker {
    fn trip_topic(&self, topic: &RoutingKey) {
        warn!(%topic, cooldown = self.cooldown_count, "outbox topic tripped");
        self.lock().insert(topic.clone(), self.cooldown_count);
    }

    fn cool_down(&self) {
        self.lock().retain(|topic, remaining| {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                debug!(%topic, "outbox topic closed");
            }
            *remaining > 0
        });
    }

    fn tripped_topics(&self) -> Vec<RoutingKey> {
        self.lock().keys().cloned().collect()
    }

    fn is_tripped(&self, topic: &RoutingKey) -> bool {
        self.lock().contains_key(topic)
    }
}
