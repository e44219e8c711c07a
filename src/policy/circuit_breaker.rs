use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::HandlerError;

use super::{is_transient, Attempt, ErrorFilter, Policy};

/// Observable state of a `CircuitBreakerPolicy`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    /// The break duration elapsed; the next call is a trial.
    HalfOpen,
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Opens after `failure_threshold` consecutive matching failures and fails
/// fast with `HandlerError::BrokenCircuit` until `break_duration` elapses.
/// After that one trial call is let through: success closes the circuit,
/// failure opens it again.
pub struct CircuitBreakerPolicy {
    name: String,
    failure_threshold: u32,
    break_duration: Duration,
    handles: ErrorFilter,
    state: Mutex<BreakerState>,
}

impl CircuitBreakerPolicy {
    pub fn new(failure_threshold: u32, break_duration: Duration) -> Self {
        Self {
            name: "circuit-breaker".to_string(),
            failure_threshold: failure_threshold.max(1),
            break_duration,
            handles: Arc::new(|err: &HandlerError| is_transient(err) && !err.is_broken_circuit()),
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Name reported in `BrokenCircuit` errors.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Only count errors matching `filter` as failures.
    pub fn handles<F>(mut self, filter: F) -> Self
    where
        F: Fn(&HandlerError) -> bool + Send + Sync + 'static,
    {
        self.handles = Arc::new(filter);
        self
    }

    pub fn state(&self) -> CircuitState {
        let state = self.lock();
        match state.opened_at {
            None => CircuitState::Closed,
            Some(opened) if opened.elapsed() < self.break_duration => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
        }
    }

    /// Close the circuit and forget recorded failures.
    pub fn reset(&self) {
        *self.lock() = BreakerState::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn on_success(&self) {
        *self.lock() = BreakerState::default();
    }

    fn on_failure(&self) {
        let mut state = self.lock();
        let trial_failed = state.opened_at.is_some();
        state.consecutive_failures += 1;
        if trial_failed || state.consecutive_failures >= self.failure_threshold {
            tracing::warn!(policy = %self.name, failures = state.consecutive_failures, "circuit opened");
            state.opened_at = Some(Instant::now());
        }
    }
}

#[async_trait]
impl Policy for CircuitBreakerPolicy {
    async fn execute(&self, attempt: &mut (dyn Attempt + '_)) -> Result<(), HandlerError> {
        if self.state() == CircuitState::Open {
            return Err(HandlerError::BrokenCircuit(self.name.clone()));
        }

        match attempt.attempt().await {
            Ok(()) => {
                self.on_success();
                Ok(())
            }
            Err(err) => {
                if (self.handles)(&err) {
                    self.on_failure();
                }
                Err(err)
            }
        }
    }
}
