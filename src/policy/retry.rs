use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::HandlerError;

use super::{is_transient, Attempt, ErrorFilter, Policy};

type RetryCallback = Arc<dyn Fn(&HandlerError, usize, Duration) + Send + Sync>;

/// Retries an attempt once per configured backoff interval.
///
/// With `N` backoffs an always-failing attempt runs `N + 1` times before the
/// last error is returned.
pub struct RetryPolicy {
    backoffs: Vec<Duration>,
    handles: ErrorFilter,
    on_retry: Option<RetryCallback>,
}

impl RetryPolicy {
    pub fn new(backoffs: Vec<Duration>) -> Self {
        Self {
            backoffs,
            handles: Arc::new(is_transient),
            on_retry: None,
        }
    }

    /// Retry `count` times without waiting.
    pub fn immediate(count: usize) -> Self {
        Self::new(vec![Duration::ZERO; count])
    }

    /// Retry with a linear backoff: `step`, `2 * step`, ...
    pub fn linear(count: usize, step: Duration) -> Self {
        Self::new((1..=count as u32).map(|n| step * n).collect())
    }

    /// Only retry errors matching `filter`.
    pub fn handles<F>(mut self, filter: F) -> Self
    where
        F: Fn(&HandlerError) -> bool + Send + Sync + 'static,
    {
        self.handles = Arc::new(filter);
        self
    }

    /// Callback invoked before each retry with the error, the retry number (1-based) and the delay.
    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(&HandlerError, usize, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    pub fn backoffs(&self) -> &[Duration] {
        &self.backoffs
    }
}

#[async_trait]
impl Policy for RetryPolicy {
    async fn execute(&self, attempt: &mut (dyn Attempt + '_)) -> Result<(), HandlerError> {
        let mut retries = 0;
        loop {
            let err = match attempt.attempt().await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            if retries >= self.backoffs.len() || !(self.handles)(&err) {
                return Err(err);
            }

            let delay = self.backoffs[retries];
            retries += 1;
            tracing::debug!(retry = retries, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
            if let Some(callback) = &self.on_retry {
                callback(&err, retries, delay);
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
