//! Background sweeper that periodically clears the outbox.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::HandlerError;
use crate::message::RequestContext;

use super::mediator::{ClearResult, OutboxProducerMediator};

/// Statistics from a sweeper run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweeperStats {
    pub sweeps: usize,
    pub dispatched: usize,
    pub failed: usize,
    pub errors: usize,
}

/// Clears outstanding outbox messages on a timer.
///
/// ## Example
///
/// ```ignore
/// let sweeper = OutboxSweeper::new(mediator)
///     .with_interval(Duration::from_secs(5))
///     .with_batch_size(100)
///     .spawn();
///
/// // ... do work ...
///
/// let stats = sweeper.stop().await;
/// println!("swept {} messages", stats.dispatched);
/// ```
pub struct OutboxSweeper {
    mediator: Arc<OutboxProducerMediator>,
    interval: Duration,
    batch_size: usize,
    min_age: Duration,
    bulk: bool,
}

impl OutboxSweeper {
    pub fn new(mediator: Arc<OutboxProducerMediator>) -> Self {
        Self {
            mediator,
            interval: Duration::from_secs(5),
            batch_size: 100,
            min_age: Duration::from_secs(5),
            bulk: false,
        }
    }

    /// Time between sweeps.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Only sweep messages at least this old, leaving fresh ones to their own post.
    pub fn with_min_age(mut self, min_age: Duration) -> Self {
        self.min_age = min_age;
        self
    }

    pub fn with_bulk(mut self, bulk: bool) -> Self {
        self.bulk = bulk;
        self
    }

    /// Run a single sweep now.
    pub async fn sweep(&self, cancel: &CancellationToken) -> Result<ClearResult, HandlerError> {
        self.mediator
            .clear_outstanding_from_outbox(
                self.batch_size,
                self.min_age,
                self.bulk,
                &RequestContext::new(),
                cancel,
            )
            .await
    }

    /// Sweep on a tokio task until stopped.
    pub fn spawn(self) -> SweeperHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut stats = SweeperStats::default();
            while !token.is_cancelled() {
                stats.sweeps += 1;
                match self.sweep(&token).await {
                    Ok(result) => {
                        stats.dispatched += result.dispatched;
                        stats.failed += result.failed;
                    }
                    Err(err) => {
                        warn!(error = %err, "outbox sweep failed");
                        stats.errors += 1;
                    }
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
            debug!(sweeps = stats.sweeps, "outbox sweeper stopped");
            stats
        });

        SweeperHandle {
            cancel,
            handle: Some(handle),
        }
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    cancel: CancellationToken,
    handle: Option<JoinHandle<SweeperStats>>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop and wait for it to finish.
    pub async fn stop(mut self) -> SweeperStats {
        self.cancel.cancel();
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => SweeperStats::default(),
        }
    }

    /// Signal the sweeper to stop without waiting.
    pub fn signal_stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
