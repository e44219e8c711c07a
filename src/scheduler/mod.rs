//! Deferred delivery - run a job at a future time.
//!
//! The scheduler only keeps time. What a schedule does when it fires is a
//! [`ScheduledJob`] built by the command processor: a scheduled message is
//! deposited in the outbox and cleared, a scheduled request is sent,
//! published or posted again.
//!
//! Reschedule and cancel report an unknown id as `false` rather than an
//! error, since the schedule may already have fired.

mod in_memory;

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HandlerError;

pub use in_memory::InMemoryScheduler;

/// Opaque handle to a scheduled message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchedulerId(String);

impl SchedulerId {
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SchedulerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Error type for scheduler operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    /// The scheduler cannot accept work, e.g. no async runtime is running.
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),
    #[error("scheduler error: {0}")]
    Other(Arc<dyn Error + Send + Sync>),
}

/// How a scheduled request is dispatched when it fires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestSchedulerType {
    /// `CommandProcessor::send`.
    Send,
    /// `CommandProcessor::publish`.
    Publish,
    /// `CommandProcessor::post`.
    #[default]
    Post,
}

type FireFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// The work a schedule runs once when it comes due. The future is not
/// polled before then.
pub struct ScheduledJob {
    description: String,
    fire: FireFuture,
}

impl ScheduledJob {
    pub fn new<F>(description: impl Into<String>, fire: F) -> Self
    where
        F: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self {
            description: description.into(),
            fire: Box::pin(fire),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub async fn fire(self) -> Result<(), HandlerError> {
        self.fire.await
    }
}

impl fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(&self, job: ScheduledJob, at: SystemTime) -> Result<SchedulerId, SchedulerError>;

    /// Move a pending schedule. `false` if the id is unknown or already fired.
    async fn reschedule(&self, id: &SchedulerId, at: SystemTime) -> Result<bool, SchedulerError>;

    /// `false` if the id is unknown or already fired.
    async fn cancel(&self, id: &SchedulerId) -> Result<bool, SchedulerError>;
}
