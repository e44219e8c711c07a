use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::debug;

use crate::message::{Id, Message, RequestContext, RoutingKey};

use super::error::OutboxError;

/// A message held by the outbox, plus its dispatch state.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboxEntry {
    pub message: Message,
    pub written_at: SystemTime,
    pub dispatched_at: Option<SystemTime>,
}

impl OutboxEntry {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            written_at: SystemTime::now(),
            dispatched_at: None,
        }
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatched_at.is_some()
    }

    /// Time since the entry was written.
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.written_at)
            .unwrap_or(Duration::ZERO)
    }
}

/// Filter for [`Outbox::outstanding_messages`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutstandingQuery {
    pub min_age: Duration,
    pub page_size: usize,
    /// 1-based.
    pub page_number: usize,
    pub excluded_topics: Vec<RoutingKey>,
}

impl Default for OutstandingQuery {
    fn default() -> Self {
        Self {
            min_age: Duration::ZERO,
            page_size: 100,
            page_number: 1,
            excluded_topics: Vec::new(),
        }
    }
}

impl OutstandingQuery {
    pub fn new(min_age: Duration) -> Self {
        Self {
            min_age,
            ..Self::default()
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_page_number(mut self, page_number: usize) -> Self {
        self.page_number = page_number.max(1);
        self
    }

    pub fn excluding(mut self, topics: Vec<RoutingKey>) -> Self {
        self.excluded_topics = topics;
        self
    }

    pub fn matches(&self, entry: &OutboxEntry) -> bool {
        !entry.is_dispatched()
            && entry.age() >= self.min_age
            && !self.excluded_topics.contains(entry.message.topic())
    }
}

type StagedWrite = Box<dyn FnOnce() -> Result<(), OutboxError> + Send>;

/// Writes staged together and applied on `commit`.
///
/// Business state and outbox writes enlisted in the same unit become
/// visible together; `rollback` (or dropping the unit) discards them all.
#[derive(Default)]
pub struct UnitOfWork {
    staged: Vec<StagedWrite>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enlist<F>(&mut self, write: F)
    where
        F: FnOnce() -> Result<(), OutboxError> + Send + 'static,
    {
        self.staged.push(Box::new(write));
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Apply staged writes in the order they were enlisted.
    pub fn commit(self) -> Result<(), OutboxError> {
        for write in self.staged {
            write()?;
        }
        Ok(())
    }

    pub fn rollback(self) {
        debug!(discarded = self.staged.len(), "unit of work rolled back");
    }
}

/// Durable store for outgoing messages.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Store a message. With a unit of work the write is staged until it commits.
    async fn add(
        &self,
        message: Message,
        ctx: &RequestContext,
        tx: Option<&mut UnitOfWork>,
    ) -> Result<(), OutboxError>;

    async fn get(&self, id: &Id) -> Result<Option<OutboxEntry>, OutboxError>;

    /// Remove entries. Unknown ids are ignored.
    async fn delete(&self, ids: &[Id]) -> Result<(), OutboxError>;

    /// Record a successful send. Marking an already dispatched entry is a no-op.
    async fn mark_dispatched(
        &self,
        id: &Id,
        ctx: &RequestContext,
        dispatched_at: Option<SystemTime>,
    ) -> Result<(), OutboxError>;

    /// Undispatched messages, oldest first.
    async fn outstanding_messages(&self, query: &OutstandingQuery) -> Result<Vec<Message>, OutboxError>;

    /// Dispatched messages whose dispatch is at least `older_than` ago.
    async fn dispatched_messages(
        &self,
        older_than: Duration,
        page_size: usize,
    ) -> Result<Vec<Message>, OutboxError>;

    async fn outstanding_count(&self) -> Result<usize, OutboxError>;
}
