use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::message::{Id, Message};

use super::error::OutboxError;
use super::store::Outbox;

/// Destination for dispatched messages removed from the outbox.
#[async_trait]
pub trait ArchiveProvider: Send + Sync {
    async fn archive(&self, messages: &[Message]) -> Result<(), OutboxError>;
}

/// Keeps archived messages in memory.
#[derive(Default)]
pub struct InMemoryArchiveProvider {
    archived: Mutex<Vec<Message>>,
}

impl InMemoryArchiveProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn archived(&self) -> Vec<Message> {
        self.archived.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ArchiveProvider for InMemoryArchiveProvider {
    async fn archive(&self, messages: &[Message]) -> Result<(), OutboxError> {
        self.archived
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(messages);
        Ok(())
    }
}

/// Moves dispatched messages to an archive, then deletes them from the outbox.
///
/// Messages are only deleted once the provider accepted them.
pub struct OutboxArchiver {
    outbox: Arc<dyn Outbox>,
    provider: Arc<dyn ArchiveProvider>,
    batch_size: usize,
}

impl OutboxArchiver {
    pub fn new(outbox: Arc<dyn Outbox>, provider: Arc<dyn ArchiveProvider>) -> Self {
        Self {
            outbox,
            provider,
            batch_size: 100,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Archive one batch of messages dispatched at least `dispatched_since` ago.
    /// Returns how many were archived.
    pub async fn archive(&self, dispatched_since: Duration) -> Result<usize, OutboxError> {
        let messages = self
            .outbox
            .dispatched_messages(dispatched_since, self.batch_size)
            .await?;
        if messages.is_empty() {
            return Ok(0);
        }

        self.provider.archive(&messages).await?;
        let ids: Vec<Id> = messages.iter().map(|message| message.id().clone()).collect();
        self.outbox.delete(&ids).await?;

        info!(archived = ids.len(), "archived dispatched outbox messages");
        Ok(ids.len())
    }
}
