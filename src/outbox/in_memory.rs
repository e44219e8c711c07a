use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::debug;

use crate::message::{Id, Message, RequestContext};

use super::error::OutboxError;
use super::store::{Outbox, OutboxEntry, OutstandingQuery, UnitOfWork};

/// Outbox kept in process memory. Clones share the same entries.
///
/// Adding an id that is already stored is a no-op, so a redelivered
/// deposit cannot produce a second send.
#[derive(Clone, Default)]
pub struct InMemoryOutbox {
    entries: Arc<RwLock<Vec<OutboxEntry>>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry, dispatched or not, in write order.
    pub fn entries(&self) -> Vec<OutboxEntry> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<OutboxEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<OutboxEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn insert(entries: &RwLock<Vec<OutboxEntry>>, message: Message) -> Result<(), OutboxError> {
    let mut entries = entries.write().unwrap_or_else(PoisonError::into_inner);
    if entries.iter().any(|entry| entry.message.id() == message.id()) {
        debug!(message_id = %message.id(), "message already in outbox");
        return Ok(());
    }
    entries.push(OutboxEntry::new(message));
    Ok(())
}

#[async_trait]
impl Outbox for InMemoryOutbox {
    async fn add(
        &self,
        message: Message,
        _ctx: &RequestContext,
        tx: Option<&mut UnitOfWork>,
    ) -> Result<(), OutboxError> {
        if message.topic().is_empty() {
            return Err(OutboxError::MissingTopic(message.id().clone()));
        }
        match tx {
            Some(tx) => {
                let entries = Arc::clone(&self.entries);
                tx.enlist(move || insert(&entries, message));
                Ok(())
            }
            None => insert(&self.entries, message),
        }
    }

    async fn get(&self, id: &Id) -> Result<Option<OutboxEntry>, OutboxError> {
        Ok(self.read().iter().find(|entry| entry.message.id() == id).cloned())
    }

    async fn delete(&self, ids: &[Id]) -> Result<(), OutboxError> {
        self.write().retain(|entry| !ids.contains(entry.message.id()));
        Ok(())
    }

    async fn mark_dispatched(
        &self,
        id: &Id,
        _ctx: &RequestContext,
        dispatched_at: Option<SystemTime>,
    ) -> Result<(), OutboxError> {
        let mut entries = self.write();
        let entry = entries
            .iter_mut()
            .find(|entry| entry.message.id() == id)
            .ok_or_else(|| OutboxError::NotFound(id.clone()))?;
        if entry.dispatched_at.is_none() {
            entry.dispatched_at = Some(dispatched_at.unwrap_or_else(SystemTime::now));
        }
        Ok(())
    }

    async fn outstanding_messages(&self, query: &OutstandingQuery) -> Result<Vec<Message>, OutboxError> {
        let skip = query.page_size.saturating_mul(query.page_number.saturating_sub(1));
        Ok(self
            .read()
            .iter()
            .filter(|entry| query.matches(entry))
            .skip(skip)
            .take(query.page_size)
            .map(|entry| entry.message.clone())
            .collect())
    }

    async fn dispatched_messages(
        &self,
        older_than: Duration,
        page_size: usize,
    ) -> Result<Vec<Message>, OutboxError> {
        let now = SystemTime::now();
        Ok(self
            .read()
            .iter()
            .filter(|entry| {
                entry.dispatched_at.is_some_and(|at| {
                    now.duration_since(at).unwrap_or(Duration::ZERO) >= older_than
                })
            })
            .take(page_size)
            .map(|entry| entry.message.clone())
            .collect())
    }

    async fn outstanding_count(&self) -> Result<usize, OutboxError> {
        Ok(self.read().iter().filter(|entry| !entry.is_dispatched()).count())
    }
}
