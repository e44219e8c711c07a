use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{ScheduledJob, Scheduler, SchedulerError, SchedulerId};

struct Entry {
    job: ScheduledJob,
    timer: JoinHandle<()>,
    generation: u64,
}

type Entries = Arc<Mutex<HashMap<SchedulerId, Entry>>>;

/// Timer-based scheduler. Each schedule gets a tokio timer task that runs
/// its job when due. Pending schedules are lost on shutdown.
#[derive(Clone, Default)]
pub struct InMemoryScheduler {
    entries: Entries,
    generations: Arc<AtomicU64>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_scheduled(&self, id: &SchedulerId) -> bool {
        lock(&self.entries).contains_key(id)
    }

    /// Starts the timer task for a new entry. Callers hold the entries lock until the
    /// entry is inserted, so a timer that fires immediately still finds it.
    /// A timer only fires the entry carrying its own generation.
    fn start(&self, id: SchedulerId, job: ScheduledJob, at: SystemTime) -> Result<Entry, SchedulerError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| SchedulerError::Unavailable(err.to_string()))?;
        let delay = at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let entries = Arc::clone(&self.entries);

        let timer = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(entry) = take_if_current(&entries, &id, generation) {
                fire(&id, entry.job).await;
            }
        });
        Ok(Entry {
            job,
            timer,
            generation,
        })
    }
}

async fn fire(id: &SchedulerId, job: ScheduledJob) {
    let description = job.description().to_string();
    match job.fire().await {
        Ok(()) => debug!(scheduler_id = %id, job = %description, "schedule fired"),
        Err(err) => error!(scheduler_id = %id, job = %description, error = %err, "scheduled job failed"),
    }
}

fn take_if_current(entries: &Entries, id: &SchedulerId, generation: u64) -> Option<Entry> {
    let mut entries = lock(entries);
    let current = entries.get(id).is_some_and(|entry| entry.generation == generation);
    if current {
        entries.remove(id)
    } else {
        None
    }
}

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<SchedulerId, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Scheduler for InMemoryScheduler {
    async fn schedule(&self, job: ScheduledJob, at: SystemTime) -> Result<SchedulerId, SchedulerError> {
        let id = SchedulerId::random();
        let mut entries = lock(&self.entries);
        let entry = self.start(id.clone(), job, at)?;
        debug!(scheduler_id = %id, job = %entry.job.description(), "job scheduled");
        entries.insert(id.clone(), entry);
        Ok(id)
    }

    async fn reschedule(&self, id: &SchedulerId, at: SystemTime) -> Result<bool, SchedulerError> {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.remove(id) else {
            return Ok(false);
        };
        entry.timer.abort();
        let moved = self.start(id.clone(), entry.job, at)?;
        entries.insert(id.clone(), moved);
        Ok(true)
    }

    async fn cancel(&self, id: &SchedulerId) -> Result<bool, SchedulerError> {
        match lock(&self.entries).remove(id) {
            Some(entry) => {
                entry.timer.abort();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
