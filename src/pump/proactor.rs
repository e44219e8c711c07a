//! A pump as a task on the surrounding tokio runtime.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::message_pump::{MessagePump, PumpStats};
use crate::bus::Channel;
use crate::message::Request;

/// Handle to a pump running as a tokio task.
pub struct Proactor {
    channel: Arc<Channel>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<PumpStats>>,
}

impl Proactor {
    /// Must be called from within a tokio runtime.
    pub fn spawn<R: Request>(pump: MessagePump<R>) -> Self {
        let channel = Arc::clone(pump.channel());
        let cancel = pump.cancellation().clone();
        let handle = tokio::spawn(async move { pump.run().await });

        Self {
            channel,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn shutdown(&self) {
        self.channel.stop();
    }

    pub fn signal_stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub async fn stop(self) -> PumpStats {
        self.shutdown();
        self.join().await
    }

    pub async fn join(mut self) -> PumpStats {
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_else(|err| {
                error!(channel = %self.channel.name(), error = %err, "proactor task failed");
                PumpStats::runtime_failure()
            }),
            None => PumpStats::default(),
        }
    }
}

impl Drop for Proactor {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel.cancel();
        }
    }
}
