//! A pump on its own thread.
//!
//! The thread owns a current-thread tokio runtime and blocks on
//! `MessagePump::run`, so handlers never share a scheduler with the caller.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio_util::sync::CancellationToken;
use tracing::error;

use super::message_pump::{MessagePump, PumpStats};
use crate::bus::Channel;
use crate::message::Request;

/// Handle to a pump running on a dedicated thread.
///
/// ```ignore
/// let reactor = Reactor::spawn(pump);
/// // ... messages flow ...
/// let stats = reactor.stop();
/// println!("handled {}", stats.handled);
/// ```
pub struct Reactor {
    channel: Arc<Channel>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<PumpStats>>,
}

impl Reactor {
    pub fn spawn<R: Request>(pump: MessagePump<R>) -> Self {
        let channel = Arc::clone(pump.channel());
        let cancel = pump.cancellation().clone();
        let handle = thread::spawn(move || Self::run_blocking(pump));

        Self {
            channel,
            cancel,
            handle: Some(handle),
        }
    }

    /// Run a pump to completion on the current thread.
    pub fn run_blocking<R: Request>(pump: MessagePump<R>) -> PumpStats {
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime.block_on(pump.run()),
            Err(err) => {
                error!(error = %err, channel = %pump.channel().name(), "could not start reactor runtime");
                PumpStats::runtime_failure()
            }
        }
    }

    /// Queue a quit message; the pump exits after what is already buffered.
    pub fn shutdown(&self) {
        self.channel.stop();
    }

    /// Cancel without waiting for the quit message.
    pub fn signal_stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Shut down and wait for the thread. Blocks the caller.
    pub fn stop(self) -> PumpStats {
        self.shutdown();
        self.join()
    }

    /// Wait for the pump to exit on its own. Blocks the caller.
    pub fn join(mut self) -> PumpStats {
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                error!(channel = %self.channel.name(), "reactor thread panicked");
                PumpStats::runtime_failure()
            }),
            None => PumpStats::default(),
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel.cancel();
        }
    }
}
