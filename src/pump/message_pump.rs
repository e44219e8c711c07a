use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::subscription::Subscription;
use crate::bus::Channel;
use crate::command_processor::CommandProcessor;
use crate::error::HandlerError;
use crate::mapper::MessageMapper;
use crate::message::{Message, MessageType, Request};

/// Why a pump left its loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PumpExit {
    /// A quit message arrived.
    Quit,
    /// Too many unacceptable messages.
    UnacceptableLimit,
    /// A handler reported a configuration error.
    ConfigurationError,
    /// The cancellation token fired.
    #[default]
    Cancelled,
    /// The pump's runtime could not be started, or the pump panicked.
    RuntimeFailure,
}

/// Counters reported when a pump stops.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub receives: u64,
    pub handled: u64,
    pub failed: u64,
    pub requeued: u64,
    pub rejected: u64,
    pub dead_lettered: u64,
    pub unacceptable: u64,
    pub empty_polls: u64,
    pub channel_failures: u64,
    pub exit: PumpExit,
}

impl PumpStats {
    pub(crate) fn runtime_failure() -> Self {
        Self {
            exit: PumpExit::RuntimeFailure,
            ..Self::default()
        }
    }
}

enum Step {
    Continue,
    Exit(PumpExit),
}

/// Reads one channel and dispatches what it receives to the command processor.
pub struct MessagePump<R: Request> {
    processor: Arc<CommandProcessor>,
    channel: Arc<Channel>,
    mapper: Arc<dyn MessageMapper<R>>,
    subscription: Subscription,
    cancel: CancellationToken,
    _request: PhantomData<fn() -> R>,
}

impl<R: Request> MessagePump<R> {
    /// Fails if no mapper is registered for `R`.
    pub fn new(
        processor: Arc<CommandProcessor>,
        channel: Arc<Channel>,
        subscription: Subscription,
    ) -> Result<Self, HandlerError> {
        let mapper = processor.mappers().require::<R>()?;
        Ok(Self {
            processor,
            channel,
            mapper,
            subscription,
            cancel: CancellationToken::new(),
            _request: PhantomData,
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Ask the loop to stop once it reaches the quit message.
    pub fn shutdown(&self) {
        self.channel.stop();
    }

    /// Run until quit, cancellation, the unacceptable limit, or a configuration error.
    pub async fn run(&self) -> PumpStats {
        let span = info_span!(
            "message_pump",
            subscription = %self.subscription.name,
            channel = %self.channel.name(),
            routing_key = %self.channel.routing_key(),
        );
        self.run_loop().instrument(span).await
    }

    async fn run_loop(&self) -> PumpStats {
        let mut stats = PumpStats::default();
        info!("message pump started");

        loop {
            if self.cancel.is_cancelled() {
                stats.exit = PumpExit::Cancelled;
                break;
            }

            let received = tokio::select! {
                _ = self.cancel.cancelled() => {
                    stats.exit = PumpExit::Cancelled;
                    break;
                }
                received = self.channel.receive(self.subscription.timeout) => received,
            };
            stats.receives += 1;

            let message = match received {
                Ok(message) => message,
                Err(err) => {
                    stats.channel_failures += 1;
                    warn!(error = %err, "channel failure; backing off");
                    self.pause(self.subscription.channel_failure_delay).await;
                    continue;
                }
            };

            match self.process(message, &mut stats).await {
                Step::Continue => {}
                Step::Exit(exit) => {
                    stats.exit = exit;
                    break;
                }
            }
        }

        info!(
            exit = ?stats.exit,
            handled = stats.handled,
            failed = stats.failed,
            requeued = stats.requeued,
            rejected = stats.rejected,
            "message pump stopped"
        );
        stats
    }

    async fn process(&self, message: Message, stats: &mut PumpStats) -> Step {
        match message.message_type() {
            MessageType::None => {
                stats.empty_polls += 1;
                self.pause(self.subscription.empty_channel_delay).await;
                return Step::Continue;
            }
            MessageType::Quit => {
                debug!("quit message received");
                return Step::Exit(PumpExit::Quit);
            }
            MessageType::Unacceptable => {
                warn!(message_id = %message.id(), "unacceptable message");
                return self.discard_unacceptable(&message, stats).await;
            }
            MessageType::Command | MessageType::Event | MessageType::Document => {}
        }

        debug!(message_id = %message.id(), handled_count = message.header.handled_count, "message received");
        let request = match self.mapper.map_to_request(&message) {
            Ok(request) => request,
            Err(err) => {
                warn!(message_id = %message.id(), error = %err, "could not map message");
                return self.discard_unacceptable(&message, stats).await;
            }
        };

        match self.dispatch(request, &message).await {
            Ok(()) => {
                stats.handled += 1;
                match self.channel.acknowledge(&message).await {
                    Ok(()) => debug!(message_id = %message.id(), "message acknowledged"),
                    Err(err) => warn!(message_id = %message.id(), error = %err, "acknowledge failed"),
                }
                Step::Continue
            }
            Err(err) if err.is_configuration() => {
                error!(message_id = %message.id(), error = %err, "configuration error; stopping pump");
                stats.failed += 1;
                self.reject(&message, stats).await;
                Step::Exit(PumpExit::ConfigurationError)
            }
            Err(err) => {
                if err.is_defer() {
                    debug!(message_id = %message.id(), reason = %err, "handler deferred message");
                } else {
                    error!(message_id = %message.id(), error = %err, "handler failed");
                }
                stats.failed += 1;
                self.requeue_or_reject(message, stats).await;
                Step::Continue
            }
        }
    }

    async fn dispatch(&self, mut request: R, message: &Message) -> Result<(), HandlerError> {
        let mut ctx = self.processor.create_context();
        if let Some(correlation_id) = &message.header.correlation_id {
            ctx.set_correlation_id(correlation_id.clone());
        }
        ctx.set_originating_message(message.clone());

        match message.message_type() {
            MessageType::Command => {
                self.processor
                    .send_with_context(&mut request, &mut ctx)
                    .await
            }
            _ => {
                self.processor
                    .publish_with_context(&mut request, &mut ctx)
                    .await
            }
        }
    }

    async fn discard_unacceptable(&self, message: &Message, stats: &mut PumpStats) -> Step {
        stats.unacceptable += 1;
        if let Err(err) = self.channel.acknowledge(message).await {
            warn!(message_id = %message.id(), error = %err, "acknowledge failed");
        }

        let limit = u64::from(self.subscription.unacceptable_message_limit);
        if limit > 0 && stats.unacceptable >= limit {
            warn!(limit, "unacceptable message limit reached; stopping pump");
            return Step::Exit(PumpExit::UnacceptableLimit);
        }
        Step::Continue
    }

    async fn requeue_or_reject(&self, mut message: Message, stats: &mut PumpStats) {
        message.header.update_handled_count();

        if !self.subscription.allows_requeue(message.header.handled_count) {
            warn!(
                message_id = %message.id(),
                handled_count = message.header.handled_count,
                "requeue limit reached; rejecting"
            );
            self.reject(&message, stats).await;
            return;
        }

        match self
            .channel
            .requeue(&message, self.subscription.requeue_delay)
            .await
        {
            Ok(true) => stats.requeued += 1,
            Ok(false) => {
                info!(message_id = %message.id(), "transport moved message to dead letter queue");
                stats.dead_lettered += 1;
            }
            Err(err) => warn!(message_id = %message.id(), error = %err, "requeue failed"),
        }
    }

    async fn reject(&self, message: &Message, stats: &mut PumpStats) {
        match self.channel.reject(message).await {
            Ok(dead_lettered) => {
                stats.rejected += 1;
                if dead_lettered {
                    stats.dead_lettered += 1;
                }
            }
            Err(err) => warn!(message_id = %message.id(), error = %err, "reject failed"),
        }
    }

    async fn pause(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
