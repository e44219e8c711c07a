use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::message_pump::{MessagePump, PumpStats};
use super::proactor::Proactor;
use super::reactor::Reactor;
use super::subscription::{MessagePumpType, Subscription};
use crate::bus::{Channel, ChannelFactory};
use crate::command_processor::CommandProcessor;
use crate::error::HandlerError;
use crate::message::Request;

type Launch = Box<
    dyn Fn(
            Arc<CommandProcessor>,
            Channel,
            &Subscription,
            CancellationToken,
        ) -> Result<Performer, HandlerError>
        + Send
        + Sync,
>;

struct Connection {
    subscription: Subscription,
    launch: Launch,
}

enum Performer {
    Reactor(Reactor),
    Proactor(Proactor),
}

impl Performer {
    fn shutdown(&self) {
        match self {
            Performer::Reactor(reactor) => reactor.shutdown(),
            Performer::Proactor(proactor) => proactor.shutdown(),
        }
    }

    async fn join(self) -> PumpStats {
        match self {
            Performer::Reactor(reactor) => tokio::task::spawn_blocking(move || reactor.join())
                .await
                .unwrap_or_else(|_| PumpStats::runtime_failure()),
            Performer::Proactor(proactor) => proactor.join().await,
        }
    }
}

/// Starts `no_of_performers` pumps per subscription and stops them together.
///
/// ```ignore
/// let mut dispatcher = Dispatcher::new(processor, Arc::new(InMemoryChannelFactory::new(bus)))
///     .subscribe::<PlaceOrder>(Subscription::new("orders", "orders-channel", "orders"))?;
/// dispatcher.start()?;
/// // ...
/// let stats = dispatcher.stop().await;
/// ```
pub struct Dispatcher {
    processor: Arc<CommandProcessor>,
    channel_factory: Arc<dyn ChannelFactory>,
    connections: Vec<Connection>,
    performers: Vec<Performer>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(processor: Arc<CommandProcessor>, channel_factory: Arc<dyn ChannelFactory>) -> Self {
        Self {
            processor,
            channel_factory,
            connections: Vec::new(),
            performers: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Bind `R` to a subscription. Fails on an invalid subscription or a missing mapper.
    pub fn subscribe<R: Request>(mut self, subscription: Subscription) -> Result<Self, HandlerError> {
        let subscription = subscription.for_request::<R>();
        subscription.validate()?;
        if !self.processor.mappers().contains::<R>() {
            return Err(HandlerError::configuration(format!(
                "subscription '{}': no message mapper for {}",
                subscription.name,
                std::any::type_name::<R>()
            )));
        }

        let launch: Launch = Box::new(
            |processor: Arc<CommandProcessor>,
             channel: Channel,
             subscription: &Subscription,
             cancel: CancellationToken| {
                let pump = MessagePump::<R>::new(processor, Arc::new(channel), subscription.clone())?
                    .with_cancellation(cancel);
                Ok(match subscription.message_pump_type {
                    MessagePumpType::Reactor => Performer::Reactor(Reactor::spawn(pump)),
                    MessagePumpType::Proactor => Performer::Proactor(Proactor::spawn(pump)),
                })
            },
        );
        self.connections.push(Connection {
            subscription,
            launch,
        });
        Ok(self)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.connections.iter().map(|c| &c.subscription)
    }

    /// Number of running pumps.
    pub fn performers(&self) -> usize {
        self.performers.len()
    }

    pub fn is_running(&self) -> bool {
        !self.performers.is_empty()
    }

    /// Create channels and start every pump. Must be called inside a tokio runtime.
    pub fn start(&mut self) -> Result<(), HandlerError> {
        if self.is_running() {
            return Ok(());
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(HandlerError::configuration(
                "dispatcher must be started inside a tokio runtime",
            ));
        }

        for connection in &self.connections {
            let subscription = &connection.subscription;
            for _ in 0..subscription.no_of_performers {
                let started = self
                    .channel_factory
                    .create_channel(subscription)
                    .map_err(HandlerError::from)
                    .and_then(|channel| {
                        (connection.launch)(
                            Arc::clone(&self.processor),
                            channel,
                            subscription,
                            self.cancel.child_token(),
                        )
                    });
                match started {
                    Ok(performer) => self.performers.push(performer),
                    Err(err) => {
                        self.cancel.cancel();
                        for performer in self.performers.drain(..) {
                            performer.shutdown();
                        }
                        self.cancel = CancellationToken::new();
                        return Err(err);
                    }
                }
            }
            info!(
                subscription = %subscription.name,
                performers = subscription.no_of_performers,
                pump = ?subscription.message_pump_type,
                "subscription started"
            );
        }
        Ok(())
    }

    /// Send every pump a quit message and wait for all of them.
    pub async fn stop(&mut self) -> Vec<PumpStats> {
        let performers: Vec<Performer> = self.performers.drain(..).collect();
        for performer in &performers {
            performer.shutdown();
        }

        let mut stats = Vec::with_capacity(performers.len());
        for performer in performers {
            stats.push(performer.join().await);
        }
        info!(pumps = stats.len(), "dispatcher stopped");
        stats
    }

    /// Cancel every pump without waiting for queued quit messages.
    pub fn signal_stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
