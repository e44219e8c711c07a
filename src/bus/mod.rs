//! Transport gateway - producers, consumers and channels.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ ProducerRegistry (topic → Producer)                          │
//! │   send / send_with_delay / send_batch                        │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼  broker / InternalBus
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Channel (one per pump performer)                             │
//! │   local buffer ─▶ Consumer: receive / ack / reject / requeue │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concrete broker clients live outside this crate. [`InternalBus`] is the
//! in-process transport used by tests and single-process hosts.

mod channel;
#[cfg(feature = "emitter")]
mod emitter;
mod internal;
mod producer;

pub use channel::{Channel, ChannelError, ChannelFactory, Consumer};
#[cfg(feature = "emitter")]
pub use emitter::LocalEmitterProducer;
pub use internal::{
    InMemoryChannelFactory, InMemoryConsumer, InMemoryProducer, InternalBus, RedrivePolicy,
};
pub use producer::{Producer, ProducerError, ProducerRegistry};
