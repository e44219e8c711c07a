//! Message pumps - receive, map, dispatch, acknowledge.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Dispatcher: NoOfPerformers pumps per Subscription            │
//! └──────────────────────────────────────────────────────────────┘
//!            │ Reactor (own thread)         │ Proactor (tokio task)
//!            ▼                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │ MessagePump::run                                             │
//! │   receive ─▶ none        ─▶ empty_channel_delay              │
//! │           ─▶ quit        ─▶ stop                             │
//! │           ─▶ unacceptable─▶ ack, count, stop at limit        │
//! │           ─▶ message     ─▶ map ─▶ send/publish              │
//! │                               ok    ─▶ ack                   │
//! │                               error ─▶ requeue / reject      │
//! │   channel failure ─▶ channel_failure_delay                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reactor and Proactor drive the same state machine; they differ only in
//! where it runs.

mod dispatcher;
mod message_pump;
mod proactor;
mod reactor;
mod subscription;

pub use dispatcher::Dispatcher;
pub use message_pump::{MessagePump, PumpExit, PumpStats};
pub use proactor::Proactor;
pub use reactor::Reactor;
pub use subscription::{MessagePumpType, OnMissingChannel, Subscription};
