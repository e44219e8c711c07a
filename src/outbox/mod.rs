//! Transactional outbox - durable staging of outgoing messages.
//!
//! ## Lifecycle
//!
//! ```text
//! deposit ──▶ UnitOfWork (staged) ──commit──▶ Outbox (outstanding)
//!                                                │ clear
//!                                                ▼
//!            ProducerRegistry.send ──ok──▶ mark_dispatched ──▶ archive / delete
//!                   │ failure
//!                   └──▶ trip topic (skipped until cooled down), stays outstanding
//! ```
//!
//! Delivery is at-least-once: a message is only marked dispatched after its
//! producer accepted it, and a failed send is never dropped.

mod archiver;
mod circuit_breaker;
mod error;
mod in_memory;
mod mediator;
mod store;
mod sweeper;

pub use archiver::{ArchiveProvider, InMemoryArchiveProvider, OutboxArchiver};
pub use circuit_breaker::{InMemoryOutboxCircuitBreaker, OutboxCircuitBreaker};
pub use error::OutboxError;
pub use in_memory::InMemoryOutbox;
pub use mediator::{ClearResult, OutboxProducerMediator};
pub use store::{Outbox, OutboxEntry, OutstandingQuery, UnitOfWork};
pub use sweeper::{OutboxSweeper, SweeperHandle, SweeperStats};
