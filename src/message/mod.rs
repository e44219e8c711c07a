//! Message model - the typed requests callers submit and their wire envelope.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   map_to_message    ┌──────────────────────────┐
//! │ Request (Command /   │ ──────────────────▶ │ Message                  │
//! │ Event)               │                     │  - MessageHeader         │
//! │  - id()              │ ◀────────────────── │  - MessageBody           │
//! └──────────────────────┘   map_to_request    └──────────────────────────┘
//! ```
//!
//! A `RequestContext` travels alongside the request through one dispatch.

mod body;
mod context;
mod header;
mod id;
mod message;
mod request;

pub use body::MessageBody;
pub use context::{InMemoryRequestContextFactory, RequestContext, RequestContextFactory};
pub use header::{MessageHeader, MessageType};
pub use id::{Id, RoutingKey};
pub use message::Message;
pub use request::{Request, RequestKind};
