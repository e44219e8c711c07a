//! Message mappers - translate typed requests to and from wire messages.
//!
//! The command processor maps outgoing requests before they reach the
//! outbox; the message pump maps incoming messages back into requests.
//! Header fields the pump relies on (id, topic, type, correlation id,
//! partition key) must survive a round trip.

mod binary;
mod json;
mod publication;
mod registry;

use crate::error::HandlerError;
use crate::message::Message;

pub use binary::BitcodeMessageMapper;
pub use json::JsonMessageMapper;
pub use publication::Publication;
pub use registry::MessageMapperRegistry;

/// Bidirectional mapping between a request type and its wire message.
pub trait MessageMapper<R>: Send + Sync {
    fn map_to_message(&self, request: &R, publication: &Publication) -> Result<Message, HandlerError>;

    fn map_to_request(&self, message: &Message) -> Result<R, HandlerError>;
}
