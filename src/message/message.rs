use serde::{Deserialize, Serialize};

use super::body::MessageBody;
use super::header::{MessageHeader, MessageType};
use super::id::{Id, RoutingKey};

/// Wire-level envelope: header plus opaque body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub header: MessageHeader,
    pub body: MessageBody,
}

impl Message {
    pub const ORIGINAL_MESSAGE_ID: &'static str = "original_message_id";

    pub fn new(header: MessageHeader, body: impl Into<MessageBody>) -> Self {
        Self {
            header,
            body: body.into(),
        }
    }

    /// The "nothing received" sentinel.
    pub fn none() -> Self {
        Self::new(
            MessageHeader::new(Id::random(), RoutingKey::default(), MessageType::None),
            MessageBody::default(),
        )
    }

    /// The quit sentinel that stops a pump.
    pub fn quit(topic: impl Into<RoutingKey>) -> Self {
        Self::new(
            MessageHeader::new(Id::random(), topic, MessageType::Quit),
            MessageBody::default(),
        )
    }

    /// Wrap a payload the transport failed to parse.
    pub fn unacceptable(id: Id, topic: impl Into<RoutingKey>, body: impl Into<MessageBody>) -> Self {
        Self::new(MessageHeader::new(id, topic, MessageType::Unacceptable), body)
    }

    pub fn id(&self) -> &Id {
        &self.header.message_id
    }

    pub fn topic(&self) -> &RoutingKey {
        &self.header.topic
    }

    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    pub fn is_empty(&self) -> bool {
        self.header.message_type == MessageType::None
    }
}
