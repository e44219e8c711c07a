use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::HandlerError;
use crate::message::{Message, MessageBody, MessageHeader, MessageType, Request};

use super::{MessageMapper, Publication};

/// Maps any serde request to a compact bitcode body.
///
/// The content type is always `application/octet-stream`; everything else
/// follows [`JsonMessageMapper`](super::JsonMessageMapper).
pub struct BitcodeMessageMapper<R> {
    _request: PhantomData<fn() -> R>,
}

impl<R> BitcodeMessageMapper<R> {
    pub fn new() -> Self {
        Self {
            _request: PhantomData,
        }
    }
}

impl<R> Default for BitcodeMessageMapper<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> MessageMapper<R> for BitcodeMessageMapper<R>
where
    R: Request + Serialize + DeserializeOwned,
{
    fn map_to_message(&self, request: &R, publication: &Publication) -> Result<Message, HandlerError> {
        if publication.topic.is_empty() {
            return Err(HandlerError::configuration(format!(
                "publication for {} has no topic",
                std::any::type_name::<R>()
            )));
        }
        let mut header = MessageHeader::new(
            request.id().clone(),
            publication.topic.clone(),
            request.kind().message_type(),
        )
        .with_content_type(MessageHeader::CONTENT_TYPE_BINARY);
        if let Some(reply_to) = &publication.reply_to {
            header = header.with_reply_to(reply_to.clone());
        }
        Ok(Message::new(header, MessageBody::encode(request)?))
    }

    fn map_to_request(&self, message: &Message) -> Result<R, HandlerError> {
        if message.message_type() == MessageType::Unacceptable {
            return Err(HandlerError::Mapping(format!(
                "message {} is unacceptable",
                message.id()
            )));
        }
        Ok(message.body.decode()?)
    }
}
