use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::HandlerError;
use crate::message::{Message, MessageHeader, MessageType, Request};

use super::{MessageMapper, Publication};

/// Maps any serde request to a JSON body.
///
/// Message id and type come from the request; topic, content type and
/// reply-to come from the publication.
pub struct JsonMessageMapper<R> {
    _request: PhantomData<fn() -> R>,
}

impl<R> JsonMessageMapper<R> {
    pub fn new() -> Self {
        Self {
            _request: PhantomData,
        }
    }
}

impl<R> Default for JsonMessageMapper<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> MessageMapper<R> for JsonMessageMapper<R>
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
        .with_content_type(publication.content_type.clone());
        if let Some(reply_to) = &publication.reply_to {
            header = header.with_reply_to(reply_to.clone());
        }
        let body = serde_json::to_vec(request)?;
        Ok(Message::new(header, body))
    }

    fn map_to_request(&self, message: &Message) -> Result<R, HandlerError> {
        if message.message_type() == MessageType::Unacceptable {
            return Err(HandlerError::Mapping(format!(
                "message {} is unacceptable",
                message.id()
            )));
        }
        Ok(serde_json::from_slice(message.body.bytes())?)
    }
}
