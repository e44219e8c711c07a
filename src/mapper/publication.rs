use serde::{Deserialize, Serialize};

use crate::message::{MessageHeader, Request, RoutingKey};

/// Where and how a request type is published.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub topic: RoutingKey,
    /// Fully qualified request type this publication serves, if bound to one.
    #[serde(default)]
    pub request_type: Option<String>,
    pub content_type: String,
    #[serde(default)]
    pub reply_to: Option<RoutingKey>,
}

impl Publication {
    pub fn new(topic: impl Into<RoutingKey>) -> Self {
        Self {
            topic: topic.into(),
            request_type: None,
            content_type: MessageHeader::CONTENT_TYPE_JSON.to_string(),
            reply_to: None,
        }
    }

    /// A publication bound to request type `R`.
    pub fn for_request<R: Request>(topic: impl Into<RoutingKey>) -> Self {
        Self::new(topic).with_request_type(std::any::type_name::<R>())
    }

    pub fn with_request_type(mut self, request_type: impl Into<String>) -> Self {
        self.request_type = Some(request_type.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<RoutingKey>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}
