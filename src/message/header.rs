use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use super::id::{Id, RoutingKey};

/// Kind of message carried by a `Message` envelope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Command,
    Event,
    Document,
    /// Sentinel asking a pump to stop.
    Quit,
    /// Sentinel returned by a channel when nothing arrived before the timeout.
    #[default]
    None,
    /// The transport could not parse the message.
    Unacceptable,
}

/// Header of a `Message`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub message_id: Id,
    pub topic: RoutingKey,
    pub message_type: MessageType,
    pub correlation_id: Option<Id>,
    pub reply_to: Option<RoutingKey>,
    pub content_type: String,
    pub partition_key: Option<String>,
    /// Number of failed delivery attempts the pump has observed.
    pub handled_count: u32,
    pub timestamp: SystemTime,
    /// Delay requested when the message is produced.
    #[serde(default)]
    pub delayed: Duration,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub bag: HashMap<String, String>,
}

impl MessageHeader {
    pub const CONTENT_TYPE_JSON: &'static str = "application/json";
    pub const CONTENT_TYPE_BINARY: &'static str = "application/octet-stream";

    pub fn new(message_id: Id, topic: impl Into<RoutingKey>, message_type: MessageType) -> Self {
        Self {
            message_id,
            topic: topic.into(),
            message_type,
            correlation_id: None,
            reply_to: None,
            content_type: Self::CONTENT_TYPE_JSON.to_string(),
            partition_key: None,
            handled_count: 0,
            timestamp: SystemTime::now(),
            delayed: Duration::ZERO,
            bag: HashMap::new(),
        }
    }

    pub fn with_correlation_id(mut self, id: Id) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<RoutingKey>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delayed = delay;
        self
    }

    pub fn with_bag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.bag.insert(key.into(), value.into());
        self
    }

    /// Record one more failed delivery attempt.
    pub fn update_handled_count(&mut self) {
        self.handled_count = self.handled_count.saturating_add(1);
    }

    /// Time elapsed since the header timestamp (zero if the clock went backwards).
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
    }
}
