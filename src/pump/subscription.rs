use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HandlerError;
use crate::message::{Request, RoutingKey};

/// Where a pump's loop runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePumpType {
    /// A dedicated thread blocking on receive and on handlers.
    Reactor,
    /// A task on the caller's tokio runtime.
    #[default]
    Proactor,
}

/// What to do when the channel a subscription names does not exist.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnMissingChannel {
    #[default]
    Create,
    /// Fail if it does not exist.
    Validate,
    /// Do not check.
    Assume,
}

/// Binds a request type to a channel and configures its pumps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub name: String,
    pub channel_name: String,
    pub routing_key: RoutingKey,
    /// Set by the dispatcher when the subscription is registered.
    #[serde(default)]
    pub request_type: Option<String>,
    #[serde(default = "defaults::one")]
    pub no_of_performers: usize,
    #[serde(default = "defaults::one")]
    pub buffer_size: usize,
    #[serde(with = "millis", default = "defaults::timeout")]
    pub timeout: Duration,
    /// -1 means unlimited.
    #[serde(default = "defaults::unlimited")]
    pub requeue_count: i32,
    #[serde(with = "millis", default)]
    pub requeue_delay: Duration,
    /// 0 means no limit.
    #[serde(default)]
    pub unacceptable_message_limit: u32,
    #[serde(with = "millis", default = "defaults::empty_channel_delay")]
    pub empty_channel_delay: Duration,
    #[serde(with = "millis", default = "defaults::channel_failure_delay")]
    pub channel_failure_delay: Duration,
    #[serde(default)]
    pub message_pump_type: MessagePumpType,
    #[serde(default)]
    pub make_channels: OnMissingChannel,
}

impl Subscription {
    pub const MAX_BUFFER_SIZE: usize = 10;

    pub fn new(
        name: impl Into<String>,
        channel_name: impl Into<String>,
        routing_key: impl Into<RoutingKey>,
    ) -> Self {
        Self {
            name: name.into(),
            channel_name: channel_name.into(),
            routing_key: routing_key.into(),
            request_type: None,
            no_of_performers: 1,
            buffer_size: 1,
            timeout: defaults::timeout(),
            requeue_count: -1,
            requeue_delay: Duration::ZERO,
            unacceptable_message_limit: 0,
            empty_channel_delay: defaults::empty_channel_delay(),
            channel_failure_delay: defaults::channel_failure_delay(),
            message_pump_type: MessagePumpType::default(),
            make_channels: OnMissingChannel::default(),
        }
    }

    pub fn for_request<R: Request>(mut self) -> Self {
        self.request_type = Some(std::any::type_name::<R>().to_string());
        self
    }

    pub fn with_no_of_performers(mut self, performers: usize) -> Self {
        self.no_of_performers = performers;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `-1` requeues without limit.
    pub fn with_requeue_count(mut self, count: i32) -> Self {
        self.requeue_count = count;
        self
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    pub fn with_unacceptable_message_limit(mut self, limit: u32) -> Self {
        self.unacceptable_message_limit = limit;
        self
    }

    pub fn with_empty_channel_delay(mut self, delay: Duration) -> Self {
        self.empty_channel_delay = delay;
        self
    }

    pub fn with_channel_failure_delay(mut self, delay: Duration) -> Self {
        self.channel_failure_delay = delay;
        self
    }

    pub fn with_message_pump_type(mut self, pump_type: MessagePumpType) -> Self {
        self.message_pump_type = pump_type;
        self
    }

    pub fn with_make_channels(mut self, make_channels: OnMissingChannel) -> Self {
        self.make_channels = make_channels;
        self
    }

    /// Whether a message handled `handled_count` times may be requeued again.
    pub fn allows_requeue(&self, handled_count: u32) -> bool {
        match u32::try_from(self.requeue_count) {
            Ok(limit) => handled_count <= limit,
            Err(_) => true,
        }
    }

    /// Missing or out of range fields are configuration errors.
    pub fn validate(&self) -> Result<(), HandlerError> {
        let fail = |reason: &str| {
            Err(HandlerError::configuration(format!(
                "subscription '{}': {reason}",
                self.name
            )))
        };
        if self.name.trim().is_empty() {
            return fail("name is required");
        }
        if self.channel_name.trim().is_empty() {
            return fail("channel name is required");
        }
        if self.routing_key.is_empty() {
            return fail("routing key is required");
        }
        if self.no_of_performers == 0 {
            return fail("needs at least one performer");
        }
        if self.buffer_size == 0 || self.buffer_size > Self::MAX_BUFFER_SIZE {
            return fail("buffer size must be between 1 and 10");
        }
        if self.requeue_count < -1 {
            return fail("requeue count must be -1 or more");
        }
        Ok(())
    }
}

mod defaults {
    use std::time::Duration;

    pub fn one() -> usize {
        1
    }

    pub fn unlimited() -> i32 {
        -1
    }

    pub fn timeout() -> Duration {
        Duration::from_millis(300)
    }

    pub fn empty_channel_delay() -> Duration {
        Duration::from_millis(500)
    }

    pub fn channel_failure_delay() -> Duration {
        Duration::from_millis(1000)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
