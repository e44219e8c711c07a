use crate::message::Id;

/// Error type for outbox storage operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutboxError {
    #[error("message {0} not found in outbox")]
    NotFound(Id),
    #[error("outbox already holds {0} outstanding messages")]
    LimitReached(usize),
    #[error("message {0} has no topic")]
    MissingTopic(Id),
    #[error("outbox storage error: {0}")]
    Storage(String),
}
