use super::header::MessageType;
use super::id::Id;

/// Whether a request expects one handler or fans out to many.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Exactly one handler.
    Command,
    /// Zero or more handlers.
    Event,
}

impl RequestKind {
    pub fn message_type(self) -> MessageType {
        match self {
            RequestKind::Command => MessageType::Command,
            RequestKind::Event => MessageType::Event,
        }
    }
}

/// A typed unit of work submitted to the command processor.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct PlaceOrder { id: Id, sku: String }
///
/// impl Request for PlaceOrder {
///     fn id(&self) -> &Id { &self.id }
/// }
/// ```
pub trait Request: Send + Sync + 'static {
    fn id(&self) -> &Id;

    fn kind(&self) -> RequestKind {
        RequestKind::Command
    }
}
