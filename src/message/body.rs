use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

/// Opaque message payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    bytes: Vec<u8>,
}

impl MessageBody {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(text.into().into_bytes())
    }

    /// Create a body with a bitcode-serialized payload.
    pub fn encode<T: Serialize>(payload: &T) -> Result<Self, bitcode::Error> {
        Ok(Self::new(bitcode::serialize(payload)?))
    }

    /// Decode a bitcode payload.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
        bitcode::deserialize(&self.bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The payload as a string, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    /// Text rendering for logs and text-only transports; binary payloads are base64 encoded.
    pub fn to_text_lossless(&self) -> String {
        match self.as_str() {
            Some(text) => text.to_string(),
            None => STANDARD.encode(&self.bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&str> for MessageBody {
    fn from(value: &str) -> Self {
        Self::from_text(value)
    }
}

impl From<Vec<u8>> for MessageBody {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}
