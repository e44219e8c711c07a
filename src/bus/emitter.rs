use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use event_emitter_rs::EventEmitter;

use crate::mapper::Publication;
use crate::message::Message;

use super::producer::{Producer, ProducerError};

/// Producer that emits each message body to in-process `EventEmitter` listeners.
///
/// Listeners subscribe by topic and receive the body as text; binary bodies
/// arrive base64 encoded.
pub struct LocalEmitterProducer {
    emitter: Mutex<EventEmitter>,
    publication: Publication,
}

impl LocalEmitterProducer {
    pub fn new(emitter: EventEmitter, publication: Publication) -> Self {
        Self {
            emitter: Mutex::new(emitter),
            publication,
        }
    }

    /// Register a listener on this producer's topic.
    pub fn on<F>(&self, listener: F) -> String
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let topic = self.publication.topic.to_string();
        self.lock().on(&topic, listener)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EventEmitter> {
        self.emitter.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Producer for LocalEmitterProducer {
    fn publication(&self) -> &Publication {
        &self.publication
    }

    async fn send(&self, message: Message) -> Result<(), ProducerError> {
        let payload = message.body.to_text_lossless();
        self.lock().emit(message.topic().as_str(), payload);
        Ok(())
    }
}
