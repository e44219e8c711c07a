use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::HandlerError;
use crate::message::Request;

use super::{BitcodeMessageMapper, JsonMessageMapper, MessageMapper};

/// Message mappers keyed by request type.
#[derive(Default)]
pub struct MessageMapperRegistry {
    mappers: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MessageMapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<R: Request>(mut self, mapper: impl MessageMapper<R> + 'static) -> Self {
        self.add(Arc::new(mapper));
        self
    }

    pub fn register_json<R>(self) -> Self
    where
        R: Request + Serialize + DeserializeOwned,
    {
        self.register::<R>(JsonMessageMapper::<R>::new())
    }

    pub fn register_bitcode<R>(self) -> Self
    where
        R: Request + Serialize + DeserializeOwned,
    {
        self.register::<R>(BitcodeMessageMapper::<R>::new())
    }

    pub fn add<R: Request>(&mut self, mapper: Arc<dyn MessageMapper<R>>) {
        self.mappers.insert(TypeId::of::<R>(), Box::new(mapper));
    }

    pub fn get<R: Request>(&self) -> Option<Arc<dyn MessageMapper<R>>> {
        self.mappers
            .get(&TypeId::of::<R>())
            .and_then(|slot| slot.downcast_ref::<Arc<dyn MessageMapper<R>>>())
            .cloned()
    }

    /// Like `get`, but a missing mapper is a configuration error.
    pub fn require<R: Request>(&self) -> Result<Arc<dyn MessageMapper<R>>, HandlerError> {
        self.get::<R>().ok_or_else(|| {
            HandlerError::configuration(format!(
                "no message mapper registered for {}",
                std::any::type_name::<R>()
            ))
        })
    }

    pub fn contains<R: Request>(&self) -> bool {
        self.mappers.contains_key(&TypeId::of::<R>())
    }
}
