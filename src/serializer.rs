//! Pluggable message serialization: a trait over an opaque string body so
//! a consumer can swap in a different wire format per bin.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SerializationError;

pub trait Serializer<M>: Send + Sync {
    fn serialize(&self, message: &M) -> Result<String, SerializationError>;
    fn deserialize(&self, raw: &str) -> Result<M, SerializationError>;
}

/// Default JSON-over-`serde` serializer. Generic over `M` so one instance
/// can be shared across subscriptions for different payload types.
pub struct JsonSerializer<M> {
    _marker: PhantomData<fn() -> M>,
}

impl<M> JsonSerializer<M> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<M> Default for JsonSerializer<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Serializer<M> for JsonSerializer<M>
where
    M: Serialize + DeserializeOwned + Send + Sync,
{
    fn serialize(&self, message: &M) -> Result<String, SerializationError> {
        serde_json::to_string(message).map_err(|e| SerializationError(e.to_string()))
    }

    fn deserialize(&self, raw: &str) -> Result<M, SerializationError> {
        serde_json::from_str(raw).map_err(|e| SerializationError(e.to_string()))
    }
}
