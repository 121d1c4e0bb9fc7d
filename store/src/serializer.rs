use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Injected into the relational backend so the wire representation of a
/// payload is a configuration choice, not something baked into the engine.
pub trait Serializer<T>: Send + Sync {
    fn serialize(&self, value: &T) -> Result<String>;
    fn deserialize(&self, raw: &str) -> Result<T>;
}

/// Default serializer, used unless a backend is constructed with a
/// different one.
pub struct JsonSerializer<T>(PhantomData<fn() -> T>);

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        JsonSerializer(PhantomData)
    }
}

impl<T> Clone for JsonSerializer<T> {
    fn clone(&self) -> Self {
        JsonSerializer(PhantomData)
    }
}

impl<T: Serialize + DeserializeOwned + Send + Sync> Serializer<T> for JsonSerializer<T> {
    fn serialize(&self, value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize(&self, raw: &str) -> Result<T> {
        Ok(serde_json::from_str(raw)?)
    }
}
