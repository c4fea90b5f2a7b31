//! Pluggable value codecs for message payloads.
//!
//! The consumer engine and the producer are generic over these two
//! single-method capabilities; no codec is hardwired into either loop.

use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Converts a typed value into its wire representation.
pub trait Serializer<T>: Send + Sync {
    fn serialize(&self, value: &T) -> Result<String>;
}

/// Converts a wire payload back into a typed value.
pub trait Deserializer<T>: Send + Sync {
    fn deserialize(&self, raw: &str) -> Result<T>;
}

/// JSON codec for any serde-compatible type.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T: Serialize> Serializer<T> for JsonCodec {
    fn serialize(&self, value: &T) -> Result<String> {
        serde_json::to_string(value).map_err(Into::into)
    }
}

impl<T: DeserializeOwned> Deserializer<T> for JsonCodec {
    fn deserialize(&self, raw: &str) -> Result<T> {
        serde_json::from_str(raw).map_err(Into::into)
    }
}

/// Pass-through codec for producers and consumers that work with raw
/// string payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Serializer<String> for RawCodec {
    fn serialize(&self, value: &String) -> Result<String> {
        Ok(value.clone())
    }
}

impl Deserializer<String> for RawCodec {
    fn deserialize(&self, raw: &str) -> Result<String> {
        Ok(raw.to_string())
    }
}
