//! Serialization adapters between typed values and cached bytes.
//!
//! The cache itself only stores opaque bytes. Callers that want typed
//! values pick a [`Codec`]: [`RawCodec`] passes payloads through unchanged
//! (images, API responses) and [`JsonCodec`] handles structured data.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Value could not be serialized
    #[error("Failed to encode value: {0}")]
    Encode(String),

    /// Cached bytes could not be interpreted as the expected type
    #[error("Failed to decode cached bytes: {0}")]
    Decode(String),
}

/// Encodes values to bytes and back.
pub trait Codec: Send + Sync {
    /// Typed value handled by this codec.
    type Value: Send + 'static;

    /// Serialize a value into a cache payload.
    fn encode(&self, value: &Self::Value) -> Result<Bytes, CodecError>;

    /// Interpret a cache payload as a value.
    fn decode(&self, bytes: &Bytes) -> Result<Self::Value, CodecError>;
}

/// Pass-through codec for raw payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Value = Bytes;

    fn encode(&self, value: &Bytes) -> Result<Bytes, CodecError> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &Bytes) -> Result<Bytes, CodecError> {
        Ok(bytes.clone())
    }
}

/// JSON codec for any serde type.
///
/// # Example
///
/// ```
/// use artcache::cache::{Codec, JsonCodec};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct Movie { title: String }
///
/// let codec = JsonCodec::<Movie>::new();
/// let bytes = codec.encode(&Movie { title: "Face/Off".into() }).unwrap();
/// assert_eq!(&bytes[..], br#"{"title":"Face/Off"}"#);
/// assert_eq!(codec.decode(&bytes).unwrap().title, "Face/Off");
/// ```
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Create a JSON codec.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Value = T;

    fn encode(&self, value: &T) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &Bytes) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
