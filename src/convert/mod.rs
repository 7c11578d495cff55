//! Value ↔ byte conversion at the storage boundary
//!
//! A [`Converter`] sits between the object pool and the byte-level storage
//! engine: values are encoded exactly once on their way into the chunks and
//! decoded on cache misses. Cache hits never touch the converter.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Pluggable object↔bytes codec.
///
/// Failures are surfaced as `Error::Encoding` / `Error::Decoding` and never
/// swallowed: an undecodable record indicates a real data problem.
pub trait Converter<V>: Send + Sync {
    /// Encode a value into a fresh byte vector.
    fn encode(&self, value: &V) -> Result<Vec<u8>>;

    /// Decode a value from stored bytes.
    fn decode(&self, bytes: &[u8]) -> Result<V>;
}

/// General-purpose converter backed by serde_json.
pub struct JsonConverter<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> JsonConverter<V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for JsonConverter<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Converter<V> for JsonConverter<V>
where
    V: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Encoding(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<V> {
        serde_json::from_slice(bytes).map_err(|e| Error::Decoding(e.to_string()))
    }
}

/// Identity converter for values that already are byte vectors.
pub struct RawConverter;

impl Converter<Vec<u8>> for RawConverter {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_json_roundtrip() {
        let converter = JsonConverter::<Sample>::new();
        let value = Sample {
            name: "chunk".into(),
            count: 42,
        };

        let bytes = converter.encode(&value).unwrap();
        let decoded = converter.decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_json_decode_garbage_is_error() {
        let converter = JsonConverter::<Sample>::new();
        assert_matches!(converter.decode(b"not json"), Err(Error::Decoding(_)));
    }

    #[test]
    fn test_raw_passthrough() {
        let converter = RawConverter;
        let bytes = converter.encode(&vec![1, 2, 3]).unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(converter.decode(&bytes).unwrap(), vec![1, 2, 3]);
    }
}
