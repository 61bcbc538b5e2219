//! CBOR and JSON encoding for protocol payloads.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{de::DeserializeOwned, Serialize};

/// Encodes a payload as CBOR.
pub fn to_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| ProtocolError::encoding(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a payload from CBOR.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::decoding(e.to_string()))
}

/// Encodes a payload as pretty-printed JSON.
pub fn to_json<T: Serialize>(value: &T) -> ProtocolResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| ProtocolError::encoding(e.to_string()))
}

/// Decodes a payload from JSON.
pub fn from_json<T: DeserializeOwned>(text: &str) -> ProtocolResult<T> {
    serde_json::from_str(text).map_err(|e| ProtocolError::decoding(e.to_string()))
}
