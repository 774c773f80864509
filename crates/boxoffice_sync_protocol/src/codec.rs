//! CBOR body codec.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a message as a CBOR body.
pub fn encode<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::into_writer(message, &mut body).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(body)
}

/// Decodes a CBOR body.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(body).map_err(|e| ProtocolError::Decode(e.to_string()))
}
