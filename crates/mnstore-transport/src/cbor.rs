//! CBOR serialization helpers over [`ciborium`].

use serde::{de::DeserializeOwned, Serialize};

use crate::TransportError;

/// Serialize a value to CBOR bytes.
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| {
        TransportError::Serialization(format!("CBOR serialization failed: {e}"))
    })?;
    Ok(buf)
}

/// Deserialize a value from CBOR bytes.
pub fn from_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, TransportError> {
    ciborium::from_reader(data).map_err(|e| {
        TransportError::Deserialization(format!("CBOR deserialization failed: {e}"))
    })
}

/// Convert a typed body into a CBOR value.
pub fn to_value<T: Serialize>(value: &T) -> Result<ciborium::Value, TransportError> {
    ciborium::Value::serialized(value)
        .map_err(|e| TransportError::Serialization(format!("CBOR value conversion failed: {e}")))
}

/// Interpret a CBOR value as a typed body.
pub fn from_value<T: DeserializeOwned>(value: &ciborium::Value) -> Result<T, TransportError> {
    value
        .deserialized()
        .map_err(|e| TransportError::Deserialization(format!("unexpected body: {e}")))
}
