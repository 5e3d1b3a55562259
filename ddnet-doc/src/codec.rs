//! Internal CBOR helpers.

use ddnet_types::DecodeError;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(DecodeError::Serialization)?;
    Ok(out)
}

pub(crate) fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    ciborium::from_reader(bytes).map_err(DecodeError::Deserialization)
}
