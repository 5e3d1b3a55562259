//! Error types for ddnet wire decoding.

use thiserror::Error;

/// Errors raised while encoding or decoding wire payloads.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// CBOR serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] ciborium::ser::Error<std::io::Error>),

    /// CBOR deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] ciborium::de::Error<std::io::Error>),

    /// Payload is shorter than its fixed-size header
    #[error("payload truncated: need at least {needed} bytes, got {actual}")]
    Truncated {
        /// Minimum byte count the format requires.
        needed: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// A fixed-size field had the wrong length
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
}

/// Serialize a value to CBOR bytes.
pub(crate) fn to_cbor<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, DecodeError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(DecodeError::Serialization)?;
    Ok(bytes)
}

/// Deserialize a value from CBOR bytes.
pub(crate) fn from_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    ciborium::from_reader(bytes).map_err(DecodeError::Deserialization)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = DecodeError::Truncated {
            needed: 64,
            actual: 10,
        };
        assert_eq!(
            err.to_string(),
            "payload truncated: need at least 64 bytes, got 10"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DecodeError>();
    }

    #[test]
    fn cbor_roundtrip_helpers() {
        let value: Vec<u32> = vec![1, 2, 3];
        let bytes = to_cbor(&value).unwrap();
        let restored: Vec<u32> = from_cbor(&bytes).unwrap();
        assert_eq!(value, restored);
    }

    #[test]
    fn cbor_rejects_garbage() {
        let result: Result<Vec<u32>, _> = from_cbor(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(DecodeError::Deserialization(_))));
    }
}
