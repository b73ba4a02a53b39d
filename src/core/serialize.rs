/*!
 * Versioned Binary Envelope
 * bincode serialization behind a magic/version header
 *
 * Layout: magic (u32 LE), schema version (u32 LE), bincode body. All
 * integers little-endian, strings length-prefixed. This is the wire
 * format of every persisted descriptor.
 */

use crate::core::limits::SCHEMA_VERSION;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Identifies zerobus-owned binary blobs
const ENVELOPE_MAGIC: u32 = 0x5A42_5553; // "ZBUS"

const HEADER_LEN: usize = 8;

/// Result type for envelope operations
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

/// Failures while encoding or decoding a versioned blob
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("blob is too short to carry an envelope header")]
    TooShort,

    #[error("blob does not carry the expected magic number")]
    BadMagic,

    #[error("schema version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

/// Serialize a value behind the versioned header
pub fn encode<T: Serialize>(value: &T) -> EnvelopeResult<Vec<u8>> {
    let body =
        bincode::serialize(value).map_err(|e| EnvelopeError::Serialization(e.to_string()))?;
    let mut blob = Vec::with_capacity(HEADER_LEN + body.len());
    blob.extend_from_slice(&ENVELOPE_MAGIC.to_le_bytes());
    blob.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    blob.extend_from_slice(&body);
    Ok(blob)
}

/// Deserialize a value, verifying magic and schema version first
pub fn decode<T: DeserializeOwned>(blob: &[u8]) -> EnvelopeResult<T> {
    if blob.len() < HEADER_LEN {
        return Err(EnvelopeError::TooShort);
    }
    let magic = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]);
    if magic != ENVELOPE_MAGIC {
        return Err(EnvelopeError::BadMagic);
    }
    let found = u32::from_le_bytes([blob[4], blob[5], blob[6], blob[7]]);
    if found != SCHEMA_VERSION {
        return Err(EnvelopeError::VersionMismatch {
            expected: SCHEMA_VERSION,
            found,
        });
    }
    bincode::deserialize(&blob[HEADER_LEN..])
        .map_err(|e| EnvelopeError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        cap: u64,
    }

    #[test]
    fn round_trip() {
        let value = Sample {
            name: "svc".into(),
            cap: 42,
        };
        let blob = encode(&value).unwrap();
        let back: Sample = decode(&blob).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn rejects_foreign_version() {
        let value = Sample {
            name: "svc".into(),
            cap: 1,
        };
        let mut blob = encode(&value).unwrap();
        blob[4..8].copy_from_slice(&(SCHEMA_VERSION + 1).to_le_bytes());
        let err = decode::<Sample>(&blob).unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::VersionMismatch {
                expected: SCHEMA_VERSION,
                found: SCHEMA_VERSION + 1
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(decode::<Sample>(&[1, 2]).unwrap_err(), EnvelopeError::TooShort);
        let err = decode::<Sample>(&[0xFF; 16]).unwrap_err();
        assert_eq!(err, EnvelopeError::BadMagic);
    }
}
