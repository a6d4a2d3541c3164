//! Error types for mesh packet operations

use thiserror::Error;

/// Result type for mesh packet operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors that can occur while building, parsing, or routing packets
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid packet format: {0}")]
    InvalidPacket(String),

    #[error("Packet signature mismatch")]
    SignatureMismatch,

    #[error("Payload decryption failed: {0}")]
    DecryptFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptFailed(String),

    #[error("Transmission failed: {0}")]
    TransmissionFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::SerializationError(err.to_string())
    }
}
