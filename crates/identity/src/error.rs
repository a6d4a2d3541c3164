//! Error types for identity and packet-crypto operations

use thiserror::Error;

/// Result type for identity operations
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Errors that can occur during identity and crypto operations
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Invalid curve point: {0}")]
    InvalidCurvePoint(String),

    #[error("Cryptographic operation failed: {0}")]
    CryptoError(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Storage operation failed: {0}")]
    StorageFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for IdentityError {
    fn from(err: serde_json::Error) -> Self {
        IdentityError::SerializationError(err.to_string())
    }
}

impl From<shared::Error> for IdentityError {
    fn from(err: shared::Error) -> Self {
        IdentityError::StorageFailed(err.to_string())
    }
}
