//! Error types for the offline transaction lifecycle

use thiserror::Error;

/// Result type for offline transaction operations
pub type OfflineTxResult<T> = Result<T, OfflineTxError>;

/// Errors that can occur while managing offline transactions
#[derive(Error, Debug)]
pub enum OfflineTxError {
    #[error("Invalid transaction transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Retry limit exceeded after {0} attempts")]
    RetryLimitExceeded(u32),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Transactions may not be initiated from zone {0}")]
    ZoneRestricted(String),

    #[error("Transaction {0} has no serialized payload")]
    MissingPayload(String),

    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("Storage operation failed: {0}")]
    StorageFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for OfflineTxError {
    fn from(err: serde_json::Error) -> Self {
        OfflineTxError::SerializationError(err.to_string())
    }
}

impl From<shared::Error> for OfflineTxError {
    fn from(err: shared::Error) -> Self {
        OfflineTxError::StorageFailed(err.to_string())
    }
}
