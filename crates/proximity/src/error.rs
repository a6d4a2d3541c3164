use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProximityError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Storage operation failed: {0}")]
    StorageFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ProximityError>;

impl From<shared::Error> for ProximityError {
    fn from(err: shared::Error) -> Self {
        ProximityError::StorageFailed(err.to_string())
    }
}

impl From<serde_json::Error> for ProximityError {
    fn from(err: serde_json::Error) -> Self {
        ProximityError::SerializationError(err.to_string())
    }
}
