use bridge_traits::error::BridgeError;
use provider_rest::RestError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Batch of {size} records exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Record is missing required field '{0}'")]
    MissingField(String),

    #[error("Invalid sync target document: {0}")]
    InvalidTarget(String),

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Local store error: {0}")]
    Store(#[from] BridgeError),

    #[error("Remote call failed: {0}")]
    Rest(#[from] RestError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
