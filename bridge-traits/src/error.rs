use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(u64),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
