//! Error types for the REST provider

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestError {
    /// Whole call answered with a non-success status
    #[error("REST API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Body did not match the expected wire shape
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Request could not be assembled
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    BridgeError(#[from] bridge_traits::error::BridgeError),
}

pub type Result<T> = std::result::Result<T, RestError>;

impl RestError {
    /// HTTP status when the server answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RestError::ApiError { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RestError {
    fn from(error: serde_json::Error) -> Self {
        RestError::ParseError(error.to_string())
    }
}
