//! Client error types.

use thiserror::Error;

/// Errors returned by calls against the ledger service.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The server answered 401; the session is no longer valid.
    #[error("Session expired, please log in again.")]
    Unauthorized,

    /// Any other non-success status.
    #[error("Server rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Transport failure or a body that could not be decoded.
    #[error("Network error: {0}")]
    Network(String),

    /// Input refused before any request was sent.
    #[error("{0}")]
    Validation(String),
}

impl ApiError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Network(format!("invalid response body: {e}"))
    }
}
