//! Errors from the Proxmox VE API.

use thiserror::Error;
use vmlab_harness::ServiceError;

/// Errors from the Proxmox VE API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether the API said the addressed object does not exist.
    ///
    /// Proxmox answers 500 with a "does not exist" message for unknown VMs.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Api { status: 404, .. } => true,
            Self::Api { message, .. } => message.contains("does not exist"),
            _ => false,
        }
    }
}

impl From<ApiError> for ServiceError {
    fn from(err: ApiError) -> Self {
        if err.is_not_found() {
            return ServiceError::NotFound(err.to_string());
        }

        match err {
            ApiError::Http(e) if e.is_decode() => ServiceError::Protocol(e.to_string()),
            ApiError::Http(e) => ServiceError::Unreachable(e.to_string()),
            ApiError::Auth(message) => ServiceError::Rejected {
                status: 401,
                message,
            },
            ApiError::Api { status, message } => ServiceError::Rejected { status, message },
            ApiError::Decode(message) => ServiceError::Protocol(message),
        }
    }
}
