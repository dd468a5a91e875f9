//! Error types for identifier parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The input string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The VM id is not a decimal integer.
    #[error("invalid VM id '{0}': not an integer")]
    NotNumeric(String),

    /// The VM id is outside the range Proxmox accepts.
    #[error("VM id {value} out of range ({min}..={max})")]
    OutOfRange { value: u64, min: u32, max: u32 },

    /// The task handle does not start with `UPID:`.
    #[error("task handle missing 'UPID:' prefix: '{0}'")]
    MissingPrefix(String),

    /// The task handle has the wrong shape.
    #[error("invalid task handle: {message}")]
    InvalidUpid { message: String },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    /// Returns true if this error came from task handle parsing.
    pub fn is_upid_error(&self) -> bool {
        matches!(self, IdError::MissingPrefix(_) | IdError::InvalidUpid { .. })
    }
}
