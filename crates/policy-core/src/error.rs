//! Error types for reference and digest handling.

use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing core values.
#[derive(Error, Debug)]
pub enum Error {
    /// A user-supplied artifact reference is malformed.
    #[error("Invalid reference '{reference}': {reason}")]
    InvalidReference {
        /// The offending input.
        reference: String,
        /// Why the input was rejected.
        reason: String,
    },

    /// A digest string is malformed.
    #[error("Invalid digest '{digest}': {reason}")]
    InvalidDigest {
        /// The offending input.
        digest: String,
        /// Why the input was rejected.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid_reference(reference: &str, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_digest(digest: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDigest {
            digest: digest.to_string(),
            reason: reason.into(),
        }
    }
}
