//! Error types for remote transfers.

use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur while talking to a registry or moving content.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Failed to connect to registry.
    #[error("Failed to connect to registry at {url}: {source}")]
    ConnectionFailed {
        /// Registry URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// Authentication failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Error message.
        message: String,
    },

    /// The reference does not exist, locally or remotely.
    #[error("Not found: {reference}")]
    NotFound {
        /// Reference that missed.
        reference: String,
    },

    /// A manifest body does not parse.
    #[error("Invalid manifest for {reference}: {reason}")]
    InvalidManifest {
        /// Reference being transferred.
        reference: String,
        /// Parse failure.
        reason: String,
    },

    /// Content of a type outside the transfer allow-list was encountered.
    #[error("Media type '{media_type}' is not allowed (transferring {reference})")]
    MediaTypeDenied {
        /// Reference being transferred.
        reference: String,
        /// The rejected media type.
        media_type: String,
    },

    /// Content failed to reach the remote.
    #[error("Failed to push blobs for {reference} during {phase}: {source}")]
    PushBlobFailed {
        /// Reference being pushed.
        reference: String,
        /// Step that failed.
        phase: String,
        /// Underlying error.
        #[source]
        source: Box<RegistryError>,
    },

    /// The remote did not accept the manifest pointer.
    #[error("Failed to push manifest for {reference} during {phase}: {source}")]
    PushManifestFailed {
        /// Reference being pushed.
        reference: String,
        /// Step that failed.
        phase: String,
        /// Underlying error.
        #[source]
        source: Box<RegistryError>,
    },

    /// Content failed to arrive from the remote.
    #[error("Failed to pull {reference} during {phase}: {source}")]
    PullFailed {
        /// Reference being pulled.
        reference: String,
        /// Step that failed.
        phase: String,
        /// Underlying error.
        #[source]
        source: Box<RegistryError>,
    },

    /// HTTP error from registry.
    #[error("HTTP error from registry: {status} - {message}")]
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Response body or error message.
        message: String,
    },

    /// Invalid URL.
    #[error("Invalid URL: {url}")]
    InvalidUrl {
        /// URL string.
        url: String,
    },

    /// Registry API not supported.
    #[error("Registry does not support required API: {feature}")]
    UnsupportedApi {
        /// Feature name.
        feature: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed reference or digest.
    #[error(transparent)]
    InvalidReference(#[from] policy_core::Error),

    /// Local store error.
    #[error(transparent)]
    Store(#[from] policy_store::StoreError),
}

impl RegistryError {
    /// Returns true if the remote reported that the content is already present.
    ///
    /// Such responses are treated as a successful write.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::HttpError { status, message } => {
                *status == 409 || message.to_ascii_lowercase().contains("already exists")
            }
            Self::PushBlobFailed { source, .. } | Self::PushManifestFailed { source, .. } => {
                source.is_already_exists()
            }
            _ => false,
        }
    }

    /// Returns true for a remote 404.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::HttpError { status: 404, .. })
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::ConnectionFailed {
                url: err
                    .url()
                    .map_or_else(|| "unknown".to_string(), ToString::to_string),
                source: err,
            }
        } else {
            Self::HttpError {
                status: err.status().map_or(0, |s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16, message: &str) -> RegistryError {
        RegistryError::HttpError {
            status,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_already_exists_detection() {
        assert!(http(409, "conflict").is_already_exists());
        assert!(http(400, "blob Already Exists").is_already_exists());
        assert!(!http(500, "internal").is_already_exists());

        let wrapped = RegistryError::PushBlobFailed {
            reference: "opcr.io/a:1".to_string(),
            phase: "blobs".to_string(),
            source: Box::new(http(409, "")),
        };
        assert!(wrapped.is_already_exists());
    }

    #[test]
    fn test_wrapped_error_names_reference_and_phase() {
        let err = RegistryError::PushManifestFailed {
            reference: "opcr.io/acme/policy:1.0".to_string(),
            phase: "manifest".to_string(),
            source: Box::new(http(500, "boom")),
        };
        let message = err.to_string();
        assert!(message.contains("opcr.io/acme/policy:1.0"));
        assert!(message.contains("manifest"));
        assert!(message.contains("500"));
    }

    #[test]
    fn test_invalid_reference_is_transparent() {
        let core = policy_core::Reference::parse("Bad/Name").unwrap_err();
        let expected = core.to_string();
        let err = RegistryError::from(core);
        assert_eq!(err.to_string(), expected);
    }
}
