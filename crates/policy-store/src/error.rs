//! Error types for local store operations.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while reading or writing the local store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No tag index entry matches the reference.
    #[error("Not found: {reference}")]
    NotFound {
        /// The reference, short digest or description that missed.
        reference: String,
    },

    /// A descriptor points at a blob that is not on disk.
    #[error("Blob {digest} is not present in the local store")]
    BlobNotFound {
        /// Digest of the missing blob.
        digest: String,
    },

    /// The persisted tag index failed structural validation.
    #[error("Store index at {path} is corrupt: {reason}")]
    StoreCorrupt {
        /// Path to the index document.
        path: PathBuf,
        /// What failed validation.
        reason: String,
    },

    /// A manifest blob does not parse as a manifest.
    #[error("Invalid manifest {digest}: {reason}")]
    InvalidManifest {
        /// Digest of the manifest blob.
        digest: String,
        /// Parse failure.
        reason: String,
    },

    /// A reference cannot be used as a tag index key.
    #[error("Invalid reference '{reference}'")]
    InvalidReference {
        /// The rejected reference.
        reference: String,
    },

    /// Content does not hash to the digest it was stored or announced under.
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Announced digest.
        expected: String,
        /// Recomputed digest.
        actual: String,
    },

    /// Content length differs from the announced size.
    #[error("Size mismatch for {digest}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Digest of the content.
        digest: String,
        /// Announced size.
        expected: u64,
        /// Bytes actually read.
        actual: u64,
    },

    /// File I/O error.
    #[error("File I/O error at {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Core value error.
    #[error(transparent)]
    Core(#[from] policy_core::Error),
}

impl StoreError {
    /// Builds a closure that wraps an I/O error with the path it concerns.
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns true for local lookup misses.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::BlobNotFound { .. })
    }
}
