//! Error types for bundle builds.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Errors that can occur while building a bundle.
#[derive(Error, Debug)]
pub enum BuildError {
    /// Failed to read a source or write the output.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A Rego module failed to parse.
    #[error("Rego parse error in {file} at line {line}: {message}")]
    ParseError {
        /// Module being parsed.
        file: String,
        /// Line number of the error.
        line: usize,
        /// Error message.
        message: String,
    },

    /// A Rego module has no package declaration.
    #[error("Missing package declaration in {file}")]
    MissingPackage {
        /// Module missing the package.
        file: String,
    },

    /// A data document is not valid JSON or YAML.
    #[error("Invalid data document {path}: {reason}")]
    InvalidData {
        /// Path to the document.
        path: PathBuf,
        /// Parse failure.
        reason: String,
    },

    /// None of the source paths contained a Rego module.
    #[error("No policy modules found in {paths}")]
    NoModules {
        /// The searched paths, comma separated.
        paths: String,
    },

    /// Writing the archive failed.
    #[error("Bundle archive error: {message}")]
    Archive {
        /// Error message.
        message: String,
    },
}

impl BuildError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = BuildError::ParseError {
            file: "authz.rego".to_string(),
            line: 3,
            message: "unexpected token".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Rego parse error in authz.rego at line 3: unexpected token"
        );
    }

    #[test]
    fn test_io_error_names_path() {
        let err = BuildError::io(Path::new("/src/policy.rego"))(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        assert!(err.to_string().contains("/src/policy.rego"));
    }
}
