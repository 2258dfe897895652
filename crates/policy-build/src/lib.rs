//! # Policy Build
//!
//! Turns Rego sources into an OPA bundle tarball ready to be ingested by the
//! local store.
//!
//! ```rust,no_run
//! use std::path::{Path, PathBuf};
//! use policy_build::{build, BuildOptions};
//!
//! build(Path::new("bundle.tar.gz"), &[PathBuf::from("policies")], &BuildOptions::default())?;
//! # Ok::<(), policy_build::BuildError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod bundler;
mod error;

pub use bundler::{build, BuildOptions, BuildSummary, BundleManifest, MANIFEST_ENTRY};
pub use error::{BuildError, Result};
