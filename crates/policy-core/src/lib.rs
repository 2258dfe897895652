//! # Policy Core
//!
//! Shared value types for managing policy bundles as OCI artifacts.
//!
//! This crate provides the foundational data structures used by the store,
//! registry and CLI crates:
//!
//! - [`Reference`] and [`canonicalize`] - Docker-style artifact names
//! - [`Digest`] - algorithm-prefixed content hashes
//! - [`Descriptor`] and [`Manifest`] - OCI content descriptors
//! - [`MediaType`] - media types recognised during transfers
//!
//! ## Example
//!
//! ```rust
//! use policy_core::canonicalize;
//!
//! let reference = canonicalize("acme/peoplefinder", "opcr.io").unwrap();
//! assert_eq!(reference, "opcr.io/acme/peoplefinder:latest");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod digest;
pub mod error;
pub mod oci;
pub mod reference;


pub use digest::{Digest, Hasher};
pub use error::{Error, Result};
pub use oci::{annotations, Descriptor, Manifest, MediaType};
pub use reference::{canonicalize, Reference, DEFAULT_TAG, PLACEHOLDER_DOMAIN};
