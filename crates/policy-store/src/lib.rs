//! # Policy Store
//!
//! Local content-addressable storage for policy bundles.
//!
//! Blobs are kept under their digest and never rewritten; a persisted tag
//! index maps human references to descriptors. The assembler converts a raw
//! bundle tarball into the manifest + config + layer shape registries expect.
//!
//! ## Example
//!
//! ```rust,no_run
//! use policy_core::MediaType;
//! use policy_store::Store;
//!
//! let mut store = Store::open("/tmp/policies-root")?;
//! let desc = store.put(MediaType::layer(), &b"bundle"[..], None)?;
//! store.tag("opcr.io/acme/policy:1.0.0", desc)?;
//! store.save()?;
//! # Ok::<(), policy_store::StoreError>(())
//! ```
//!
//! ## Layout
//!
//! ```text
//! <root>/
//! ├── oci-layout
//! ├── index.json
//! ├── blobs/sha256/<hex>
//! └── ingest/
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod assembler;
mod error;
pub mod index;
mod memory;
mod source;
mod store;

pub use assembler::{ensure_image, split_manifest, synthesize_manifest, SynthesizedImage};
pub use error::{Result, StoreError};
pub use index::TagIndex;
pub use memory::MemoryStore;
pub use source::{ContentSource, Overlay};
pub use store::Store;
