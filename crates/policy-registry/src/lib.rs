//! # Policy Registry
//!
//! Moves policy bundles between the local store and OCI registries.
//!
//! ## Features
//!
//! - **Distribution API client**: manifests, blobs, upload sessions, tag listing
//! - **Challenge-response auth**: basic and bearer, token cache per scope
//! - **Transfer coordination**: pull with all-or-nothing tagging, push with
//!   manifest synthesis for bare layers
//! - **Vendor adapters**: extended APIs selected by host pattern
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use policy_registry::{Credentials, HttpResolver, RegistryAuth, RegistryConfig, Transfer};
//! use policy_store::Store;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = Credentials::new().with("opcr.io", RegistryAuth::basic("user", "token"));
//!     let resolver = HttpResolver::new(RegistryConfig::new(), credentials);
//!
//!     let mut store = Store::open("/tmp/policies-root")?;
//!     Transfer::new(&mut store, &resolver)
//!         .push("opcr.io/acme/policy:1.0.0")
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Transfer                        │
//! │   pull / push state machines, relay slot, copy       │
//! └──────────────────────────────────────────────────────┘
//!            │ EndpointResolver          │ Store
//!            ▼                           ▼
//! ┌──────────────────────┐      ┌──────────────────────┐
//! │   RemoteEndpoint     │      │  policy-store (CAS)  │
//! │ HttpEndpoint/Memory  │      └──────────────────────┘
//! └──────────────────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │   RegistryClient     │  Authenticator (401 → token → retry)
//! └──────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapters;
pub mod auth;
mod client;
mod config;
pub mod copy;
mod error;
mod memory;
mod remote;
mod transfer;

pub use adapters::{AdapterRegistry, Distribution, ExtendedApi, HostPattern, Unsupported};
pub use client::RegistryClient;
pub use config::{Credentials, RegistryAuth, RegistryConfig, TlsConfig};
pub use error::{RegistryError, Result};
pub use memory::{MemoryRegistry, MemoryRemote};
pub use remote::{EndpointResolver, HttpEndpoint, HttpResolver, RemoteEndpoint};
pub use transfer::{PullState, PushState, Transfer};
