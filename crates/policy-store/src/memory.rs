//! Transient, memory-backed store.
//!
//! Used to stage synthesized manifests and configs for a single push without
//! touching the on-disk store.

use std::collections::{BTreeMap, HashMap};

use policy_core::{Descriptor, Digest, MediaType};

use crate::error::{Result, StoreError};
use crate::source::ContentSource;

/// Content and tags held only for the lifetime of the value.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    blobs: HashMap<Digest, Vec<u8>>,
    tags: BTreeMap<String, Descriptor>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `bytes` and returns their descriptor.
    pub fn push(&mut self, media_type: MediaType, bytes: Vec<u8>) -> Descriptor {
        let descriptor = Descriptor::for_content(media_type, &bytes);
        self.blobs.entry(descriptor.digest.clone()).or_insert(bytes);
        descriptor
    }

    /// Stores `bytes` under an existing descriptor after checking the digest.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DigestMismatch`] if the bytes hash differently.
    pub fn push_verified(&mut self, descriptor: &Descriptor, bytes: Vec<u8>) -> Result<()> {
        let actual = Digest::sha256(&bytes);
        if actual != descriptor.digest {
            return Err(StoreError::DigestMismatch {
                expected: descriptor.digest.to_string(),
                actual: actual.to_string(),
            });
        }
        self.blobs.entry(actual).or_insert(bytes);
        Ok(())
    }

    /// Points `reference` at `descriptor`.
    pub fn tag(&mut self, reference: impl Into<String>, descriptor: Descriptor) {
        self.tags.insert(reference.into(), descriptor);
    }

    /// Exact-match tag lookup.
    #[must_use]
    pub fn resolve(&self, reference: &str) -> Option<&Descriptor> {
        self.tags.get(reference)
    }

    /// Number of blobs held.
    #[must_use]
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }
}

impl ContentSource for MemoryStore {
    fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        self.blobs
            .get(&descriptor.digest)
            .cloned()
            .ok_or_else(|| StoreError::BlobNotFound {
                digest: descriptor.digest.to_string(),
            })
    }

    fn contains(&self, descriptor: &Descriptor) -> bool {
        self.blobs.contains_key(&descriptor.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_dedups() {
        let mut store = MemoryStore::new();
        let a = store.push(MediaType::config(), b"{}".to_vec());
        let b = store.push(MediaType::config(), b"{}".to_vec());
        assert_eq!(a, b);
        assert_eq!(store.blob_count(), 1);
    }

    #[test]
    fn test_push_verified_rejects_mismatch() {
        let mut store = MemoryStore::new();
        let desc = Descriptor::for_content(MediaType::layer(), b"real");
        assert!(store.push_verified(&desc, b"fake".to_vec()).is_err());
        assert!(!store.contains(&desc));
        store.push_verified(&desc, b"real".to_vec()).unwrap();
        assert_eq!(store.fetch(&desc).unwrap(), b"real");
    }

    #[test]
    fn test_tag_and_resolve() {
        let mut store = MemoryStore::new();
        let desc = store.push(MediaType::manifest(), b"{}".to_vec());
        store.tag("opcr.io/a:1", desc.clone());
        assert_eq!(store.resolve("opcr.io/a:1"), Some(&desc));
        assert_eq!(store.resolve("opcr.io/a:2"), None);
    }
}
