//! In-process registry.
//!
//! Holds manifests, blobs and tags in memory and can be told to misbehave:
//! answer re-uploads with a 409, or refuse particular digests. The
//! coordinator's tests run against it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use policy_core::{Descriptor, Digest, MediaType, Reference};

use crate::error::{RegistryError, Result};
use crate::remote::{EndpointResolver, RemoteEndpoint};

#[derive(Debug, Default)]
struct State {
    blobs: HashMap<Digest, Vec<u8>>,
    manifests: HashMap<Digest, (Descriptor, Vec<u8>)>,
    tags: HashMap<String, BTreeMap<String, Digest>>,
    conflict_on_duplicate: bool,
    failing: HashSet<Digest>,
    log: Vec<String>,
}

/// Shared in-memory registry. Clones see the same content.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<State>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes existence checks always miss and re-uploads fail with
    /// `409 ... already exists`, like registries without HEAD support.
    #[must_use]
    pub fn conflict_on_duplicate(self) -> Self {
        self.state.lock().conflict_on_duplicate = true;
        self
    }

    /// Makes every upload of `digest` fail with a 500.
    pub fn fail_push_of(&self, digest: &Digest) {
        self.state.lock().failing.insert(digest.clone());
    }

    /// Stores raw manifest bytes under `repository:tag` without validation.
    pub fn insert_manifest(&self, repository: &str, tag: &str, bytes: &[u8]) -> Descriptor {
        let descriptor = Descriptor::for_content(MediaType::manifest(), bytes);
        let mut state = self.state.lock();
        state
            .manifests
            .insert(descriptor.digest.clone(), (descriptor.clone(), bytes.to_vec()));
        state
            .tags
            .entry(repository.to_string())
            .or_default()
            .insert(tag.to_string(), descriptor.digest.clone());
        descriptor
    }

    /// Stores a blob.
    pub fn insert_blob(&self, media_type: MediaType, bytes: &[u8]) -> Descriptor {
        let descriptor = Descriptor::for_content(media_type, bytes);
        self.state
            .lock()
            .blobs
            .insert(descriptor.digest.clone(), bytes.to_vec());
        descriptor
    }

    /// Serves `bytes` for `descriptor` without checking that they match it.
    pub fn insert_blob_as(&self, descriptor: &Descriptor, bytes: &[u8]) {
        self.state
            .lock()
            .blobs
            .insert(descriptor.digest.clone(), bytes.to_vec());
    }

    /// Descriptor tagged `tag` in `repository`.
    #[must_use]
    pub fn manifest(&self, repository: &str, tag: &str) -> Option<Descriptor> {
        let state = self.state.lock();
        let digest = state.tags.get(repository)?.get(tag)?;
        state.manifests.get(digest).map(|(d, _)| d.clone())
    }

    /// Tags of `repository`, sorted.
    #[must_use]
    pub fn tags(&self, repository: &str) -> Vec<String> {
        self.state
            .lock()
            .tags
            .get(repository)
            .map(|tags| tags.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns true if a blob or manifest with `digest` is stored.
    #[must_use]
    pub fn contains(&self, digest: &Digest) -> bool {
        let state = self.state.lock();
        state.blobs.contains_key(digest) || state.manifests.contains_key(digest)
    }

    /// Write operations performed so far, e.g. `blob sha256:…` or `manifest repo:tag`.
    #[must_use]
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }
}

impl EndpointResolver for MemoryRegistry {
    fn endpoint(&self, reference: &Reference) -> Result<Box<dyn RemoteEndpoint>> {
        Ok(Box::new(MemoryRemote {
            state: Arc::clone(&self.state),
            repository: reference.repository(),
        }))
    }
}

/// [`RemoteEndpoint`] for one repository of a [`MemoryRegistry`].
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    state: Arc<Mutex<State>>,
    repository: String,
}

impl MemoryRemote {
    fn not_found(&self, object: &str) -> RegistryError {
        RegistryError::NotFound {
            reference: format!("{}:{object}", self.repository),
        }
    }
}

fn check_upload(state: &State, descriptor: &Descriptor, bytes: &[u8], present: bool) -> Result<()> {
    if state.failing.contains(&descriptor.digest) {
        return Err(RegistryError::HttpError {
            status: 500,
            message: format!("injected failure for {}", descriptor.digest),
        });
    }
    if present && state.conflict_on_duplicate {
        return Err(RegistryError::HttpError {
            status: 409,
            message: format!("{} already exists", descriptor.digest),
        });
    }
    let actual = Digest::sha256(bytes);
    if actual != descriptor.digest {
        return Err(RegistryError::HttpError {
            status: 400,
            message: format!("DIGEST_INVALID: expected {}, got {actual}", descriptor.digest),
        });
    }
    Ok(())
}

#[async_trait]
impl RemoteEndpoint for MemoryRemote {
    fn name(&self) -> String {
        self.repository.clone()
    }

    async fn resolve(&self, object: &str) -> Result<Descriptor> {
        let state = self.state.lock();
        let digest = match Digest::parse(object) {
            Ok(digest) => digest,
            Err(_) => state
                .tags
                .get(&self.repository)
                .and_then(|tags| tags.get(object))
                .cloned()
                .ok_or_else(|| self.not_found(object))?,
        };
        state
            .manifests
            .get(&digest)
            .map(|(d, _)| d.clone())
            .ok_or_else(|| self.not_found(object))
    }

    async fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        let state = self.state.lock();
        state
            .manifests
            .get(&descriptor.digest)
            .map(|(_, bytes)| bytes.clone())
            .or_else(|| state.blobs.get(&descriptor.digest).cloned())
            .ok_or_else(|| self.not_found(&descriptor.digest.to_string()))
    }

    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        let state = self.state.lock();
        if state.conflict_on_duplicate {
            return Ok(false);
        }
        Ok(state.blobs.contains_key(&descriptor.digest)
            || state.manifests.contains_key(&descriptor.digest))
    }

    async fn push(&self, descriptor: &Descriptor, bytes: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock();
        let present = state.blobs.contains_key(&descriptor.digest);
        check_upload(&state, descriptor, &bytes, present)?;
        state.log.push(format!("blob {}", descriptor.digest));
        state.blobs.insert(descriptor.digest.clone(), bytes);
        Ok(())
    }

    async fn push_manifest(&self, descriptor: &Descriptor, bytes: Vec<u8>, tag: Option<&str>) -> Result<()> {
        let mut state = self.state.lock();
        let object = tag.map_or_else(|| descriptor.digest.to_string(), ToString::to_string);
        let present = state
            .tags
            .get(&self.repository)
            .and_then(|tags| tags.get(&object))
            .is_some_and(|d| *d == descriptor.digest)
            || (tag.is_none() && state.manifests.contains_key(&descriptor.digest));
        check_upload(&state, descriptor, &bytes, present)?;

        state.log.push(format!("manifest {}:{object}", self.repository));
        state
            .manifests
            .insert(descriptor.digest.clone(), (descriptor.clone(), bytes));
        if let Some(tag) = tag {
            state
                .tags
                .entry(self.repository.clone())
                .or_default()
                .insert(tag.to_string(), descriptor.digest.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(registry: &MemoryRegistry) -> Box<dyn RemoteEndpoint> {
        registry
            .endpoint(&Reference::parse("opcr.io/acme/policy:1").unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn test_push_and_fetch_blob() {
        let registry = MemoryRegistry::new();
        let remote = endpoint(&registry);
        let desc = Descriptor::for_content(MediaType::layer(), b"layer");

        assert!(!remote.exists(&desc).await.unwrap());
        remote.push(&desc, b"layer".to_vec()).await.unwrap();
        assert!(remote.exists(&desc).await.unwrap());
        assert_eq!(remote.fetch(&desc).await.unwrap(), b"layer");
    }

    #[tokio::test]
    async fn test_push_rejects_wrong_digest() {
        let registry = MemoryRegistry::new();
        let remote = endpoint(&registry);
        let desc = Descriptor::for_content(MediaType::layer(), b"layer");

        let err = remote.push(&desc, b"other".to_vec()).await.unwrap_err();
        assert!(matches!(err, RegistryError::HttpError { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_conflict_on_duplicate() {
        let registry = MemoryRegistry::new().conflict_on_duplicate();
        let remote = endpoint(&registry);
        let desc = Descriptor::for_content(MediaType::layer(), b"layer");

        remote.push(&desc, b"layer".to_vec()).await.unwrap();
        assert!(!remote.exists(&desc).await.unwrap());
        let err = remote.push(&desc, b"layer".to_vec()).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_resolve_by_tag_and_digest() {
        let registry = MemoryRegistry::new();
        let desc = registry.insert_manifest("opcr.io/acme/policy", "1", b"{}");
        let remote = endpoint(&registry);

        assert_eq!(remote.resolve("1").await.unwrap(), desc);
        assert_eq!(remote.resolve(&desc.digest.to_string()).await.unwrap(), desc);
        assert!(remote.resolve("2").await.unwrap_err().is_not_found());
    }
}
