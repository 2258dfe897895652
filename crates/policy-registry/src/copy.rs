//! Graph copy between local content and a remote endpoint.
//!
//! A root that is a manifest drags its config and layers along; those are
//! transferred concurrently and skipped when the destination already has
//! them. Every descriptor passes the media type allow-list first.

use futures::future::try_join_all;
use policy_core::{Descriptor, Manifest};
use policy_store::{ContentSource, Store};
use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::remote::RemoteEndpoint;

/// Fails with [`RegistryError::MediaTypeDenied`] for types off the allow-list.
pub fn check_allowed(reference: &str, descriptor: &Descriptor) -> Result<()> {
    if descriptor.media_type.is_allowed() {
        Ok(())
    } else {
        Err(RegistryError::MediaTypeDenied {
            reference: reference.to_string(),
            media_type: descriptor.media_type.to_string(),
        })
    }
}

fn parse_manifest(reference: &str, bytes: &[u8]) -> Result<Manifest> {
    Manifest::from_slice(bytes).map_err(|e| RegistryError::InvalidManifest {
        reference: reference.to_string(),
        reason: e.to_string(),
    })
}

fn children(reference: &str, manifest: &Manifest) -> Result<Vec<Descriptor>> {
    let mut children = Vec::with_capacity(manifest.layers.len() + 1);
    children.push(manifest.config.clone());
    children.extend(manifest.layers.iter().cloned());
    for child in &children {
        check_allowed(reference, child)?;
    }
    Ok(children)
}

/// Pushes `root` and, when it is a manifest, everything it references.
///
/// The manifest itself goes last, under `tag` if given.
///
/// # Errors
///
/// Returns the first transfer failure. "Already exists" answers are not failures.
pub async fn push_graph(
    source: &dyn ContentSource,
    remote: &dyn RemoteEndpoint,
    reference: &str,
    root: &Descriptor,
    tag: Option<&str>,
) -> Result<()> {
    check_allowed(reference, root)?;
    if !root.is_manifest() {
        return push_blob(source, remote, root).await;
    }

    let bytes = source.fetch(root)?;
    let manifest = parse_manifest(reference, &bytes)?;
    let children = children(reference, &manifest)?;
    try_join_all(children.iter().map(|child| push_blob(source, remote, child))).await?;

    match remote.push_manifest(root, bytes, tag).await {
        Err(e) if e.is_already_exists() => {
            debug!(digest = %root.digest, "Manifest already exists remotely");
            Ok(())
        }
        other => other,
    }
}

/// Pushes standalone blobs concurrently.
///
/// # Errors
///
/// Returns the first transfer failure.
pub async fn push_blobs(
    source: &dyn ContentSource,
    remote: &dyn RemoteEndpoint,
    reference: &str,
    blobs: &[Descriptor],
) -> Result<()> {
    for blob in blobs {
        check_allowed(reference, blob)?;
    }
    try_join_all(blobs.iter().map(|blob| push_blob(source, remote, blob))).await?;
    Ok(())
}

async fn push_blob(source: &dyn ContentSource, remote: &dyn RemoteEndpoint, descriptor: &Descriptor) -> Result<()> {
    if remote.exists(descriptor).await? {
        debug!(digest = %descriptor.digest, "Blob exists remotely, skipping");
        return Ok(());
    }

    let bytes = source.fetch(descriptor)?;
    match remote.push(descriptor, bytes).await {
        Ok(()) => {
            debug!(digest = %descriptor.digest, size = descriptor.size, "Pushed blob");
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            debug!(digest = %descriptor.digest, "Blob already exists remotely");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Copies `root` and its children from `remote` into `store`.
///
/// Returns the copied descriptors in completion order: children first, the
/// root last. The tag index is not touched.
///
/// # Errors
///
/// Returns [`RegistryError::MediaTypeDenied`] or [`RegistryError::InvalidManifest`]
/// before any child is fetched, or the first transfer failure.
pub async fn pull_graph(
    remote: &dyn RemoteEndpoint,
    store: &Store,
    reference: &str,
    root: &Descriptor,
) -> Result<Vec<Descriptor>> {
    check_allowed(reference, root)?;
    if !root.is_manifest() {
        fetch_into(remote, store, root).await?;
        return Ok(vec![root.clone()]);
    }

    let bytes = remote.fetch(root).await?;
    let manifest = parse_manifest(reference, &bytes)?;
    let mut copied = children(reference, &manifest)?;
    try_join_all(copied.iter().map(|child| fetch_into(remote, store, child))).await?;

    store.put_verified(root, bytes.as_slice())?;
    debug!(digest = %root.digest, "Stored manifest");
    copied.push(root.clone());
    Ok(copied)
}

async fn fetch_into(remote: &dyn RemoteEndpoint, store: &Store, descriptor: &Descriptor) -> Result<()> {
    if store.exists(&descriptor.digest) {
        debug!(digest = %descriptor.digest, "Blob present locally, skipping");
        return Ok(());
    }
    let bytes = remote.fetch(descriptor).await?;
    store.put_verified(descriptor, bytes.as_slice())?;
    debug!(digest = %descriptor.digest, size = descriptor.size, "Fetched blob");
    Ok(())
}
