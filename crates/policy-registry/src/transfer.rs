//! Push and pull coordination.
//!
//! Each operation is a short-lived state machine over one reference. Pull
//! only touches the tag index once every blob has arrived. Push upgrades a
//! bare layer into a manifest on the way out, or relays an existing manifest
//! through the local tag index one part at a time.

use std::fmt;

use policy_core::{Descriptor, MediaType, Reference};
use policy_store::{split_manifest, synthesize_manifest, MemoryStore, Overlay, Store};
use tracing::{debug, info, instrument, warn};

use crate::copy;
use crate::error::{RegistryError, Result};
use crate::remote::{EndpointResolver, RemoteEndpoint};

/// States of a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullState {
    /// Asking the remote what the reference points at.
    Resolving,
    /// Copying content into the local store.
    Fetching,
    /// Recording the reference in the tag index.
    Tagging,
    /// Finished.
    Done,
    /// Gave up; the tag index is unchanged.
    Failed,
}

/// States of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    /// Looking the reference up locally.
    Resolving,
    /// Wrapping a bare layer in a manifest.
    Synthesizing,
    /// Uploading config and layer.
    PushingBlobs,
    /// Uploading the manifest under its tag.
    PushingManifest,
    /// Relay slot holds the layer.
    RelayLayer,
    /// Relay slot holds the config.
    RelayConfig,
    /// Relay slot holds the manifest again.
    RelayManifest,
    /// Finished.
    Done,
    /// Gave up.
    Failed,
}

impl fmt::Display for PullState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolving => "resolve",
            Self::Fetching => "fetch",
            Self::Tagging => "tag",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl fmt::Display for PushState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolving => "resolve",
            Self::Synthesizing => "synthesize manifest",
            Self::PushingBlobs => "push blobs",
            Self::PushingManifest => "push manifest",
            Self::RelayLayer => "relay layer",
            Self::RelayConfig => "relay config",
            Self::RelayManifest => "relay manifest",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Errors that describe the content rather than the transport pass through unwrapped.
fn is_content_error(err: &RegistryError) -> bool {
    matches!(
        err,
        RegistryError::InvalidManifest { .. }
            | RegistryError::MediaTypeDenied { .. }
            | RegistryError::InvalidReference(_)
            | RegistryError::NotFound { .. }
    )
}

/// A missing reference is reported as is; a blob that vanishes mid-copy is
/// a failed fetch.
fn pull_failed(reference: &str, phase: PullState, err: RegistryError) -> RegistryError {
    let missing_child = phase == PullState::Fetching && err.is_not_found();
    if is_content_error(&err) && !missing_child {
        return err;
    }
    RegistryError::PullFailed {
        reference: reference.to_string(),
        phase: phase.to_string(),
        source: Box::new(err),
    }
}

fn push_failed(reference: &str, phase: PushState, err: RegistryError) -> RegistryError {
    if is_content_error(&err) {
        return err;
    }
    let reference = reference.to_string();
    let source = Box::new(err);
    match phase {
        PushState::PushingManifest | PushState::RelayManifest => RegistryError::PushManifestFailed {
            reference,
            phase: phase.to_string(),
            source,
        },
        _ => RegistryError::PushBlobFailed {
            reference,
            phase: phase.to_string(),
            source,
        },
    }
}

/// Moves artifacts between the local store and remote registries.
///
/// # Examples
///
/// ```rust,no_run
/// use policy_registry::{Credentials, HttpResolver, RegistryConfig, Transfer};
/// use policy_store::Store;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut store = Store::open("/tmp/policies-root")?;
/// let resolver = HttpResolver::new(RegistryConfig::new(), Credentials::new());
/// let descriptor = Transfer::new(&mut store, &resolver)
///     .pull("opcr.io/acme/policy:1.0.0")
///     .await?;
/// println!("pulled {}", descriptor.digest);
/// # Ok(())
/// # }
/// ```
pub struct Transfer<'a> {
    store: &'a mut Store,
    resolver: &'a dyn EndpointResolver,
}

impl<'a> Transfer<'a> {
    /// Creates a coordinator for one session over `store`.
    pub fn new(store: &'a mut Store, resolver: &'a dyn EndpointResolver) -> Self {
        Self { store, resolver }
    }

    /// Pulls `reference` into the local store and tags it.
    ///
    /// The tag records the manifest when one was copied, otherwise the last
    /// copied descriptor. Nothing is tagged unless every blob arrived.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidManifest`] or
    /// [`RegistryError::MediaTypeDenied`] for bad content, or
    /// [`RegistryError::PullFailed`] naming the phase that failed.
    #[instrument(skip(self))]
    pub async fn pull(&mut self, reference: &str) -> Result<Descriptor> {
        let result = self.run_pull(reference).await;
        match &result {
            Ok(descriptor) => {
                debug!(reference, state = ?PullState::Done, "Pull state");
                info!(reference, digest = %descriptor.digest, "Pulled");
            }
            Err(e) => debug!(reference, state = ?PullState::Failed, error = %e, "Pull state"),
        }
        result
    }

    async fn run_pull(&mut self, reference: &str) -> Result<Descriptor> {
        let parsed = Reference::parse(reference)?;
        let remote = self.resolver.endpoint(&parsed)?;

        debug!(reference, state = ?PullState::Resolving, "Pull state");
        let root = remote
            .resolve(&parsed.object())
            .await
            .map_err(|e| pull_failed(reference, PullState::Resolving, e))?;

        debug!(reference, state = ?PullState::Fetching, digest = %root.digest, "Pull state");
        let copied = copy::pull_graph(remote.as_ref(), &*self.store, reference, &root)
            .await
            .map_err(|e| pull_failed(reference, PullState::Fetching, e))?;

        let authoritative = copied
            .iter()
            .find(|d| d.is_manifest())
            .or_else(|| copied.last())
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                reference: reference.to_string(),
            })?;

        debug!(reference, state = ?PullState::Tagging, "Pull state");
        self.store.tag(reference, authoritative.clone())?;
        self.store.save()?;
        Ok(authoritative)
    }

    /// Pushes the locally tagged `reference` to its registry.
    ///
    /// A bare layer is wrapped in a synthesized manifest first; a manifest is
    /// relayed through the tag index part by part. Content the remote
    /// already has counts as pushed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `reference` is not tagged
    /// locally, [`RegistryError::PushBlobFailed`] if content failed to
    /// transfer, or [`RegistryError::PushManifestFailed`] if the manifest
    /// pointer was refused.
    #[instrument(skip(self))]
    pub async fn push(&mut self, reference: &str) -> Result<Descriptor> {
        let result = self.run_push(reference).await;
        match &result {
            Ok(descriptor) => {
                debug!(reference, state = ?PushState::Done, "Push state");
                info!(reference, digest = %descriptor.digest, "Pushed manifest");
            }
            Err(e) => debug!(reference, state = ?PushState::Failed, error = %e, "Push state"),
        }
        result
    }

    async fn run_push(&mut self, reference: &str) -> Result<Descriptor> {
        debug!(reference, state = ?PushState::Resolving, "Push state");
        let local = self
            .store
            .resolve(reference)
            .ok_or_else(|| RegistryError::NotFound {
                reference: reference.to_string(),
            })?;
        let parsed = Reference::parse(reference)?;
        let remote = self.resolver.endpoint(&parsed)?;
        let tag = parsed.digest().is_none().then(|| parsed.object());

        if local.is_manifest() {
            self.push_relay(remote.as_ref(), reference, local, tag.as_deref())
                .await
        } else {
            self.push_layer(remote.as_ref(), reference, &local, tag.as_deref())
                .await
        }
    }

    /// Wraps a bare layer in a manifest held only in memory, then pushes the
    /// blobs and the manifest pointer in two rounds.
    async fn push_layer(
        &self,
        remote: &dyn RemoteEndpoint,
        reference: &str,
        layer: &Descriptor,
        tag: Option<&str>,
    ) -> Result<Descriptor> {
        debug!(reference, state = ?PushState::Synthesizing, "Push state");
        let image = synthesize_manifest(layer)?;
        let mut memory = MemoryStore::new();
        let manifest = image.stage(&mut memory, reference);
        let overlay = Overlay::new(&memory, &*self.store);

        debug!(reference, state = ?PushState::PushingBlobs, "Push state");
        copy::push_blobs(&overlay, remote, reference, &[image.config.clone(), image.layer.clone()])
            .await
            .map_err(|e| push_failed(reference, PushState::PushingBlobs, e))?;

        debug!(reference, state = ?PushState::PushingManifest, "Push state");
        let root = memory.resolve(reference).cloned().unwrap_or(manifest);
        copy::push_graph(&overlay, remote, reference, &root, tag)
            .await
            .map_err(|e| push_failed(reference, PushState::PushingManifest, e))?;

        Ok(root)
    }

    /// Pushes layer, config and manifest in turn, pointing the local tag at
    /// each one before its transfer. The tag is restored on failure.
    async fn push_relay(
        &mut self,
        remote: &dyn RemoteEndpoint,
        reference: &str,
        manifest: Descriptor,
        tag: Option<&str>,
    ) -> Result<Descriptor> {
        let (layer, config) = split_manifest(&*self.store, &manifest)?;
        let steps = [
            (PushState::RelayLayer, layer.with_media_type(MediaType::layer())),
            (PushState::RelayConfig, config.with_media_type(MediaType::config())),
            (PushState::RelayManifest, manifest.clone()),
        ];

        for (state, target) in steps {
            debug!(reference, state = ?state, digest = %target.digest, "Push state");
            self.store.untag(reference)?;
            self.store.tag(reference, target)?;

            let slot = self
                .store
                .resolve(reference)
                .ok_or_else(|| RegistryError::NotFound {
                    reference: reference.to_string(),
                })?;
            let slot_tag = tag.filter(|_| slot.is_manifest());

            if let Err(e) = copy::push_graph(&*self.store, remote, reference, &slot, slot_tag).await {
                self.restore_slot(reference, &manifest);
                return Err(push_failed(reference, state, e));
            }
        }

        self.store.save()?;
        Ok(manifest)
    }

    fn restore_slot(&mut self, reference: &str, original: &Descriptor) {
        if self.store.resolve(reference).as_ref() == Some(original) {
            return;
        }
        if let Err(e) = self.store.tag(reference, original.clone()) {
            warn!(reference, error = %e, "Failed to restore relay slot");
        }
    }
}

impl fmt::Debug for Transfer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("store", &self.store.root())
            .finish_non_exhaustive()
    }
}
