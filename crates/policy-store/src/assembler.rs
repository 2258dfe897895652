//! Artifact assembly.
//!
//! Converts between the single bundle tarball produced by a build and the
//! manifest + config + layer shape registries expect.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use policy_core::{annotations, Descriptor, Hasher, Manifest, MediaType};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::memory::MemoryStore;
use crate::source::ContentSource;
use crate::store::Store;

/// Config body used for manifests synthesized around a bare layer.
pub const EMPTY_CONFIG: &[u8] = b"{}";

/// Ingests a bundle tarball into `store` as a layer blob.
///
/// If a blob with the tarball's digest is already indexed, its descriptor is
/// returned with `extra` merged in and nothing is written. Otherwise the file
/// is streamed in and the descriptor gets title and creation annotations plus
/// `extra`.
///
/// # Errors
///
/// Returns an I/O error if the tarball cannot be read, or a store error if
/// the ingest fails.
pub fn ensure_image(
    store: &Store,
    tarball: &Path,
    extra: &BTreeMap<String, String>,
) -> Result<Descriptor> {
    let digest = {
        let mut file = File::open(tarball).map_err(StoreError::io(tarball))?;
        let mut hasher = Hasher::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).map_err(StoreError::io(tarball))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        hasher.finalize()
    };

    if let Some(mut existing) = store.resolve_by_digest(&digest) {
        if store.exists(&digest) {
            info!(%digest, "Reusing existing blob");
            existing
                .annotations
                .extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            return Ok(existing);
        }
    }

    let file = File::open(tarball).map_err(StoreError::io(tarball))?;
    let mut descriptor = store.put(MediaType::layer(), file, None)?;
    if descriptor.digest != digest {
        return Err(StoreError::DigestMismatch {
            expected: digest.to_string(),
            actual: descriptor.digest.to_string(),
        });
    }

    if let Some(name) = tarball.file_name().and_then(|n| n.to_str()) {
        descriptor
            .annotations
            .insert(annotations::TITLE.to_string(), name.to_string());
    }
    descriptor.annotations.insert(
        annotations::CREATED.to_string(),
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    descriptor
        .annotations
        .extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));

    info!(%digest, size = descriptor.size, "Ingested bundle");
    Ok(descriptor)
}

/// Decomposes a manifest into its bundle layer and config descriptors.
///
/// # Errors
///
/// Returns [`StoreError::InvalidManifest`] if the body does not parse, or
/// [`StoreError::NotFound`] if no tar layer is listed.
pub fn split_manifest(
    source: &impl ContentSource,
    manifest: &Descriptor,
) -> Result<(Descriptor, Descriptor)> {
    let body = source.fetch(manifest)?;
    let parsed = Manifest::from_slice(&body).map_err(|e| StoreError::InvalidManifest {
        digest: manifest.digest.to_string(),
        reason: e.to_string(),
    })?;

    let layer = parsed
        .bundle_layer()
        .cloned()
        .ok_or_else(|| StoreError::NotFound {
            reference: format!("tar layer in manifest {}", manifest.digest),
        })?;

    debug!(manifest = %manifest.digest, layer = %layer.digest, config = %parsed.config.digest, "Split manifest");
    Ok((layer, parsed.config))
}

/// A manifest built around a bare layer, with its config.
#[derive(Debug, Clone)]
pub struct SynthesizedImage {
    /// The layer the manifest wraps.
    pub layer: Descriptor,
    /// Descriptor of [`EMPTY_CONFIG`].
    pub config: Descriptor,
    /// Descriptor of the manifest document.
    pub manifest: Descriptor,
    /// Serialized manifest.
    pub manifest_bytes: Vec<u8>,
}

impl SynthesizedImage {
    /// Places the config and manifest in `memory` and tags the manifest as `reference`.
    ///
    /// The layer itself is not copied; it is expected to be read from disk.
    pub fn stage(&self, memory: &mut MemoryStore, reference: &str) -> Descriptor {
        memory.push(self.config.media_type.clone(), EMPTY_CONFIG.to_vec());
        let descriptor = memory.push(self.manifest.media_type.clone(), self.manifest_bytes.clone());
        memory.tag(reference, descriptor.clone());
        descriptor
    }
}

/// Wraps a bare layer in a manifest with an empty config.
///
/// The layer's annotations are copied onto the manifest.
///
/// # Errors
///
/// Returns an error if the manifest cannot be serialized.
pub fn synthesize_manifest(layer: &Descriptor) -> Result<SynthesizedImage> {
    let config = Descriptor::for_content(MediaType::new(MediaType::UNKNOWN_CONFIG), EMPTY_CONFIG);
    let layer = layer.clone().with_media_type(MediaType::layer());

    let manifest = Manifest::new(config.clone(), vec![layer.clone()])
        .with_annotations(layer.annotations.clone());
    let manifest_bytes = manifest.to_vec()?;
    let descriptor = Descriptor::for_content(MediaType::manifest(), &manifest_bytes);

    Ok(SynthesizedImage {
        layer,
        config,
        manifest: descriptor,
        manifest_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tarball(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    #[test]
    fn test_ensure_image_ingests_and_annotates() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("root")).unwrap();
        let tarball = write_tarball(dir.path(), "bundle.tar.gz", b"tarball bytes");

        let desc = ensure_image(&store, &tarball, &BTreeMap::new()).unwrap();
        assert_eq!(desc.media_type, MediaType::layer());
        assert_eq!(desc.size, 13);
        assert_eq!(
            desc.annotations.get(annotations::TITLE).map(String::as_str),
            Some("bundle.tar.gz")
        );
        assert!(desc.annotations.contains_key(annotations::CREATED));
        assert!(store.exists(&desc.digest));
    }

    #[test]
    fn test_ensure_image_reuses_indexed_blob() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path().join("root")).unwrap();
        let tarball = write_tarball(dir.path(), "bundle.tar.gz", b"same bytes");

        let first = ensure_image(&store, &tarball, &BTreeMap::new()).unwrap();
        store.tag("opcr.io/a:1", first.clone()).unwrap();

        let second = ensure_image(&store, &tarball, &BTreeMap::new()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_ensure_image_reuse_keeps_new_annotations() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path().join("root")).unwrap();
        let tarball = write_tarball(dir.path(), "bundle.tar.gz", b"same bytes");

        let first = ensure_image(&store, &tarball, &BTreeMap::new()).unwrap();
        store.tag("opcr.io/a:1", first.clone()).unwrap();

        let extra = BTreeMap::from([("team".to_string(), "platform".to_string())]);
        let second = ensure_image(&store, &tarball, &extra).unwrap();

        assert_eq!(second.digest, first.digest);
        assert_eq!(second.annotations.get("team").map(String::as_str), Some("platform"));
        assert_eq!(
            second.annotations.get(annotations::CREATED),
            first.annotations.get(annotations::CREATED)
        );
        assert_eq!(store.resolve("opcr.io/a:1"), Some(first));
    }

    #[test]
    fn test_synthesize_manifest() {
        let layer = Descriptor::for_content(MediaType::new(MediaType::OCTET_STREAM), b"layer")
            .with_annotation(annotations::TITLE, "bundle.tar.gz");
        let image = synthesize_manifest(&layer).unwrap();

        let manifest = Manifest::from_slice(&image.manifest_bytes).unwrap();
        assert_eq!(manifest.config.media_type.as_str(), MediaType::UNKNOWN_CONFIG);
        assert_eq!(manifest.config.size, 2);
        assert_eq!(manifest.layers, vec![image.layer.clone()]);
        assert_eq!(image.layer.media_type, MediaType::layer());
        assert_eq!(
            manifest.annotations.get(annotations::TITLE).map(String::as_str),
            Some("bundle.tar.gz")
        );
        assert_eq!(image.manifest.digest, policy_core::Digest::sha256(&image.manifest_bytes));
    }

    #[test]
    fn test_stage_and_split_round_trip() {
        let layer = Descriptor::for_content(MediaType::layer(), b"layer");
        let image = synthesize_manifest(&layer).unwrap();

        let mut memory = MemoryStore::new();
        let staged = image.stage(&mut memory, "opcr.io/a:1");
        assert_eq!(staged, image.manifest);
        assert_eq!(memory.resolve("opcr.io/a:1"), Some(&image.manifest));

        let (split_layer, split_config) = split_manifest(&memory, &staged).unwrap();
        assert_eq!(split_layer, image.layer);
        assert_eq!(split_config, image.config);
    }

    #[test]
    fn test_split_manifest_errors() {
        let mut memory = MemoryStore::new();
        let garbage = memory.push(MediaType::manifest(), b"{not json".to_vec());
        assert!(matches!(
            split_manifest(&memory, &garbage),
            Err(StoreError::InvalidManifest { .. })
        ));

        let config = Descriptor::for_content(MediaType::config(), b"{}");
        let json = Descriptor::for_content(MediaType::new("application/json"), b"[]");
        let bytes = Manifest::new(config, vec![json]).to_vec().unwrap();
        let no_layer = memory.push(MediaType::manifest(), bytes);
        assert!(matches!(
            split_manifest(&memory, &no_layer),
            Err(StoreError::NotFound { .. })
        ));
    }
}
