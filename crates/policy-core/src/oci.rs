//! OCI image specification types.
//!
//! This module defines the descriptor and manifest documents exchanged with
//! registries, and the media types a policy bundle transfer recognises.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// Well-known OCI annotation keys.
pub mod annotations {
    /// Human-readable title of the content (usually a file name).
    pub const TITLE: &str = "org.opencontainers.image.title";

    /// RFC 3339 creation timestamp.
    pub const CREATED: &str = "org.opencontainers.image.created";

    /// Reference name, as used in OCI image layouts.
    pub const REF_NAME: &str = "org.opencontainers.image.ref.name";
}

/// A media type string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediaType(String);

impl MediaType {
    /// OCI image manifest media type.
    pub const OCI_MANIFEST: &'static str = "application/vnd.oci.image.manifest.v1+json";

    /// OCI image config media type.
    pub const OCI_CONFIG: &'static str = "application/vnd.oci.image.config.v1+json";

    /// Config media type for artifacts that carry no meaningful config.
    pub const UNKNOWN_CONFIG: &'static str = "application/vnd.unknown.config.v1+json";

    /// Gzip-compressed tar layer.
    pub const OCI_LAYER_TAR_GZIP: &'static str = "application/vnd.oci.image.layer.v1.tar+gzip";

    /// Uncompressed tar layer.
    pub const OCI_LAYER_TAR: &'static str = "application/vnd.oci.image.layer.v1.tar";

    /// Opaque binary content.
    pub const OCTET_STREAM: &'static str = "application/octet-stream";

    /// Media types permitted to cross the wire during push and pull.
    pub const ALLOWED: [&'static str; 6] = [
        Self::OCI_MANIFEST,
        Self::OCI_CONFIG,
        Self::UNKNOWN_CONFIG,
        Self::OCI_LAYER_TAR_GZIP,
        Self::OCI_LAYER_TAR,
        Self::OCTET_STREAM,
    ];

    /// Creates a new media type.
    #[must_use]
    pub fn new(media_type: impl Into<String>) -> Self {
        Self(media_type.into())
    }

    /// Returns the media type string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The canonical media type for bundle layers.
    #[must_use]
    pub fn layer() -> Self {
        Self::new(Self::OCI_LAYER_TAR_GZIP)
    }

    /// The canonical media type for bundle configs.
    #[must_use]
    pub fn config() -> Self {
        Self::new(Self::OCI_CONFIG)
    }

    /// The OCI image manifest media type.
    #[must_use]
    pub fn manifest() -> Self {
        Self::new(Self::OCI_MANIFEST)
    }

    /// Returns true for any manifest-like media type.
    #[must_use]
    pub fn is_manifest(&self) -> bool {
        self.0.contains("manifest")
    }

    /// Returns true for tar or gzipped-tar layer types.
    #[must_use]
    pub fn is_tar_layer(&self) -> bool {
        let s = self.0.as_str();
        s.ends_with(".tar") || s.ends_with("tar+gzip") || s.ends_with("tar.gzip")
    }

    /// Returns true if the media type is on the transfer allow-list.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        Self::ALLOWED.contains(&self.0.as_str())
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MediaType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for MediaType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self(s))
    }
}

/// OCI content descriptor.
///
/// A descriptor identifies a blob without containing it: the type of the
/// content, its digest and its size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: MediaType,

    /// Digest of the targeted content.
    pub digest: Digest,

    /// Size in bytes of the content.
    pub size: u64,

    /// Optional annotations (key-value metadata).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    /// Creates a new descriptor.
    #[must_use]
    pub const fn new(media_type: MediaType, digest: Digest, size: u64) -> Self {
        Self {
            media_type,
            digest,
            size,
            annotations: BTreeMap::new(),
        }
    }

    /// Creates a descriptor for in-memory content, hashing it.
    ///
    /// # Examples
    ///
    /// ```
    /// use policy_core::{Descriptor, MediaType};
    ///
    /// let desc = Descriptor::for_content(MediaType::config(), b"{}");
    /// assert_eq!(desc.size, 2);
    /// ```
    #[must_use]
    pub fn for_content(media_type: MediaType, content: &[u8]) -> Self {
        Self::new(media_type, Digest::sha256(content), content.len() as u64)
    }

    /// Adds an annotation to the descriptor.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Returns a copy with a different media type.
    #[must_use]
    pub fn with_media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }

    /// Returns true if this descriptor points at a manifest.
    #[must_use]
    pub fn is_manifest(&self) -> bool {
        self.media_type.is_manifest()
    }
}

/// OCI Image Manifest.
///
/// Links one config blob and one or more layer blobs into one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version (always 2).
    pub schema_version: u32,

    /// Media type of this manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,

    /// Configuration descriptor.
    pub config: Descriptor,

    /// Layers that make up the artifact.
    pub layers: Vec<Descriptor>,

    /// Optional annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Manifest {
    /// Creates a new image manifest.
    #[must_use]
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MediaType::manifest()),
            config,
            layers,
            annotations: BTreeMap::new(),
        }
    }

    /// Replaces the manifest annotations.
    #[must_use]
    pub fn with_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }

    /// Returns the first layer whose media type is a tar or gzipped-tar layer.
    #[must_use]
    pub fn bundle_layer(&self) -> Option<&Descriptor> {
        self.layers.iter().find(|d| d.media_type.is_tar_layer())
    }

    /// Parses a manifest document.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not a manifest document.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serializes the manifest. Annotation maps are ordered, so equal
    /// manifests always produce equal bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_vec(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
