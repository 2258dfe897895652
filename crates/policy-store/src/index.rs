//! Persisted tag index.
//!
//! The index is a single JSON document mapping references to descriptors:
//!
//! ```json
//! {
//!   "schemaVersion": 2,
//!   "entries": [
//!     { "reference": "opcr.io/acme/policy:1.0.0", "descriptor": { ... } }
//!   ]
//! }
//! ```
//!
//! It is only ever replaced wholesale via write-temp-then-rename, so a crash
//! mid-save leaves the previously committed document intact.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::Path;

use policy_core::{Descriptor, Digest};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Schema version written to and required from the index document.
pub const INDEX_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexDocument {
    schema_version: u32,
    #[serde(default)]
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    reference: String,
    descriptor: Descriptor,
}

/// In-memory tag index. Not authoritative until [`TagIndex::save`] succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagIndex {
    entries: BTreeMap<String, Descriptor>,
}

impl TagIndex {
    /// Loads the index at `path`, or returns an empty index if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreCorrupt`] if the document exists but is not
    /// a valid index.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(StoreError::io(path)(e)),
        };

        let corrupt = |reason: String| StoreError::StoreCorrupt {
            path: path.to_path_buf(),
            reason,
        };

        let document: IndexDocument =
            serde_json::from_slice(&raw).map_err(|e| corrupt(e.to_string()))?;

        if document.schema_version != INDEX_SCHEMA_VERSION {
            return Err(corrupt(format!(
                "unsupported schema version {}",
                document.schema_version
            )));
        }

        let mut entries = BTreeMap::new();
        let mut seen = HashSet::new();
        for entry in document.entries {
            if entry.reference.is_empty() {
                return Err(corrupt("entry with empty reference".to_string()));
            }
            if !seen.insert(entry.reference.clone()) {
                return Err(corrupt(format!("duplicate reference '{}'", entry.reference)));
            }
            if entry.descriptor.media_type.as_str().is_empty() {
                return Err(corrupt(format!(
                    "entry '{}' has an empty media type",
                    entry.reference
                )));
            }
            entries.insert(entry.reference, entry.descriptor);
        }

        Ok(Self { entries })
    }

    /// Writes the index durably to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written or renamed into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        let document = IndexDocument {
            schema_version: INDEX_SCHEMA_VERSION,
            entries: self
                .entries
                .iter()
                .map(|(reference, descriptor)| IndexEntry {
                    reference: reference.clone(),
                    descriptor: descriptor.clone(),
                })
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(StoreError::io(dir))?;
        tmp.write_all(&bytes).map_err(StoreError::io(path))?;
        tmp.as_file().sync_all().map_err(StoreError::io(path))?;
        tmp.persist(path).map_err(|e| StoreError::Io {
            path: path.to_path_buf(),
            source: e.error,
        })?;

        Ok(())
    }

    /// Exact-match lookup.
    #[must_use]
    pub fn get(&self, reference: &str) -> Option<&Descriptor> {
        self.entries.get(reference)
    }

    /// Looks up a descriptor by a prefix of its digest's hex part.
    ///
    /// An optional `sha256:` style prefix is ignored. Prefixes matching more
    /// than one distinct digest are treated as not found.
    #[must_use]
    pub fn get_by_prefix(&self, prefix: &str) -> Option<&Descriptor> {
        let hex = prefix.split_once(':').map_or(prefix, |(_, hex)| hex);
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let hex = hex.to_ascii_lowercase();

        let mut found: Option<&Descriptor> = None;
        for descriptor in self.entries.values() {
            if !descriptor.digest.hex().starts_with(&hex) {
                continue;
            }
            match found {
                Some(existing) if existing.digest != descriptor.digest => return None,
                Some(_) => {}
                None => found = Some(descriptor),
            }
        }
        found
    }

    /// Returns the first descriptor stored with `digest`, in reference order.
    #[must_use]
    pub fn get_by_digest(&self, digest: &Digest) -> Option<&Descriptor> {
        self.entries.values().find(|d| &d.digest == digest)
    }

    /// Inserts or overwrites the entry for `reference`.
    pub fn insert(&mut self, reference: impl Into<String>, descriptor: Descriptor) {
        self.entries.insert(reference.into(), descriptor);
    }

    /// Removes the entry for `reference`.
    pub fn remove(&mut self, reference: &str) -> Option<Descriptor> {
        self.entries.remove(reference)
    }

    /// Iterates over all entries in reference order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Descriptor)> {
        self.entries.iter()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_core::MediaType;

    fn layer(content: &[u8]) -> Descriptor {
        Descriptor::for_content(MediaType::layer(), content)
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = TagIndex::load(&dir.path().join("index.json")).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let mut index = TagIndex::default();
        index.insert("opcr.io/a/b:1", layer(b"one"));
        index.insert("opcr.io/a/b:2", layer(b"two"));
        index.save(&path).unwrap();

        let loaded = TagIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, b"{ nope").unwrap();

        let err = TagIndex::load(&path).unwrap_err();
        assert!(matches!(err, StoreError::StoreCorrupt { .. }));
    }

    #[test]
    fn test_load_rejects_wrong_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, br#"{"schemaVersion": 1, "entries": []}"#).unwrap();

        let err = TagIndex::load(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported schema version 1"));
    }

    #[test]
    fn test_load_rejects_duplicates_and_bad_digests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let descriptor = serde_json::to_value(layer(b"x")).unwrap();

        let duplicate = serde_json::json!({
            "schemaVersion": 2,
            "entries": [
                { "reference": "opcr.io/a:1", "descriptor": descriptor },
                { "reference": "opcr.io/a:1", "descriptor": descriptor }
            ]
        });
        std::fs::write(&path, serde_json::to_vec(&duplicate).unwrap()).unwrap();
        assert!(matches!(
            TagIndex::load(&path),
            Err(StoreError::StoreCorrupt { .. })
        ));

        let bad_digest = serde_json::json!({
            "schemaVersion": 2,
            "entries": [{
                "reference": "opcr.io/a:1",
                "descriptor": { "mediaType": MediaType::OCI_LAYER_TAR_GZIP, "digest": "sha256:xyz", "size": 1 }
            }]
        });
        std::fs::write(&path, serde_json::to_vec(&bad_digest).unwrap()).unwrap();
        assert!(matches!(
            TagIndex::load(&path),
            Err(StoreError::StoreCorrupt { .. })
        ));
    }

    #[test]
    fn test_get_by_prefix() {
        let mut index = TagIndex::default();
        let one = layer(b"one");
        index.insert("opcr.io/a:1", one.clone());
        index.insert("opcr.io/a:also-1", one.clone());

        let prefix = &one.digest.hex()[..8];
        assert_eq!(index.get_by_prefix(prefix), Some(&one));
        assert_eq!(index.get_by_prefix(&format!("sha256:{prefix}")), Some(&one));
        assert_eq!(index.get_by_prefix("not-hex"), None);
        assert_eq!(index.get_by_prefix(""), None);
    }

    #[test]
    fn test_get_by_prefix_ambiguous_is_none() {
        let mut index = TagIndex::default();
        // Find two contents whose digests share a first hex character.
        let first = layer(b"seed-0");
        let lead = first.digest.hex()[..1].to_string();
        let second = (1..)
            .map(|i| layer(format!("seed-{i}").as_bytes()))
            .find(|d| d.digest.hex().starts_with(&lead))
            .unwrap();
        index.insert("opcr.io/a:1", first);
        index.insert("opcr.io/a:2", second);

        assert_eq!(index.get_by_prefix(&lead), None);
    }
}
