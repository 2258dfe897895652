//! On-disk content-addressable store.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/
//! ├── oci-layout              layout marker
//! ├── index.json              tag index (see [`crate::index`])
//! ├── blobs/<alg>/<hex>       immutable content
//! └── ingest/                 in-flight writes, renamed into blobs/ on completion
//! ```
//!
//! A `Store` is a read-modify-write session: open it, mutate the tag index,
//! then [`Store::save`]. Two sessions against the same root must not overlap;
//! nothing here takes a file lock.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use policy_core::{Descriptor, Digest, Hasher, MediaType};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::index::TagIndex;
use crate::source::ContentSource;

const BLOBS_DIR: &str = "blobs";
const INGEST_DIR: &str = "ingest";
const INDEX_FILE: &str = "index.json";
const LAYOUT_FILE: &str = "oci-layout";
const LAYOUT_DOCUMENT: &[u8] = br#"{"imageLayoutVersion":"1.0.0"}"#;
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Local content-addressable store with a persisted tag index.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    index: TagIndex,
}

impl Store {
    /// Opens the store at `root`, creating the layout on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreCorrupt`] if an existing index fails
    /// validation, or an I/O error if the layout cannot be created.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use policy_store::Store;
    ///
    /// let store = Store::open("/tmp/policies-root")?;
    /// assert!(store.list().is_empty());
    /// # Ok::<(), policy_store::StoreError>(())
    /// ```
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        for dir in [root.join(BLOBS_DIR), root.join(INGEST_DIR)] {
            std::fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;
        }

        let layout = root.join(LAYOUT_FILE);
        if !layout.exists() {
            std::fs::write(&layout, LAYOUT_DOCUMENT).map_err(StoreError::io(&layout))?;
        }

        let index = TagIndex::load(&root.join(INDEX_FILE))?;
        debug!(root = %root.display(), entries = index.len(), "Opened store");

        Ok(Self { root, index })
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for in-flight writes. Files here are never visible as blobs.
    #[must_use]
    pub fn ingest_dir(&self) -> PathBuf {
        self.root.join(INGEST_DIR)
    }

    /// Returns the on-disk path of the blob for `digest`.
    #[must_use]
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join(BLOBS_DIR)
            .join(digest.algorithm())
            .join(digest.hex())
    }

    /// Returns true if a blob for `digest` is on disk.
    #[must_use]
    pub fn exists(&self, digest: &Digest) -> bool {
        self.blob_path(digest).is_file()
    }

    /// Streams `reader` into the store and returns its descriptor.
    ///
    /// The digest is computed while the bytes are written to the ingest
    /// directory; the file is then renamed into place. If a blob with the
    /// same digest already exists, the new copy is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SizeMismatch`] if `size` is given and differs from
    /// the number of bytes read, or an I/O error.
    pub fn put(&self, media_type: MediaType, reader: impl Read, size: Option<u64>) -> Result<Descriptor> {
        let (tmp, digest, written) = self.ingest(reader)?;

        if let Some(expected) = size {
            if expected != written {
                return Err(StoreError::SizeMismatch {
                    digest: digest.to_string(),
                    expected,
                    actual: written,
                });
            }
        }

        self.commit(tmp, &digest)?;
        Ok(Descriptor::new(media_type, digest, written))
    }

    /// Streams `reader` into the store, refusing content that does not match
    /// `expected`'s digest and size.
    ///
    /// Content is hashed with sha256 only, so a descriptor naming any other
    /// algorithm never verifies.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DigestMismatch`] or [`StoreError::SizeMismatch`]
    /// if the content differs from the descriptor.
    pub fn put_verified(&self, expected: &Descriptor, reader: impl Read) -> Result<Descriptor> {
        let (tmp, digest, written) = self.ingest(reader)?;

        if digest != expected.digest {
            return Err(StoreError::DigestMismatch {
                expected: expected.digest.to_string(),
                actual: digest.to_string(),
            });
        }
        if written != expected.size {
            return Err(StoreError::SizeMismatch {
                digest: expected.digest.to_string(),
                expected: expected.size,
                actual: written,
            });
        }

        self.commit(tmp, &digest)?;
        Ok(expected.clone())
    }

    /// Opens the blob behind `descriptor` for reading.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BlobNotFound`] if the blob is not on disk.
    pub fn open_blob(&self, descriptor: &Descriptor) -> Result<File> {
        let path = self.blob_path(&descriptor.digest);
        File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::BlobNotFound {
                    digest: descriptor.digest.to_string(),
                }
            } else {
                StoreError::io(&path)(e)
            }
        })
    }

    /// Exact-match lookup in the tag index.
    #[must_use]
    pub fn resolve(&self, reference: &str) -> Option<Descriptor> {
        self.index.get(reference).cloned()
    }

    /// Looks up a descriptor by digest-hex prefix. Ambiguous prefixes miss.
    #[must_use]
    pub fn resolve_by_prefix(&self, prefix: &str) -> Option<Descriptor> {
        self.index.get_by_prefix(prefix).cloned()
    }

    /// Returns an indexed descriptor with this digest, if any.
    #[must_use]
    pub fn resolve_by_digest(&self, digest: &Digest) -> Option<Descriptor> {
        self.index.get_by_digest(digest).cloned()
    }

    /// Points `reference` at `descriptor`.
    ///
    /// This is a pure index operation: the blobs behind `descriptor` need
    /// not be present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidReference`] for an empty reference.
    pub fn tag(&mut self, reference: &str, descriptor: Descriptor) -> Result<()> {
        if reference.is_empty() {
            return Err(StoreError::InvalidReference {
                reference: reference.to_string(),
            });
        }
        debug!(reference, digest = %descriptor.digest, "Tagging");
        self.index.insert(reference, descriptor);
        Ok(())
    }

    /// Removes the index entry for `reference`, returning its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the reference is not indexed.
    pub fn untag(&mut self, reference: &str) -> Result<Descriptor> {
        debug!(reference, "Untagging");
        self.index.remove(reference).ok_or_else(|| StoreError::NotFound {
            reference: reference.to_string(),
        })
    }

    /// Copies `existing` (exact reference, then digest prefix) to `new` and saves.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if `existing` resolves to nothing.
    pub fn tag_existing(&mut self, existing: &str, new: &str) -> Result<Descriptor> {
        let descriptor = self
            .resolve(existing)
            .or_else(|| self.resolve_by_prefix(existing))
            .ok_or_else(|| StoreError::NotFound {
                reference: existing.to_string(),
            })?;

        self.tag(new, descriptor.clone())?;
        self.save()?;
        info!(from = existing, to = new, digest = %descriptor.digest, "Tagged");
        Ok(descriptor)
    }

    /// Snapshot of all tag index entries.
    #[must_use]
    pub fn list(&self) -> BTreeMap<String, Descriptor> {
        self.index
            .iter()
            .map(|(reference, descriptor)| (reference.clone(), descriptor.clone()))
            .collect()
    }

    /// Persists the tag index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    pub fn save(&self) -> Result<()> {
        self.index.save(&self.root.join(INDEX_FILE))?;
        debug!(entries = self.index.len(), "Saved store index");
        Ok(())
    }

    fn ingest(&self, mut reader: impl Read) -> Result<(tempfile::NamedTempFile, Digest, u64)> {
        let dir = self.ingest_dir();
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(StoreError::io(&dir))?;
        let mut hasher = Hasher::new();
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(StoreError::io(&dir)(e)),
            };
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n]).map_err(StoreError::io(&dir))?;
        }
        tmp.as_file().sync_all().map_err(StoreError::io(&dir))?;

        let written = hasher.written();
        Ok((tmp, hasher.finalize(), written))
    }

    fn commit(&self, tmp: tempfile::NamedTempFile, digest: &Digest) -> Result<()> {
        let dest = self.blob_path(digest);
        if dest.is_file() {
            debug!(%digest, "Blob already present, discarding duplicate write");
            return Ok(());
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::io(parent))?;
        }
        tmp.persist(&dest).map_err(|e| StoreError::Io {
            path: dest.clone(),
            source: e.error,
        })?;
        debug!(%digest, "Stored blob");
        Ok(())
    }
}

impl ContentSource for Store {
    fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        let mut file = self.open_blob(descriptor)?;
        let mut bytes = Vec::with_capacity(usize::try_from(descriptor.size).unwrap_or_default());
        file.read_to_end(&mut bytes)
            .map_err(StoreError::io(&self.blob_path(&descriptor.digest)))?;
        Ok(bytes)
    }

    fn contains(&self, descriptor: &Descriptor) -> bool {
        self.exists(&descriptor.digest)
    }
}
