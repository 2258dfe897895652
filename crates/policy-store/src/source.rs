//! Read access to blob content, independent of where it lives.

use policy_core::Descriptor;

use crate::error::Result;
use crate::memory::MemoryStore;
use crate::store::Store;

/// Something that can hand out blob bytes by descriptor.
///
/// The transfer copy engine reads every outgoing blob through this trait, so a
/// push can mix content synthesized in memory with layers already on disk.
pub trait ContentSource: Send + Sync {
    /// Returns the bytes behind `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::BlobNotFound`] if the content is not held here.
    fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>>;

    /// Returns true if the content behind `descriptor` is held here.
    fn contains(&self, descriptor: &Descriptor) -> bool;
}

/// Memory first, then disk.
#[derive(Debug, Clone, Copy)]
pub struct Overlay<'a> {
    upper: &'a MemoryStore,
    lower: &'a Store,
}

impl<'a> Overlay<'a> {
    /// Layers `upper` over `lower`.
    #[must_use]
    pub const fn new(upper: &'a MemoryStore, lower: &'a Store) -> Self {
        Self { upper, lower }
    }
}

impl ContentSource for Overlay<'_> {
    fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        if self.upper.contains(descriptor) {
            return self.upper.fetch(descriptor);
        }
        self.lower.fetch(descriptor)
    }

    fn contains(&self, descriptor: &Descriptor) -> bool {
        self.upper.contains(descriptor) || self.lower.contains(descriptor)
    }
}
