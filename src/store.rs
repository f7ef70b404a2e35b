//! Collaborator contracts the metapack layer is written against.
//!
//! A [`PackIndex`] is one pack's sorted object table: it maps ids to
//! pack-local ordinals and back. An [`ObjectStore`] reads and parses objects,
//! wherever they live. [`crate::pack::Pack`] implements both for a single
//! pack; [`crate::repo::Repository`] implements [`ObjectStore`] across every
//! pack and loose object of an objects directory.

use std::path::Path;

use crate::error::{Error, Result};
use crate::object::{CommitInfo, ObjectId, ObjectKind, TreeEntry};

/// Ordinal value meaning "no object".
pub const NO_ORDINAL: u32 = 0xffff_ffff;

/// Sorted id table of one pack
pub trait PackIndex: Send + Sync {
    /// Trailing checksum of the pack file, which identifies it.
    fn identity(&self) -> ObjectId;

    /// Path of the `.pack` file; metapacks live next to it.
    fn pack_path(&self) -> &Path;

    /// Number of objects in the pack.
    fn object_count(&self) -> u32;

    /// Id stored at `ordinal` in sorted order.
    fn id_of_ordinal(&self, ordinal: u32) -> Option<ObjectId>;

    /// Position of `id` in sorted order, if the pack has it.
    fn ordinal_of(&self, id: &ObjectId) -> Option<u32>;

    /// Visit every object id in the index's native (ascending) order.
    fn foreach_object<F>(&self, mut each: F) -> Result<()>
    where
        F: FnMut(u32, ObjectId) -> Result<()>,
        Self: Sized,
    {
        for ordinal in 0..self.object_count() {
            if let Some(id) = self.id_of_ordinal(ordinal) {
                each(ordinal, id)?;
            }
        }
        Ok(())
    }
}

/// Object reads, as used when generating metapacks
pub trait ObjectStore {
    /// Kind of the object, without inflating its body where possible.
    fn object_kind(&self, id: &ObjectId) -> Result<ObjectKind>;

    /// Inflated object body (no loose header).
    fn read_object(&self, id: &ObjectId) -> Result<(ObjectKind, Vec<u8>)>;

    fn read_commit(&self, id: &ObjectId) -> Result<CommitInfo> {
        let data = self.read_expecting(id, ObjectKind::Commit)?;
        CommitInfo::parse(*id, &data)
    }

    fn read_tree(&self, id: &ObjectId) -> Result<Vec<TreeEntry>> {
        let data = self.read_expecting(id, ObjectKind::Tree)?;
        TreeEntry::parse_tree(*id, &data)
    }

    fn read_expecting(&self, id: &ObjectId, expected: ObjectKind) -> Result<Vec<u8>> {
        let (actual, data) = self.read_object(id)?;
        if actual != expected {
            return Err(Error::UnexpectedKind {
                id: *id,
                expected,
                actual,
            });
        }
        Ok(data)
    }
}

/// `ordinal_of` with the null id mapped to [`NO_ORDINAL`].
pub fn ordinal_or_absent<P: PackIndex + ?Sized>(pack: &P, id: &ObjectId) -> Option<u32> {
    if id.is_null() {
        return Some(NO_ORDINAL);
    }
    pack.ordinal_of(id)
}

/// `id_of_ordinal` with [`NO_ORDINAL`] mapped to `Some(None)`.
pub fn id_or_absent<P: PackIndex + ?Sized>(pack: &P, ordinal: u32) -> Option<Option<ObjectId>> {
    if ordinal == NO_ORDINAL {
        return Some(None);
    }
    pack.id_of_ordinal(ordinal).map(Some)
}
