//! Git pack files: the object store the metapacks are bound to
//!
//! A [`Pack`] pairs a memory-mapped `.idx` (sorted ids, ordinals, offsets)
//! with the memory-mapped `.pack` it describes, and resolves `OFS_DELTA` /
//! `REF_DELTA` chains when objects are read.

pub mod delta;
pub mod index;
pub mod writer;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use memmap2::Mmap;

use crate::codec::{get_u32, ByteCursor};
use crate::error::{Error, Result};
use crate::object::{ObjectId, ObjectKind};
use crate::store::{ObjectStore, PackIndex};

pub use delta::apply_delta;
pub use index::PackIdx;
pub use writer::PackWriter;

const PACK_HEADER_LEN: usize = 12;
const OBJ_OFS_DELTA: u8 = 6;
const OBJ_REF_DELTA: u8 = 7;
/// Longest delta chain we follow before calling the pack corrupt.
const MAX_DELTA_DEPTH: usize = 4096;

pub(crate) fn type_code(kind: ObjectKind) -> u8 {
    match kind {
        ObjectKind::Commit => 1,
        ObjectKind::Tree => 2,
        ObjectKind::Blob => 3,
        ObjectKind::Tag => 4,
    }
}

fn kind_of_code(code: u8) -> Option<ObjectKind> {
    match code {
        1 => Some(ObjectKind::Commit),
        2 => Some(ObjectKind::Tree),
        3 => Some(ObjectKind::Blob),
        4 => Some(ObjectKind::Tag),
        _ => None,
    }
}

/// Decoded entry header at some offset in the pack
enum EntryBase {
    Whole(ObjectKind),
    Offset(u64),
    Ref(ObjectId),
}

struct Entry {
    base: EntryBase,
    /// Inflated size of the body (the delta for delta entries).
    size: usize,
    /// Where the zlib stream starts.
    data_start: usize,
}

/// An opened pack: `.idx` plus `.pack`
pub struct Pack {
    idx: PackIdx,
    pack_path: PathBuf,
    data: Mmap,
}

impl std::fmt::Debug for Pack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pack")
            .field("pack_path", &self.pack_path)
            .field("objects", &self.idx.count())
            .finish()
    }
}

impl Pack {
    /// Open a pack from its `.idx` path; the `.pack` must sit next to it.
    pub fn open(idx_path: &Path) -> Result<Self> {
        let idx = PackIdx::open(idx_path)?;
        let pack_path = idx_path.with_extension("pack");

        let file = File::open(&pack_path)?;
        let len = file.metadata()?.len() as usize;
        if len < PACK_HEADER_LEN + ObjectId::LEN {
            return Err(Error::corrupt_pack(&pack_path, "pack file too small"));
        }
        // Safety: packs are immutable once published; we only read.
        let data = unsafe { Mmap::map(&file) }?;

        if &data[..4] != b"PACK" {
            return Err(Error::corrupt_pack(&pack_path, "bad pack signature"));
        }
        let version = get_u32(&data[4..8]);
        if version != 2 && version != 3 {
            return Err(Error::corrupt_pack(
                &pack_path,
                format!("unsupported pack version {}", version),
            ));
        }
        let count = get_u32(&data[8..12]);
        if count != idx.count() {
            return Err(Error::corrupt_pack(
                &pack_path,
                format!("pack has {} objects, index has {}", count, idx.count()),
            ));
        }
        let trailer = &data[len - ObjectId::LEN..];
        if trailer != idx.pack_checksum().as_bytes() {
            return Err(Error::corrupt_pack(
                &pack_path,
                "pack checksum does not match its index",
            ));
        }

        tracing::debug!("opened pack {:?} ({} objects)", pack_path, count);
        Ok(Pack {
            idx,
            pack_path,
            data,
        })
    }

    pub fn idx_path(&self) -> &Path {
        self.idx.path()
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.idx.lookup(id).is_some()
    }

    fn offset_of(&self, id: &ObjectId) -> Option<u64> {
        self.idx.lookup(id).and_then(|ordinal| self.idx.offset_at(ordinal))
    }

    fn corrupt(&self, reason: impl Into<String>) -> Error {
        Error::corrupt_pack(&self.pack_path, reason)
    }

    fn entry_at(&self, offset: u64) -> Result<Entry> {
        let body_end = self.data.len() - ObjectId::LEN;
        let start = usize::try_from(offset)
            .ok()
            .filter(|&o| (PACK_HEADER_LEN..body_end).contains(&o))
            .ok_or_else(|| self.corrupt(format!("entry offset {} out of range", offset)))?;
        let mut cursor = ByteCursor::at(&self.data[..body_end], start)
            .ok_or_else(|| self.corrupt("entry offset out of range"))?;
        let truncated = || self.corrupt(format!("truncated entry header at {}", offset));

        let mut byte = cursor.array::<1>().ok_or_else(truncated)?[0];
        let code = (byte >> 4) & 0x07;
        let mut size = (byte & 0x0f) as usize;
        let mut shift = 4;
        while byte & 0x80 != 0 {
            byte = cursor.array::<1>().ok_or_else(truncated)?[0];
            if shift > 57 {
                return Err(self.corrupt("entry size overflows"));
            }
            size |= ((byte & 0x7f) as usize) << shift;
            shift += 7;
        }

        let base = match code {
            OBJ_OFS_DELTA => {
                let mut byte = cursor.array::<1>().ok_or_else(truncated)?[0];
                let mut distance = (byte & 0x7f) as u64;
                while byte & 0x80 != 0 {
                    byte = cursor.array::<1>().ok_or_else(truncated)?[0];
                    if distance > offset {
                        return Err(self.corrupt(format!("bad delta base distance at {}", offset)));
                    }
                    distance = ((distance + 1) << 7) | (byte & 0x7f) as u64;
                }
                let base_offset = offset
                    .checked_sub(distance)
                    .filter(|&b| distance != 0 && b >= PACK_HEADER_LEN as u64)
                    .ok_or_else(|| self.corrupt(format!("bad delta base distance at {}", offset)))?;
                EntryBase::Offset(base_offset)
            }
            OBJ_REF_DELTA => {
                let raw = cursor.array::<20>().ok_or_else(truncated)?;
                EntryBase::Ref(ObjectId::new(raw))
            }
            other => EntryBase::Whole(
                kind_of_code(other)
                    .ok_or_else(|| self.corrupt(format!("unknown object type {}", other)))?,
            ),
        };

        Ok(Entry {
            base,
            size,
            data_start: cursor.position(),
        })
    }

    fn inflate(&self, entry: &Entry) -> Result<Vec<u8>> {
        let body_end = self.data.len() - ObjectId::LEN;
        let mut decoder = ZlibDecoder::new(&self.data[entry.data_start..body_end]);
        let mut out = Vec::with_capacity(entry.size.min(1 << 20));
        decoder
            .by_ref()
            .take(entry.size as u64 + 1)
            .read_to_end(&mut out)?;
        if out.len() != entry.size {
            return Err(self.corrupt(format!(
                "entry at {} inflated to {} bytes, expected {}",
                entry.data_start,
                out.len(),
                entry.size
            )));
        }
        Ok(out)
    }

    /// Offset of the entry a delta entry is based on.
    fn delta_base(&self, base: &EntryBase) -> Result<u64> {
        match base {
            EntryBase::Whole(_) => Err(self.corrupt("not a delta entry")),
            EntryBase::Offset(offset) => Ok(*offset),
            EntryBase::Ref(id) => self
                .offset_of(id)
                .ok_or_else(|| self.corrupt(format!("delta base {} not in pack", id))),
        }
    }

    fn kind_at(&self, offset: u64) -> Result<ObjectKind> {
        let mut offset = offset;
        for _ in 0..MAX_DELTA_DEPTH {
            let entry = self.entry_at(offset)?;
            if let EntryBase::Whole(kind) = entry.base {
                return Ok(kind);
            }
            offset = self.delta_base(&entry.base)?;
        }
        Err(self.corrupt("delta chain too deep"))
    }

    fn read_at(&self, offset: u64) -> Result<(ObjectKind, Vec<u8>)> {
        // Walk down to the whole object, then apply deltas on the way back up.
        let mut deltas: Vec<Vec<u8>> = Vec::new();
        let mut offset = offset;
        while deltas.len() < MAX_DELTA_DEPTH {
            let entry = self.entry_at(offset)?;
            if let EntryBase::Whole(kind) = entry.base {
                let mut data = self.inflate(&entry)?;
                while let Some(delta) = deltas.pop() {
                    data = apply_delta(&data, &delta)?;
                }
                return Ok((kind, data));
            }
            deltas.push(self.inflate(&entry)?);
            offset = self.delta_base(&entry.base)?;
        }
        Err(self.corrupt("delta chain too deep"))
    }
}

impl PackIndex for Pack {
    fn identity(&self) -> ObjectId {
        self.idx.pack_checksum()
    }

    fn pack_path(&self) -> &Path {
        &self.pack_path
    }

    fn object_count(&self) -> u32 {
        self.idx.count()
    }

    fn id_of_ordinal(&self, ordinal: u32) -> Option<ObjectId> {
        self.idx.id_at(ordinal)
    }

    fn ordinal_of(&self, id: &ObjectId) -> Option<u32> {
        self.idx.lookup(id)
    }
}

impl ObjectStore for Pack {
    fn object_kind(&self, id: &ObjectId) -> Result<ObjectKind> {
        let offset = self.offset_of(id).ok_or(Error::ObjectNotFound(*id))?;
        self.kind_at(offset)
    }

    fn read_object(&self, id: &ObjectId) -> Result<(ObjectKind, Vec<u8>)> {
        let offset = self.offset_of(id).ok_or(Error::ObjectNotFound(*id))?;
        self.read_at(offset)
    }
}
