//! Reader for git `.idx` files (version 2)

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::codec::{get_u32, get_u64};
use crate::error::{Error, Result};
use crate::object::ObjectId;

const IDX_MAGIC: [u8; 4] = [0xff, b't', b'O', b'c'];
const IDX_VERSION: u32 = 2;
const HEADER_LEN: usize = 8;
const FANOUT_LEN: usize = 256 * 4;
const TABLES_START: usize = HEADER_LEN + FANOUT_LEN;
const TRAILER_LEN: usize = 2 * ObjectId::LEN;
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

/// Memory-mapped pack index
pub struct PackIdx {
    path: PathBuf,
    map: Mmap,
    count: u32,
}

impl std::fmt::Debug for PackIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackIdx")
            .field("path", &self.path)
            .field("count", &self.count)
            .finish()
    }
}

impl PackIdx {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < (TABLES_START + TRAILER_LEN) as u64 {
            return Err(Error::corrupt_pack(path, "index file too small"));
        }

        // Safety: pack indexes are immutable once published; we only read.
        let map = unsafe { Mmap::map(&file) }?;

        if map[..4] != IDX_MAGIC {
            // Version 1 indexes have no magic and start straight with the fan-out.
            return Err(Error::UnsupportedIndexVersion {
                path: path.to_path_buf(),
                version: 1,
            });
        }
        let version = get_u32(&map[4..8]);
        if version != IDX_VERSION {
            return Err(Error::UnsupportedIndexVersion {
                path: path.to_path_buf(),
                version,
            });
        }

        let mut previous = 0;
        for bucket in 0..256 {
            let at = HEADER_LEN + bucket * 4;
            let value = get_u32(&map[at..at + 4]);
            if value < previous {
                return Err(Error::corrupt_pack(path, "non-monotonic fan-out table"));
            }
            previous = value;
        }
        let count = previous;

        let n = count as usize;
        let fixed = TABLES_START + n * (ObjectId::LEN + 4 + 4) + TRAILER_LEN;
        if map.len() < fixed {
            return Err(Error::corrupt_pack(path, "index truncated"));
        }

        let idx = PackIdx {
            path: path.to_path_buf(),
            map,
            count,
        };

        let large = (0..count)
            .filter(|&i| idx.raw_offset(i) & LARGE_OFFSET_FLAG != 0)
            .count();
        if idx.map.len() < fixed + large * 8 {
            return Err(Error::corrupt_pack(path, "index large-offset table truncated"));
        }

        Ok(idx)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Checksum of the pack this index describes.
    pub fn pack_checksum(&self) -> ObjectId {
        let at = self.map.len() - TRAILER_LEN;
        ObjectId::from_slice(&self.map[at..at + ObjectId::LEN]).unwrap_or_default()
    }

    fn fanout(&self, byte: usize) -> u32 {
        let at = HEADER_LEN + byte * 4;
        get_u32(&self.map[at..at + 4])
    }

    fn id_bytes(&self, ordinal: u32) -> &[u8] {
        let at = TABLES_START + ordinal as usize * ObjectId::LEN;
        &self.map[at..at + ObjectId::LEN]
    }

    pub fn id_at(&self, ordinal: u32) -> Option<ObjectId> {
        if ordinal >= self.count {
            return None;
        }
        ObjectId::from_slice(self.id_bytes(ordinal))
    }

    fn raw_offset(&self, ordinal: u32) -> u32 {
        let at = TABLES_START + self.count as usize * (ObjectId::LEN + 4) + ordinal as usize * 4;
        get_u32(&self.map[at..at + 4])
    }

    /// Byte offset of the object's entry inside the `.pack` file.
    pub fn offset_at(&self, ordinal: u32) -> Option<u64> {
        if ordinal >= self.count {
            return None;
        }
        let raw = self.raw_offset(ordinal);
        if raw & LARGE_OFFSET_FLAG == 0 {
            return Some(raw as u64);
        }

        let slot = (raw & !LARGE_OFFSET_FLAG) as usize;
        let at = TABLES_START + self.count as usize * (ObjectId::LEN + 8) + slot * 8;
        let bytes = self.map.get(at..at + 8)?;
        if at + 8 > self.map.len() - TRAILER_LEN {
            return None;
        }
        Some(get_u64(bytes))
    }

    /// Binary search within the fan-out bucket of `id`.
    pub fn lookup(&self, id: &ObjectId) -> Option<u32> {
        let first = id.as_bytes()[0] as usize;
        let mut lo = if first == 0 { 0 } else { self.fanout(first - 1) };
        let mut hi = self.fanout(first);

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.id_bytes(mid).cmp(&id.as_bytes()[..]) {
                std::cmp::Ordering::Equal => return Some(mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }
}
