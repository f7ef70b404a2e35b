//! Tree metapack: precomputed first-parent tree diffs
//!
//! Payload (version 1), every offset relative to the start of the payload:
//!
//! ```text
//! u32              n
//! n x 12 bytes     index, sorted by commit id:
//!                  u32 commit ordinal, u32 parent ordinal, u32 diff offset
//! diff stream      per indexed commit, a run of 16-byte records
//!                  u32 path offset, u16 old mode, u16 new mode,
//!                  u32 old blob ordinal, u32 new blob ordinal
//!                  closed by a u32 zero
//! path table       sorted, distinct, NUL-terminated paths
//! ```
//!
//! Ordinals are positions in the bound pack's index. A blob missing on one
//! side of the change has mode 0 and ordinal `0xffffffff`. Only commits with
//! exactly one parent are indexed, and only when the commit, its parent and
//! every blob in the diff live in this pack.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use bstr::{BStr, BString, ByteSlice};

use super::{ContentType, MetapackReader, MetapackWriter};
use crate::codec::ByteCursor;
use crate::diff::diff_trees;
use crate::error::{Error, Result};
use crate::object::{ObjectId, ObjectKind};
use crate::store::{id_or_absent, ordinal_or_absent, ObjectStore, PackIndex};

pub const TREES_VERSION: u32 = 1;

const INDEX_ENTRY_LEN: usize = 12;
const RECORD_LEN: usize = 16;
const TERMINATOR_LEN: usize = 4;

/// One changed path from a precomputed diff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeDiffRecord<'a> {
    pub path: &'a BStr,
    pub old_mode: u16,
    pub new_mode: u16,
    pub old_id: Option<ObjectId>,
    pub new_id: Option<ObjectId>,
}

struct PendingChange {
    path: BString,
    old_mode: u16,
    new_mode: u16,
    old_ordinal: u32,
    new_ordinal: u32,
}

struct PendingCommit {
    id: ObjectId,
    ordinal: u32,
    parent_ordinal: u32,
    changes: Vec<PendingChange>,
}

/// An opened, validated tree metapack
pub struct TreeMetapack {
    reader: MetapackReader,
    pack: Arc<dyn PackIndex>,
    count: usize,
}

impl std::fmt::Debug for TreeMetapack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeMetapack")
            .field("reader", &self.reader)
            .field("count", &self.count)
            .finish()
    }
}

impl TreeMetapack {
    /// Generate the tree metapack for `pack`.
    pub fn write<P, S>(pack: &P, store: &S) -> Result<PathBuf>
    where
        P: PackIndex,
        S: ObjectStore + ?Sized,
    {
        let mut writer = MetapackWriter::open(pack, ContentType::Trees, TREES_VERSION)?;

        let mut commits = Vec::new();
        let mut paths = BTreeSet::new();
        writer.foreach_object(|ordinal, id| {
            if store.object_kind(&id)? != ObjectKind::Commit {
                return Ok(());
            }
            if let Some(pending) = collect_commit(pack, store, ordinal, id)? {
                for change in &pending.changes {
                    paths.insert(change.path.clone());
                }
                commits.push(pending);
            }
            Ok(())
        })?;
        commits.sort_by(|a, b| a.id.cmp(&b.id));

        let index_end = 4 + commits.len() * INDEX_ENTRY_LEN;
        let stream_len: usize = commits
            .iter()
            .map(|c| c.changes.len() * RECORD_LEN + TERMINATOR_LEN)
            .sum();

        let mut path_offsets = BTreeMap::new();
        let mut next = index_end + stream_len;
        for path in &paths {
            path_offsets.insert(path, payload_offset(next)?);
            next += path.len() + 1;
        }
        payload_offset(next)?;

        writer.append_u32(commits.len() as u32)?;
        let mut diff_offset = index_end;
        for commit in &commits {
            writer.append_u32(commit.ordinal)?;
            writer.append_u32(commit.parent_ordinal)?;
            writer.append_u32(payload_offset(diff_offset)?)?;
            diff_offset += commit.changes.len() * RECORD_LEN + TERMINATOR_LEN;
        }

        for commit in &commits {
            for change in &commit.changes {
                // every change path was inserted above
                let path_offset = path_offsets.get(&change.path).copied().unwrap_or(0);
                writer.append_u32(path_offset)?;
                writer.append_u16(change.old_mode)?;
                writer.append_u16(change.new_mode)?;
                writer.append_u32(change.old_ordinal)?;
                writer.append_u32(change.new_ordinal)?;
            }
            writer.append_u32(0)?;
        }

        for path in &paths {
            writer.append(path)?;
            writer.append(&[0])?;
        }

        tracing::debug!(
            "tree metapack for {}: {} diffs, {} distinct paths",
            pack.identity(),
            commits.len(),
            paths.len()
        );
        writer.finish()
    }

    /// Open and validate the tree metapack of `pack`.
    pub fn open(pack: Arc<dyn PackIndex>) -> Option<Self> {
        let reader = MetapackReader::open(pack.as_ref(), ContentType::Trees)?;
        if reader.version() != TREES_VERSION {
            tracing::debug!(
                "tree metapack {:?} has unsupported version {}",
                reader.path(),
                reader.version()
            );
            return None;
        }

        let payload = reader.payload();
        let count = ByteCursor::new(payload).u32()? as usize;
        let needed = (count as u64) * INDEX_ENTRY_LEN as u64 + 4;
        if (payload.len() as u64) < needed {
            tracing::warn!("tree metapack {:?} is truncated", reader.path());
            return None;
        }

        let metapack = TreeMetapack {
            reader,
            pack,
            count,
        };
        let intact = (0..count).all(|i| {
            metapack
                .index_entry(i)
                .and_then(|(_, _, offset)| metapack.validate_run(offset as usize))
                .is_some()
        });
        if !intact {
            tracing::warn!(
                "tree metapack {:?} has a damaged diff stream",
                metapack.reader.path()
            );
            return None;
        }
        Some(metapack)
    }

    /// Number of indexed commits.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn index_end(&self) -> usize {
        4 + self.count * INDEX_ENTRY_LEN
    }

    /// (commit ordinal, parent ordinal, diff offset) of index entry `i`.
    fn index_entry(&self, i: usize) -> Option<(u32, u32, u32)> {
        let mut cursor = ByteCursor::at(self.reader.payload(), 4 + i * INDEX_ENTRY_LEN)?;
        Some((cursor.u32()?, cursor.u32()?, cursor.u32()?))
    }

    /// Precomputed diff of `commit` against `parent`.
    ///
    /// Misses when the commit is not indexed or was indexed against another
    /// parent. Every diff run was bounds-checked at open, so a hit yields the
    /// complete diff.
    pub fn lookup(&self, commit: &ObjectId, parent: &ObjectId) -> Option<TreeDiffIter<'_>> {
        let (_, parent_ordinal, diff_offset) = self.find(commit)?;
        if self.pack.id_of_ordinal(parent_ordinal) != Some(*parent) {
            return None;
        }

        let start = diff_offset as usize;
        let records = self.validate_run(start)?;
        Some(TreeDiffIter {
            payload: self.reader.payload(),
            pack: self.pack.as_ref(),
            pos: start,
            remaining: records,
        })
    }

    fn find(&self, commit: &ObjectId) -> Option<(u32, u32, u32)> {
        let (mut lo, mut hi) = (0usize, self.count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.index_entry(mid)?;
            let Some(at) = self.pack.id_of_ordinal(entry.0) else {
                tracing::warn!(
                    "tree metapack {:?}: commit ordinal {} out of range",
                    self.reader.path(),
                    entry.0
                );
                return None;
            };
            match at.cmp(commit) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(entry),
            }
        }
        None
    }

    /// Walk the run at `start` up to its terminator, checking that every path
    /// offset and blob ordinal resolves; returns the record count.
    fn validate_run(&self, start: usize) -> Option<usize> {
        let payload = self.reader.payload();
        let index_end = self.index_end();
        if start < index_end {
            return None;
        }
        let mut cursor = ByteCursor::at(payload, start)?;
        let mut records = 0;
        loop {
            let path_offset = cursor.u32()? as usize;
            if path_offset == 0 {
                return Some(records);
            }
            cursor.skip(4)?;
            let old_ordinal = cursor.u32()?;
            let new_ordinal = cursor.u32()?;

            if path_offset < index_end {
                return None;
            }
            ByteCursor::at(payload, path_offset)?.c_str()?;
            id_or_absent(self.pack.as_ref(), old_ordinal)?;
            id_or_absent(self.pack.as_ref(), new_ordinal)?;
            records += 1;
        }
    }
}

/// Records of one precomputed diff, in tree order.
pub struct TreeDiffIter<'a> {
    payload: &'a [u8],
    pack: &'a dyn PackIndex,
    pos: usize,
    remaining: usize,
}

impl<'a> Iterator for TreeDiffIter<'a> {
    type Item = TreeDiffRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let mut cursor = ByteCursor::at(self.payload, self.pos)?;
        let path_offset = cursor.u32()? as usize;
        let old_mode = cursor.u16()?;
        let new_mode = cursor.u16()?;
        let old_ordinal = cursor.u32()?;
        let new_ordinal = cursor.u32()?;
        let path = ByteCursor::at(self.payload, path_offset)?.c_str()?;

        let old_id = id_or_absent(self.pack, old_ordinal)?;
        let new_id = id_or_absent(self.pack, new_ordinal)?;

        self.pos = cursor.position();
        self.remaining -= 1;
        Some(TreeDiffRecord {
            path: path.as_bstr(),
            old_mode,
            new_mode,
            old_id,
            new_id,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for TreeDiffIter<'_> {}

/// First-parent diff of the commit at `ordinal`, if it can be indexed.
fn collect_commit<P, S>(pack: &P, store: &S, ordinal: u32, id: ObjectId) -> Result<Option<PendingCommit>>
where
    P: PackIndex,
    S: ObjectStore + ?Sized,
{
    let info = store.read_commit(&id)?;
    let [parent] = info.parents[..] else {
        return Ok(None);
    };
    let Some(parent_ordinal) = pack.ordinal_of(&parent) else {
        return Ok(None);
    };

    let parent_tree = match store.read_commit(&parent) {
        Ok(parent_info) => parent_info.tree,
        Err(Error::ObjectNotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    let diff = match diff_trees(store, Some(&parent_tree), Some(&info.tree)) {
        Ok(diff) => diff,
        Err(Error::ObjectNotFound(missing)) => {
            tracing::debug!("cannot diff {}: {} is missing", id, missing);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let mut changes = Vec::with_capacity(diff.len());
    for entry in diff {
        let (Ok(old_mode), Ok(new_mode)) = (u16::try_from(entry.old_mode), u16::try_from(entry.new_mode))
        else {
            tracing::debug!("{}: mode of {} does not fit in 16 bits", id, entry.path);
            return Ok(None);
        };
        let old_ordinal = ordinal_or_absent(pack, &entry.old_id.unwrap_or(ObjectId::NULL));
        let new_ordinal = ordinal_or_absent(pack, &entry.new_id.unwrap_or(ObjectId::NULL));
        let (Some(old_ordinal), Some(new_ordinal)) = (old_ordinal, new_ordinal) else {
            tracing::debug!("{}: blob for {} is not in this pack", id, entry.path);
            return Ok(None);
        };
        changes.push(PendingChange {
            path: entry.path,
            old_mode,
            new_mode,
            old_ordinal,
            new_ordinal,
        });
    }

    Ok(Some(PendingCommit {
        id,
        ordinal,
        parent_ordinal,
        changes,
    }))
}

fn payload_offset(offset: usize) -> Result<u32> {
    u32::try_from(offset).map_err(|_| Error::OffsetOverflow {
        what: "tree metapack payload",
        offset: offset as u64,
    })
}
