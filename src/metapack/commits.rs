//! Commit metapack: per-commit timestamp, tree and first two parents
//!
//! Payload (version 1):
//!
//! ```text
//! u32            n
//! n x 20 bytes   commit ids, strictly ascending
//! n x 64 bytes   records in the same order:
//!                u32 committer time, tree id, parent 1, parent 2
//! ```
//!
//! A missing parent is stored as the null id.

use std::path::PathBuf;

use serde::Serialize;

use super::{ContentType, MetapackReader, MetapackWriter};
use crate::codec::ByteCursor;
use crate::error::Result;
use crate::object::{ObjectId, ObjectKind};
use crate::store::{ObjectStore, PackIndex};

pub const COMMITS_VERSION: u32 = 1;

const RECORD_LEN: usize = 4 + 3 * ObjectId::LEN;

/// What the commit metapack stores about one commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    /// Committer time, seconds since the epoch.
    pub timestamp: u32,
    pub tree: ObjectId,
    pub parent1: Option<ObjectId>,
    pub parent2: Option<ObjectId>,
}

impl CommitRecord {
    pub fn parents(&self) -> impl Iterator<Item = ObjectId> {
        self.parent1.into_iter().chain(self.parent2)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(self.tree.as_bytes());
        out.extend_from_slice(self.parent1.unwrap_or(ObjectId::NULL).as_bytes());
        out.extend_from_slice(self.parent2.unwrap_or(ObjectId::NULL).as_bytes());
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let mut cursor = ByteCursor::new(bytes);
        let timestamp = cursor.u32()?;
        let tree = ObjectId::new(cursor.array()?);
        let parent1 = ObjectId::new(cursor.array()?).non_null();
        let parent2 = ObjectId::new(cursor.array()?).non_null();
        Some(CommitRecord {
            timestamp,
            tree,
            parent1,
            parent2,
        })
    }
}

/// An opened, validated commit metapack
#[derive(Debug)]
pub struct CommitMetapack {
    reader: MetapackReader,
    count: usize,
}

impl CommitMetapack {
    /// Generate the commit metapack for `pack`.
    ///
    /// Commits with more than two parents, or whose committer time does not
    /// fit in 32 unsigned bits, are left out; lookups for them miss.
    pub fn write<P, S>(pack: &P, store: &S) -> Result<PathBuf>
    where
        P: PackIndex,
        S: ObjectStore + ?Sized,
    {
        let mut writer = MetapackWriter::open(pack, ContentType::Commits, COMMITS_VERSION)?;

        let mut admitted: Vec<(ObjectId, CommitRecord)> = Vec::new();
        let mut skipped = 0usize;
        writer.foreach_object(|_, id| {
            if store.object_kind(&id)? != ObjectKind::Commit {
                return Ok(());
            }
            let info = store.read_commit(&id)?;
            let timestamp = match u32::try_from(info.timestamp) {
                Ok(ts) if info.parents.len() <= 2 => ts,
                _ => {
                    tracing::debug!("leaving {} out of the commit metapack", id);
                    skipped += 1;
                    return Ok(());
                }
            };
            admitted.push((
                id,
                CommitRecord {
                    timestamp,
                    tree: info.tree,
                    parent1: info.parents.first().copied(),
                    parent2: info.parents.get(1).copied(),
                },
            ));
            Ok(())
        })?;

        // index order is ascending already; sort anyway so any PackIndex works
        admitted.sort_by(|a, b| a.0.cmp(&b.0));
        admitted.dedup_by(|a, b| a.0 == b.0);

        writer.append_u32(admitted.len() as u32)?;
        for (id, _) in &admitted {
            writer.append(id.as_bytes())?;
        }
        let mut records = Vec::with_capacity(admitted.len() * RECORD_LEN);
        for (_, record) in &admitted {
            record.encode(&mut records);
        }
        writer.append(&records)?;

        if skipped > 0 {
            tracing::info!("{} commit(s) not representable in the commit metapack", skipped);
        }
        writer.finish()
    }

    /// Open and validate the commit metapack of `pack`.
    pub fn open<P: PackIndex + ?Sized>(pack: &P) -> Option<Self> {
        let reader = MetapackReader::open(pack, ContentType::Commits)?;
        if reader.version() != COMMITS_VERSION {
            tracing::debug!(
                "commit metapack {:?} has unsupported version {}",
                reader.path(),
                reader.version()
            );
            return None;
        }

        let payload = reader.payload();
        let count = ByteCursor::new(payload).u32()? as usize;
        let needed = (count as u64) * (ObjectId::LEN + RECORD_LEN) as u64 + 4;
        if (payload.len() as u64) < needed {
            tracing::warn!("commit metapack {:?} is truncated", reader.path());
            return None;
        }

        let metapack = CommitMetapack { reader, count };
        let ids = metapack.ids();
        let ascending = ids
            .chunks_exact(ObjectId::LEN)
            .zip(ids.chunks_exact(ObjectId::LEN).skip(1))
            .all(|(a, b)| a < b);
        if !ascending {
            tracing::warn!(
                "commit metapack {:?} index is not sorted",
                metapack.reader.path()
            );
            return None;
        }

        Some(metapack)
    }

    /// Number of commits with a record.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn ids(&self) -> &[u8] {
        &self.reader.payload()[4..4 + self.count * ObjectId::LEN]
    }

    fn records(&self) -> &[u8] {
        let start = 4 + self.count * ObjectId::LEN;
        &self.reader.payload()[start..start + self.count * RECORD_LEN]
    }

    /// Record for `id`, if this pack's metapack has one.
    pub fn lookup(&self, id: &ObjectId) -> Option<CommitRecord> {
        let ids = self.ids();
        let wanted = &id.as_bytes()[..];
        let (mut lo, mut hi) = (0usize, self.count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let at = &ids[mid * ObjectId::LEN..(mid + 1) * ObjectId::LEN];
            match at.cmp(wanted) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => {
                    let start = mid * RECORD_LEN;
                    return CommitRecord::decode(&self.records()[start..start + RECORD_LEN]);
                }
            }
        }
        None
    }

    /// All (id, record) pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, CommitRecord)> + '_ {
        self.ids()
            .chunks_exact(ObjectId::LEN)
            .zip(self.records().chunks_exact(RECORD_LEN))
            .filter_map(|(id, record)| Some((ObjectId::from_slice(id)?, CommitRecord::decode(record)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::replace_published;
    use crate::metapack::{metapack_path, HEADER_LEN};
    use crate::object::{GitObject, TreeEntry, MODE_BLOB};
    use crate::pack::{Pack, PackWriter};
    use std::path::Path;
    use tempfile::TempDir;

    const IDENT: &str = "A U Thor <author@example.com>";

    struct History {
        tree: GitObject,
        root: GitObject,
        child: GitObject,
        merge: GitObject,
        octopus: GitObject,
    }

    fn history() -> History {
        let blob = GitObject::blob(&b"hello\n"[..]);
        let tree = GitObject::tree(&[TreeEntry::new(MODE_BLOB, "hello.txt", blob.id)]);
        let root = GitObject::commit(tree.id, &[], IDENT, 1_000, "root\n");
        let child = GitObject::commit(tree.id, &[root.id], IDENT, 2_000, "child\n");
        let side = GitObject::commit(tree.id, &[root.id], IDENT, 2_500, "side\n");
        let merge = GitObject::commit(tree.id, &[child.id, side.id], IDENT, 3_000, "merge\n");
        let octopus = GitObject::commit(
            tree.id,
            &[root.id, child.id, side.id],
            IDENT,
            4_000,
            "octopus\n",
        );
        History {
            tree,
            root,
            child,
            merge,
            octopus,
        }
    }

    fn write_pack(dir: &Path, objects: Vec<GitObject>) -> Pack {
        let mut writer = PackWriter::new();
        for obj in objects {
            writer.add(obj);
        }
        Pack::open(&writer.write(dir).unwrap()).unwrap()
    }

    fn history_pack(dir: &Path, h: &History) -> Pack {
        let blob = GitObject::blob(&b"hello\n"[..]);
        write_pack(
            dir,
            vec![
                blob,
                h.tree.clone(),
                h.root.clone(),
                h.child.clone(),
                h.merge.clone(),
                h.octopus.clone(),
            ],
        )
    }

    #[test]
    fn test_lookup_roundtrip() {
        let temp = TempDir::new().unwrap();
        let h = history();
        let pack = history_pack(temp.path(), &h);

        CommitMetapack::write(&pack, &pack).unwrap();
        let metapack = CommitMetapack::open(&pack).unwrap();

        let root = metapack.lookup(&h.root.id).unwrap();
        assert_eq!(root.timestamp, 1_000);
        assert_eq!(root.tree, h.tree.id);
        assert_eq!(root.parent1, None);
        assert_eq!(root.parent2, None);

        let child = metapack.lookup(&h.child.id).unwrap();
        assert_eq!(child.parent1, Some(h.root.id));
        assert_eq!(child.parent2, None);

        let merge = metapack.lookup(&h.merge.id).unwrap();
        assert_eq!(merge.timestamp, 3_000);
        assert_eq!(merge.parent1, Some(h.child.id));
        assert!(merge.parent2.is_some());
        assert_eq!(merge.parents().count(), 2);
    }

    #[test]
    fn test_only_admissible_commits_are_recorded() {
        let temp = TempDir::new().unwrap();
        let h = history();
        let pack = history_pack(temp.path(), &h);

        CommitMetapack::write(&pack, &pack).unwrap();
        let metapack = CommitMetapack::open(&pack).unwrap();

        // side commit is not in the pack; octopus has three parents
        assert_eq!(metapack.len(), 3);
        assert!(metapack.lookup(&h.octopus.id).is_none());
        assert!(metapack.lookup(&h.tree.id).is_none());

        let ids: Vec<_> = metapack.iter().map(|(id, _)| id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_timestamp_outside_u32_is_skipped() {
        let temp = TempDir::new().unwrap();
        let h = history();
        let late = GitObject::commit(h.tree.id, &[], IDENT, 1i64 << 33, "far future\n");
        let early = GitObject::commit(h.tree.id, &[], IDENT, -5, "before the epoch\n");
        let pack = write_pack(
            temp.path(),
            vec![h.tree.clone(), h.root.clone(), late.clone(), early.clone()],
        );

        CommitMetapack::write(&pack, &pack).unwrap();
        let metapack = CommitMetapack::open(&pack).unwrap();
        assert!(metapack.lookup(&h.root.id).is_some());
        assert!(metapack.lookup(&late.id).is_none());
        assert!(metapack.lookup(&early.id).is_none());
    }

    #[test]
    fn test_pack_without_commits() {
        let temp = TempDir::new().unwrap();
        let pack = write_pack(temp.path(), vec![GitObject::blob(&b"only a blob"[..])]);

        CommitMetapack::write(&pack, &pack).unwrap();
        let metapack = CommitMetapack::open(&pack).unwrap();
        assert!(metapack.is_empty());
        assert!(metapack.lookup(&GitObject::blob(&b"only a blob"[..]).id).is_none());
    }

    #[test]
    fn test_truncated_payload_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let h = history();
        let pack = history_pack(temp.path(), &h);
        let path = CommitMetapack::write(&pack, &pack).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        replace_published(&path, &bytes[..bytes.len() - 1]);
        assert!(CommitMetapack::open(&pack).is_none());

        // header only, not even a count
        replace_published(&path, &bytes[..HEADER_LEN]);
        assert!(CommitMetapack::open(&pack).is_none());
    }

    #[test]
    fn test_unsorted_index_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let h = history();
        let pack = history_pack(temp.path(), &h);
        let path = CommitMetapack::write(&pack, &pack).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let first = HEADER_LEN + 4;
        let (a, b) = (first..first + 20, first + 20..first + 40);
        let tmp = bytes[a.clone()].to_vec();
        bytes.copy_within(b.clone(), a.start);
        bytes[b].copy_from_slice(&tmp);
        replace_published(&path, &bytes);

        assert!(CommitMetapack::open(&pack).is_none());
    }

    #[test]
    fn test_rewrite_is_byte_identical() {
        let temp = TempDir::new().unwrap();
        let h = history();
        let pack = history_pack(temp.path(), &h);
        let path = CommitMetapack::write(&pack, &pack).unwrap();
        let first = std::fs::read(&path).unwrap();

        CommitMetapack::write(&pack, &pack).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_unknown_content_version() {
        let temp = TempDir::new().unwrap();
        let h = history();
        let pack = history_pack(temp.path(), &h);
        let path = CommitMetapack::write(&pack, &pack).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[35] = 2;
        replace_published(&path, &bytes);
        assert!(CommitMetapack::open(&pack).is_none());
    }

    #[test]
    fn test_stale_metapack_after_pack_rewrite() {
        let temp = TempDir::new().unwrap();
        let h = history();
        let pack_dir = temp.path().join("pack");
        let pack = history_pack(&pack_dir, &h);
        let path = CommitMetapack::write(&pack, &pack).unwrap();

        // a different pack at a different path, with the old metapack copied over
        let other = write_pack(&pack_dir, vec![h.tree.clone(), h.root.clone()]);
        std::fs::copy(&path, metapack_path(other.pack_path(), ContentType::Commits)).unwrap();
        assert!(CommitMetapack::open(&other).is_none());
        assert!(CommitMetapack::open(&pack).is_some());
    }

    #[test]
    fn test_open_reader_survives_republish() {
        let temp = TempDir::new().unwrap();
        let h = history();
        let pack = history_pack(temp.path(), &h);
        CommitMetapack::write(&pack, &pack).unwrap();
        let before = CommitMetapack::open(&pack).unwrap();

        // republish an empty metapack over the same name
        let mut writer = MetapackWriter::open(&pack, ContentType::Commits, COMMITS_VERSION).unwrap();
        writer.append_u32(0).unwrap();
        writer.finish().unwrap();

        assert!(before.lookup(&h.root.id).is_some());
        let after = CommitMetapack::open(&pack).unwrap();
        assert!(after.lookup(&h.root.id).is_none());
    }
}
