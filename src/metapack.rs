//! Metapacks: versioned side-index files bound to a single pack
//!
//! Every metapack starts with the same 36-byte envelope header, all integers
//! big-endian:
//!
//! ```text
//! 0..4    magic "META"
//! 4..8    envelope version (1)
//! 8..28   checksum of the pack this file is bound to
//! 28..32  content-type tag ("comm", "tree")
//! 32..36  content-format version
//! 36..    payload, defined by the content type
//! ```
//!
//! Files are written once to a staging file in the pack directory and
//! renamed into place, so a reader sees either the old file or the new one.
//! A file whose header does not match the pack it is opened for is treated
//! as if it did not exist.

pub mod commits;
pub mod context;
pub mod trees;

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::codec::{get_u32, put_u16, put_u32};
use crate::error::Result;
use crate::object::ObjectId;
use crate::repo::publish_read_only;
use crate::store::{ObjectStore, PackIndex};

pub use commits::{CommitMetapack, CommitRecord};
pub use context::MetapackContext;
pub use trees::{TreeDiffIter, TreeDiffRecord, TreeMetapack};

pub const MAGIC: [u8; 4] = *b"META";
pub const ENVELOPE_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 36;

/// What a metapack file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Commits,
    Trees,
}

impl ContentType {
    pub const ALL: [ContentType; 2] = [ContentType::Commits, ContentType::Trees];

    /// File extension and long name.
    pub fn name(self) -> &'static str {
        match self {
            ContentType::Commits => "commits",
            ContentType::Trees => "trees",
        }
    }

    /// Four-byte tag stored in the header.
    pub fn tag(self) -> [u8; 4] {
        match self {
            ContentType::Commits => *b"comm",
            ContentType::Trees => *b"tree",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Generate this metapack for `pack`, reading objects through `store`.
    pub fn write<P, S>(self, pack: &P, store: &S) -> Result<PathBuf>
    where
        P: PackIndex,
        S: ObjectStore + ?Sized,
    {
        match self {
            ContentType::Commits => CommitMetapack::write(pack, store),
            ContentType::Trees => TreeMetapack::write(pack, store),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Final location of a metapack: the pack path with its extension replaced.
pub fn metapack_path(pack_path: &Path, content_type: ContentType) -> PathBuf {
    pack_path.with_extension(content_type.name())
}

/// Staged metapack being written for one pack
///
/// Bytes go to a uniquely named `tmp_meta_*` file next to the pack. Only
/// [`MetapackWriter::finish`] moves it to its final name; dropping the writer
/// (including on any error path) deletes the staging file and leaves an
/// already published metapack untouched.
pub struct MetapackWriter<'p, P: PackIndex> {
    pack: &'p P,
    content_type: ContentType,
    final_path: PathBuf,
    out: BufWriter<NamedTempFile>,
    payload_len: u64,
}

impl<'p, P: PackIndex> MetapackWriter<'p, P> {
    pub fn open(pack: &'p P, content_type: ContentType, version: u32) -> Result<Self> {
        let final_path = metapack_path(pack.pack_path(), content_type);
        let dir = final_path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let staging = NamedTempFile::with_prefix_in("tmp_meta_", dir)?;
        tracing::debug!(
            "staging {} metapack for {:?} in {:?}",
            content_type,
            pack.pack_path(),
            staging.path()
        );

        let mut out = BufWriter::new(staging);
        out.write_all(&MAGIC)?;
        put_u32(&mut out, ENVELOPE_VERSION)?;
        out.write_all(pack.identity().as_bytes())?;
        out.write_all(&content_type.tag())?;
        put_u32(&mut out, version)?;

        Ok(MetapackWriter {
            pack,
            content_type,
            final_path,
            out,
            payload_len: 0,
        })
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        self.payload_len += bytes.len() as u64;
        Ok(())
    }

    pub fn append_u32(&mut self, v: u32) -> Result<()> {
        put_u32(&mut self.out, v)?;
        self.payload_len += 4;
        Ok(())
    }

    pub fn append_u16(&mut self, v: u16) -> Result<()> {
        put_u16(&mut self.out, v)?;
        self.payload_len += 2;
        Ok(())
    }

    /// Visit every object of the bound pack in index (ascending id) order.
    pub fn foreach_object<F>(&self, each: F) -> Result<()>
    where
        F: FnMut(u32, ObjectId) -> Result<()>,
    {
        self.pack.foreach_object(each)
    }

    /// Flush, fsync and atomically rename the staging file into place,
    /// read-only.
    pub fn finish(self) -> Result<PathBuf> {
        let staging = self.out.into_inner().map_err(|e| e.into_error())?;
        publish_read_only(staging, &self.final_path)?;

        tracing::info!(
            "wrote {} metapack {:?} ({} payload bytes)",
            self.content_type,
            self.final_path,
            self.payload_len
        );
        Ok(self.final_path)
    }
}

/// A validated, memory-mapped metapack
pub struct MetapackReader {
    path: PathBuf,
    map: Mmap,
    version: u32,
}

impl fmt::Debug for MetapackReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetapackReader")
            .field("path", &self.path)
            .field("version", &self.version)
            .field("len", &self.map.len())
            .finish()
    }
}

impl MetapackReader {
    /// Open the `content_type` metapack of `pack`.
    ///
    /// Returns `None` when the file is missing, shorter than the header, or
    /// has the wrong magic, envelope version, pack checksum or content tag.
    pub fn open<P: PackIndex + ?Sized>(pack: &P, content_type: ContentType) -> Option<Self> {
        let path = metapack_path(pack.pack_path(), content_type);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no {} metapack at {:?}", content_type, path);
                return None;
            }
            Err(e) => {
                tracing::warn!("unable to open metapack {:?}: {}", path, e);
                return None;
            }
        };

        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        if len < HEADER_LEN as u64 {
            tracing::warn!("metapack {:?} does not have a valid header", path);
            return None;
        }

        // Safety: metapacks are never modified in place; a rewrite publishes
        // a new file by rename, which leaves this mapping intact.
        let map = match unsafe { Mmap::map(&file) } {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!("unable to map metapack {:?}: {}", path, e);
                return None;
            }
        };
        if map.len() < HEADER_LEN {
            tracing::warn!("metapack {:?} does not have a valid header", path);
            return None;
        }

        if map[0..4] != MAGIC || get_u32(&map[4..8]) != ENVELOPE_VERSION {
            tracing::warn!("metapack {:?} does not have a valid header", path);
            return None;
        }
        if map[8..28] != pack.identity().as_bytes()[..] {
            tracing::warn!(
                "metapack {:?} does not match pack {}",
                path,
                pack.identity()
            );
            return None;
        }
        if map[28..32] != content_type.tag() {
            tracing::warn!(
                "metapack {:?} does not have expected header id {:?}",
                path,
                content_type.name()
            );
            return None;
        }
        let version = get_u32(&map[32..36]);

        Some(MetapackReader { path, map, version })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Content-format version from the header.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Everything after the header.
    pub fn payload(&self) -> &[u8] {
        &self.map[HEADER_LEN..]
    }
}
