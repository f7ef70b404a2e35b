//! Git object model: ids, kinds, loose objects, commit and tree parsing

use std::cmp::Ordering;
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bstr::{BString, ByteSlice};
use serde::{Serialize, Serializer};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

pub use gix_object::Kind as ObjectKind;

/// Mode of a subdirectory entry in a tree.
pub const MODE_TREE: u32 = 0o040000;
/// Mode of a regular, non-executable file.
pub const MODE_BLOB: u32 = 0o100644;
/// Mode of an executable file.
pub const MODE_BLOB_EXECUTABLE: u32 = 0o100755;
/// Mode of a symbolic link.
pub const MODE_LINK: u32 = 0o120000;
/// Mode of a submodule commit.
pub const MODE_COMMIT: u32 = 0o160000;

/// 20-byte SHA-1 object id
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    pub const LEN: usize = 20;

    /// The all-zero id, used as the "absent" sentinel.
    pub const NULL: ObjectId = ObjectId([0u8; 20]);

    pub const fn new(bytes: [u8; 20]) -> Self {
        ObjectId(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 20] = bytes.try_into().ok()?;
        Some(ObjectId(raw))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let mut raw = [0u8; 20];
        hex::decode_to_slice(hex_str, &mut raw)
            .map_err(|_| Error::InvalidObjectId(hex_str.to_string()))?;
        Ok(ObjectId(raw))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// `None` for the null id, the id otherwise.
    pub fn non_null(self) -> Option<Self> {
        (!self.is_null()).then_some(self)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ObjectId::from_hex(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A git object with its content
#[derive(Debug, Clone)]
pub struct GitObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

impl GitObject {
    /// Create a GitObject from raw object data (without header)
    pub fn from_raw(kind: ObjectKind, data: Vec<u8>) -> Self {
        let id = compute_object_id(kind, &data);
        Self { id, kind, data }
    }

    /// Parse the inflated loose format ("type size\0data")
    pub fn from_loose_format(content: &[u8]) -> Result<Self> {
        let null_pos = content
            .find_byte(0)
            .ok_or_else(|| Error::Malformed("no NUL in loose object header".into()))?;
        let header = &content[..null_pos];
        let (kind, size) = header
            .split_once_str(" ")
            .ok_or_else(|| Error::Malformed(format!("bad loose object header {:?}", header.as_bstr())))?;

        let kind = ObjectKind::from_bytes(kind)
            .map_err(|_| Error::Malformed(format!("unknown object kind {:?}", kind.as_bstr())))?;
        let size: usize = size
            .to_str()
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Malformed(format!("bad object size {:?}", size.as_bstr())))?;

        let data = content[null_pos + 1..].to_vec();
        let obj = Self::from_raw(kind, data);
        if obj.data.len() != size {
            return Err(Error::corrupt_object(
                obj.id,
                format!("header says {} bytes, found {}", size, obj.data.len()),
            ));
        }
        Ok(obj)
    }

    /// Serialize to loose object format (with header)
    pub fn to_loose_format(&self) -> Vec<u8> {
        let mut result = loose_header(self.kind, self.data.len());
        result.extend_from_slice(&self.data);
        result
    }

    /// Build a tree object. Entries are put into git's tree order.
    pub fn tree(entries: &[TreeEntry]) -> Self {
        let mut sorted: Vec<&TreeEntry> = entries.iter().collect();
        sorted.sort_by(|a, b| a.cmp_tree_order(b));

        let mut data = Vec::new();
        for entry in sorted {
            data.extend_from_slice(format!("{:o} ", entry.mode).as_bytes());
            data.extend_from_slice(&entry.name);
            data.push(0);
            data.extend_from_slice(entry.id.as_bytes());
        }
        Self::from_raw(ObjectKind::Tree, data)
    }

    /// Build a commit object with identical author and committer lines.
    pub fn commit(
        tree: ObjectId,
        parents: &[ObjectId],
        ident: &str,
        timestamp: i64,
        message: &str,
    ) -> Self {
        let mut text = format!("tree {}\n", tree);
        for parent in parents {
            text.push_str(&format!("parent {}\n", parent));
        }
        text.push_str(&format!("author {} {} +0000\n", ident, timestamp));
        text.push_str(&format!("committer {} {} +0000\n", ident, timestamp));
        text.push('\n');
        text.push_str(message);
        Self::from_raw(ObjectKind::Commit, text.into_bytes())
    }

    pub fn blob(data: impl Into<Vec<u8>>) -> Self {
        Self::from_raw(ObjectKind::Blob, data.into())
    }
}

fn loose_header(kind: ObjectKind, len: usize) -> Vec<u8> {
    let mut header = kind.as_bytes().to_vec();
    header.extend_from_slice(format!(" {}\0", len).as_bytes());
    header
}

/// Compute the git SHA-1 object id from object type and data
pub fn compute_object_id(kind: ObjectKind, data: &[u8]) -> ObjectId {
    let mut hasher = Sha1::new();
    hasher.update(loose_header(kind, data.len()));
    hasher.update(data);
    let mut raw = [0u8; 20];
    raw.copy_from_slice(&hasher.finalize());
    ObjectId(raw)
}

/// Path of a loose object under an objects directory (`ab/cdef...`)
pub fn loose_object_path(objects_dir: &Path, id: &ObjectId) -> PathBuf {
    let hex = id.to_hex();
    let (dir, file) = hex.split_at(2);
    objects_dir.join(dir).join(file)
}

/// Read a zlib-compressed loose object from filesystem path
pub fn read_loose_object(path: &Path) -> Result<GitObject> {
    let file = std::fs::File::open(path)?;
    let mut decoder = flate2::read::ZlibDecoder::new(file);
    let mut content = Vec::new();
    decoder.read_to_end(&mut content)?;

    GitObject::from_loose_format(&content)
}

/// Write a loose object under `objects_dir` (creates the fan-out directory)
pub fn write_loose_object(obj: &GitObject, objects_dir: &Path) -> Result<PathBuf> {
    let obj_path = loose_object_path(objects_dir, &obj.id);
    if let Some(dir) = obj_path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let file = std::fs::File::create(&obj_path)?;
    let mut encoder = flate2::write::ZlibEncoder::new(file, flate2::Compression::default());
    encoder.write_all(&obj.to_loose_format())?;
    encoder.finish()?;

    Ok(obj_path)
}

/// The parts of a commit the metapacks care about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    /// Committer time, seconds since the epoch.
    pub timestamp: i64,
}

impl CommitInfo {
    /// Parse the header of a commit object body.
    pub fn parse(id: ObjectId, data: &[u8]) -> Result<Self> {
        let mut tree = None;
        let mut parents = Vec::new();
        let mut timestamp = None;

        for line in data.lines() {
            if line.is_empty() {
                break;
            }
            if let Some(hex) = line.strip_prefix(b"tree ") {
                tree = Some(parse_hex_id(id, hex)?);
            } else if let Some(hex) = line.strip_prefix(b"parent ") {
                parents.push(parse_hex_id(id, hex)?);
            } else if let Some(ident) = line.strip_prefix(b"committer ") {
                timestamp = Some(parse_ident_time(ident).ok_or_else(|| {
                    Error::corrupt_object(id, "malformed committer line")
                })?);
            }
        }

        Ok(CommitInfo {
            tree: tree.ok_or_else(|| Error::corrupt_object(id, "missing tree line"))?,
            parents,
            timestamp: timestamp
                .ok_or_else(|| Error::corrupt_object(id, "missing committer line"))?,
        })
    }
}

fn parse_hex_id(owner: ObjectId, hex: &[u8]) -> Result<ObjectId> {
    hex.to_str()
        .ok()
        .and_then(|s| ObjectId::from_hex(s.trim_end()).ok())
        .ok_or_else(|| Error::corrupt_object(owner, format!("bad object id {:?}", hex.as_bstr())))
}

/// "Name <email> 1234567890 +0000" -> 1234567890
fn parse_ident_time(ident: &[u8]) -> Option<i64> {
    let after_email = &ident[ident.rfind_byte(b'>')? + 1..];
    let seconds = after_email.fields().next()?;
    seconds.to_str().ok()?.parse().ok()
}

/// One entry of a tree object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: u32,
    pub name: BString,
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn new(mode: u32, name: impl Into<BString>, id: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            id,
        }
    }

    pub fn is_tree(&self) -> bool {
        self.mode & 0o170000 == MODE_TREE
    }

    /// Git orders tree entries by name, comparing subtrees as if their
    /// name carried a trailing '/'.
    pub fn cmp_tree_order(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(other.sort_key())
    }

    pub(crate) fn sort_key(&self) -> impl Iterator<Item = u8> + '_ {
        let suffix = self.is_tree().then_some(b'/');
        self.name.iter().copied().chain(suffix)
    }

    /// Parse a tree object body.
    pub fn parse_tree(id: ObjectId, data: &[u8]) -> Result<Vec<TreeEntry>> {
        let mut entries = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            let space = rest
                .find_byte(b' ')
                .ok_or_else(|| Error::corrupt_object(id, "tree entry without mode"))?;
            let mode = rest[..space]
                .to_str()
                .ok()
                .and_then(|s| u32::from_str_radix(s, 8).ok())
                .ok_or_else(|| Error::corrupt_object(id, "bad tree entry mode"))?;
            rest = &rest[space + 1..];

            let nul = rest
                .find_byte(0)
                .ok_or_else(|| Error::corrupt_object(id, "tree entry without name"))?;
            let name = BString::from(&rest[..nul]);
            rest = &rest[nul + 1..];

            if rest.len() < ObjectId::LEN {
                return Err(Error::corrupt_object(id, "truncated tree entry"));
            }
            let (raw, tail) = rest.split_at(ObjectId::LEN);
            let entry_id = ObjectId::from_slice(raw)
                .ok_or_else(|| Error::corrupt_object(id, "truncated tree entry"))?;
            rest = tail;

            entries.push(TreeEntry {
                mode,
                name,
                id: entry_id,
            });
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_compute_object_id() {
        // Known blob: "test\n" -> SHA-1: 9daeafb9864cf43055ae93beb0afd6c7d144bfa4
        let id = compute_object_id(ObjectKind::Blob, b"test\n");
        assert_eq!(id.to_hex(), "9daeafb9864cf43055ae93beb0afd6c7d144bfa4");
    }

    #[test]
    fn test_empty_tree_id() {
        let tree = GitObject::tree(&[]);
        assert_eq!(
            tree.id.to_hex(),
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904"
        );
    }

    #[test]
    fn test_loose_object_on_disk() -> Result<()> {
        let temp = TempDir::new()?;
        let obj = GitObject::blob(&b"hello world\n"[..]);

        let path = write_loose_object(&obj, temp.path())?;
        assert_eq!(path, loose_object_path(temp.path(), &obj.id));

        let read = read_loose_object(&path)?;
        assert_eq!(read.id, obj.id);
        assert_eq!(read.kind, ObjectKind::Blob);
        assert_eq!(read.data, obj.data);
        Ok(())
    }

    #[test]
    fn test_loose_format_size_mismatch() {
        let err = GitObject::from_loose_format(b"blob 3\0hello").unwrap_err();
        assert!(matches!(err, Error::CorruptObject { .. }));
    }

    #[test]
    fn test_parse_commit() {
        let tree = GitObject::tree(&[]).id;
        let p1 = compute_object_id(ObjectKind::Commit, b"p1");
        let p2 = compute_object_id(ObjectKind::Commit, b"p2");
        let commit = GitObject::commit(tree, &[p1, p2], "A U Thor <a@example.com>", 1700000000, "msg\n");

        let info = CommitInfo::parse(commit.id, &commit.data).unwrap();
        assert_eq!(info.tree, tree);
        assert_eq!(info.parents, vec![p1, p2]);
        assert_eq!(info.timestamp, 1700000000);
    }

    #[test]
    fn test_parse_commit_ignores_message_lines() {
        let tree = GitObject::tree(&[]).id;
        let body = format!(
            "tree {}\ncommitter C <c@x> 42 -0700\n\nparent {}\n",
            tree,
            ObjectId::NULL
        );
        let info = CommitInfo::parse(ObjectId::NULL, body.as_bytes()).unwrap();
        assert!(info.parents.is_empty());
        assert_eq!(info.timestamp, 42);
    }

    #[test]
    fn test_parse_commit_without_committer() {
        let body = format!("tree {}\n\n", ObjectId::NULL);
        assert!(CommitInfo::parse(ObjectId::NULL, body.as_bytes()).is_err());
    }

    #[test]
    fn test_tree_roundtrip_and_order() {
        let blob = GitObject::blob(&b"x"[..]).id;
        let sub = GitObject::tree(&[TreeEntry::new(MODE_BLOB, "inner", blob)]).id;
        // "a.c" sorts before the tree "a" because '.' < '/'.
        let entries = vec![
            TreeEntry::new(MODE_TREE, "a", sub),
            TreeEntry::new(MODE_BLOB, "a.c", blob),
            TreeEntry::new(MODE_LINK, "b", blob),
        ];
        let tree = GitObject::tree(&entries);
        let parsed = TreeEntry::parse_tree(tree.id, &tree.data).unwrap();

        let names: Vec<_> = parsed.iter().map(|e| e.name.to_string()).collect();
        assert_eq!(names, ["a.c", "a", "b"]);
        assert!(parsed[1].is_tree());
        assert_eq!(parsed[2].mode, MODE_LINK);
    }

    #[test]
    fn test_parse_truncated_tree() {
        let blob = GitObject::blob(&b"x"[..]).id;
        let tree = GitObject::tree(&[TreeEntry::new(MODE_BLOB, "f", blob)]);
        let cut = &tree.data[..tree.data.len() - 1];
        assert!(TreeEntry::parse_tree(tree.id, cut).is_err());
    }

    #[test]
    fn test_object_id_hex() {
        let id: ObjectId = "9daeafb9864cf43055ae93beb0afd6c7d144bfa4".parse().unwrap();
        assert_eq!(id.to_string(), "9daeafb9864cf43055ae93beb0afd6c7d144bfa4");
        assert!(ObjectId::from_hex("xyz").is_err());
        assert!(ObjectId::NULL.is_null());
        assert_eq!(ObjectId::NULL.non_null(), None);
    }
}
