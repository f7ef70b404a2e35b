//! Recursive tree-to-tree diff
//!
//! Walks two trees in git's entry order and reports every changed blob-level
//! path. Subtrees are descended into rather than reported; renames are not
//! detected; a path that turns from a file into a directory shows up as a
//! deletion plus additions underneath it.

use std::cmp::Ordering;

use bstr::BString;

use crate::error::Result;
use crate::object::{ObjectId, TreeEntry};
use crate::store::ObjectStore;

/// One changed path. An absent side has mode 0 and no id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub path: BString,
    pub old_mode: u32,
    pub new_mode: u32,
    pub old_id: Option<ObjectId>,
    pub new_id: Option<ObjectId>,
}

/// Diff `old` against `new`; `None` stands for an empty tree.
pub fn diff_trees<S: ObjectStore + ?Sized>(
    store: &S,
    old: Option<&ObjectId>,
    new: Option<&ObjectId>,
) -> Result<Vec<DiffEntry>> {
    let mut out = Vec::new();
    diff_level(store, b"", old, new, &mut out)?;
    Ok(out)
}

fn load<S: ObjectStore + ?Sized>(store: &S, tree: Option<&ObjectId>) -> Result<Vec<TreeEntry>> {
    let mut entries = match tree {
        Some(id) => store.read_tree(id)?,
        None => Vec::new(),
    };
    entries.sort_by(|a, b| a.cmp_tree_order(b));
    Ok(entries)
}

fn join(prefix: &[u8], name: &[u8]) -> BString {
    let mut path = Vec::with_capacity(prefix.len() + 1 + name.len());
    if !prefix.is_empty() {
        path.extend_from_slice(prefix);
        path.push(b'/');
    }
    path.extend_from_slice(name);
    BString::from(path)
}

fn diff_level<S: ObjectStore + ?Sized>(
    store: &S,
    prefix: &[u8],
    old: Option<&ObjectId>,
    new: Option<&ObjectId>,
    out: &mut Vec<DiffEntry>,
) -> Result<()> {
    if old == new {
        return Ok(());
    }
    let old_entries = load(store, old)?;
    let new_entries = load(store, new)?;

    let mut old_iter = old_entries.iter().peekable();
    let mut new_iter = new_entries.iter().peekable();
    loop {
        let order = match (old_iter.peek(), new_iter.peek()) {
            (Some(a), Some(b)) => a.cmp_tree_order(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };

        match order {
            Ordering::Less => {
                if let Some(a) = old_iter.next() {
                    side(store, prefix, a, true, out)?;
                }
            }
            Ordering::Greater => {
                if let Some(b) = new_iter.next() {
                    side(store, prefix, b, false, out)?;
                }
            }
            Ordering::Equal => {
                if let (Some(a), Some(b)) = (old_iter.next(), new_iter.next()) {
                    both(store, prefix, a, b, out)?;
                }
            }
        }
    }
    Ok(())
}

/// An entry present on only one side.
fn side<S: ObjectStore + ?Sized>(
    store: &S,
    prefix: &[u8],
    entry: &TreeEntry,
    removed: bool,
    out: &mut Vec<DiffEntry>,
) -> Result<()> {
    let path = join(prefix, &entry.name);
    if entry.is_tree() {
        let (old, new) = if removed {
            (Some(&entry.id), None)
        } else {
            (None, Some(&entry.id))
        };
        return diff_level(store, &path, old, new, out);
    }

    out.push(if removed {
        DiffEntry {
            path,
            old_mode: entry.mode,
            new_mode: 0,
            old_id: Some(entry.id),
            new_id: None,
        }
    } else {
        DiffEntry {
            path,
            old_mode: 0,
            new_mode: entry.mode,
            old_id: None,
            new_id: Some(entry.id),
        }
    });
    Ok(())
}

/// Same name on both sides (so both trees or both non-trees).
fn both<S: ObjectStore + ?Sized>(
    store: &S,
    prefix: &[u8],
    a: &TreeEntry,
    b: &TreeEntry,
    out: &mut Vec<DiffEntry>,
) -> Result<()> {
    if a.id == b.id && a.mode == b.mode {
        return Ok(());
    }
    let path = join(prefix, &a.name);
    if a.is_tree() {
        return diff_level(store, &path, Some(&a.id), Some(&b.id), out);
    }
    out.push(DiffEntry {
        path,
        old_mode: a.mode,
        new_mode: b.mode,
        old_id: Some(a.id),
        new_id: Some(b.id),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{GitObject, MODE_BLOB, MODE_BLOB_EXECUTABLE, MODE_TREE};
    use crate::pack::{Pack, PackWriter};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        pack: Pack,
    }

    fn fixture(objects: &[&GitObject]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut writer = PackWriter::new();
        for obj in objects {
            writer.add((*obj).clone());
        }
        let pack = Pack::open(&writer.write(temp.path()).unwrap()).unwrap();
        Fixture { _temp: temp, pack }
    }

    fn paths(diff: &[DiffEntry]) -> Vec<String> {
        diff.iter().map(|d| d.path.to_string()).collect()
    }

    #[test]
    fn test_add_modify_delete() {
        let a1 = GitObject::blob(&b"a1"[..]);
        let a2 = GitObject::blob(&b"a2"[..]);
        let b = GitObject::blob(&b"b"[..]);
        let c = GitObject::blob(&b"c"[..]);
        let old = GitObject::tree(&[
            TreeEntry::new(MODE_BLOB, "a", a1.id),
            TreeEntry::new(MODE_BLOB, "b", b.id),
        ]);
        let new = GitObject::tree(&[
            TreeEntry::new(MODE_BLOB, "a", a2.id),
            TreeEntry::new(MODE_BLOB, "c", c.id),
        ]);
        let fx = fixture(&[&old, &new]);

        let diff = diff_trees(&fx.pack, Some(&old.id), Some(&new.id)).unwrap();
        assert_eq!(paths(&diff), ["a", "b", "c"]);
        assert_eq!(diff[0].old_id, Some(a1.id));
        assert_eq!(diff[0].new_id, Some(a2.id));
        assert_eq!((diff[1].old_mode, diff[1].new_mode), (MODE_BLOB, 0));
        assert_eq!(diff[1].new_id, None);
        assert_eq!((diff[2].old_mode, diff[2].new_mode), (0, MODE_BLOB));
        assert_eq!(diff[2].old_id, None);
    }

    #[test]
    fn test_mode_only_change() {
        let blob = GitObject::blob(&b"script"[..]);
        let old = GitObject::tree(&[TreeEntry::new(MODE_BLOB, "run", blob.id)]);
        let new = GitObject::tree(&[TreeEntry::new(MODE_BLOB_EXECUTABLE, "run", blob.id)]);
        let fx = fixture(&[&old, &new]);

        let diff = diff_trees(&fx.pack, Some(&old.id), Some(&new.id)).unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].old_mode, MODE_BLOB);
        assert_eq!(diff[0].new_mode, MODE_BLOB_EXECUTABLE);
    }

    #[test]
    fn test_recurses_into_subtrees() {
        let x = GitObject::blob(&b"x"[..]);
        let y = GitObject::blob(&b"y"[..]);
        let sub_old = GitObject::tree(&[TreeEntry::new(MODE_BLOB, "x", x.id)]);
        let sub_new = GitObject::tree(&[
            TreeEntry::new(MODE_BLOB, "x", x.id),
            TreeEntry::new(MODE_BLOB, "y", y.id),
        ]);
        let old = GitObject::tree(&[TreeEntry::new(MODE_TREE, "dir", sub_old.id)]);
        let new = GitObject::tree(&[
            TreeEntry::new(MODE_TREE, "dir", sub_new.id),
            TreeEntry::new(MODE_TREE, "more", sub_old.id),
        ]);
        let fx = fixture(&[&sub_old, &sub_new, &old, &new]);

        let diff = diff_trees(&fx.pack, Some(&old.id), Some(&new.id)).unwrap();
        assert_eq!(paths(&diff), ["dir/y", "more/x"]);
    }

    #[test]
    fn test_file_becomes_directory() {
        let x = GitObject::blob(&b"x"[..]);
        let sub = GitObject::tree(&[TreeEntry::new(MODE_BLOB, "inner", x.id)]);
        let old = GitObject::tree(&[TreeEntry::new(MODE_BLOB, "p", x.id)]);
        let new = GitObject::tree(&[TreeEntry::new(MODE_TREE, "p", sub.id)]);
        let fx = fixture(&[&sub, &old, &new]);

        let diff = diff_trees(&fx.pack, Some(&old.id), Some(&new.id)).unwrap();
        assert_eq!(paths(&diff), ["p", "p/inner"]);
        assert_eq!(diff[0].new_id, None);
        assert_eq!(diff[1].old_id, None);
    }

    #[test]
    fn test_identical_trees() {
        let tree = GitObject::tree(&[]);
        let fx = fixture(&[&tree]);
        assert!(diff_trees(&fx.pack, Some(&tree.id), Some(&tree.id))
            .unwrap()
            .is_empty());
    }
}
