use std::collections::HashMap;
use std::sync::Arc;

use super::{CommitMetapack, CommitRecord, ContentType, TreeDiffIter, TreeMetapack};
use crate::object::ObjectId;
use crate::repo::Repository;
use crate::store::PackIndex;

/// Metapacks opened for one pack
pub struct PackMetapacks {
    pack: Arc<dyn PackIndex>,
    commits: Option<CommitMetapack>,
    trees: Option<TreeMetapack>,
}

impl PackMetapacks {
    pub fn open(pack: Arc<dyn PackIndex>) -> Self {
        let commits = CommitMetapack::open(pack.as_ref());
        let trees = TreeMetapack::open(pack.clone());
        PackMetapacks {
            pack,
            commits,
            trees,
        }
    }

    pub fn pack(&self) -> &dyn PackIndex {
        self.pack.as_ref()
    }

    pub fn commits(&self) -> Option<&CommitMetapack> {
        self.commits.as_ref()
    }

    pub fn trees(&self) -> Option<&TreeMetapack> {
        self.trees.as_ref()
    }

    pub fn has(&self, content_type: ContentType) -> bool {
        match content_type {
            ContentType::Commits => self.commits.is_some(),
            ContentType::Trees => self.trees.is_some(),
        }
    }
}

/// Every usable metapack of a set of packs, keyed by pack identity
///
/// Lookups ask each pack in turn and return the first hit. A pack without a
/// usable metapack is simply skipped, so callers fall back to parsing the
/// objects themselves on a miss.
#[derive(Default)]
pub struct MetapackContext {
    packs: Vec<PackMetapacks>,
    by_identity: HashMap<ObjectId, usize>,
}

impl MetapackContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the metapacks of every pack in `repo`.
    pub fn open(repo: &Repository) -> Self {
        let mut ctx = Self::new();
        for pack in repo.packs() {
            ctx.add_pack(pack.clone());
        }
        tracing::debug!(
            "metapacks: {} commits, {} trees across {} pack(s)",
            ctx.count(ContentType::Commits),
            ctx.count(ContentType::Trees),
            ctx.packs.len()
        );
        ctx
    }

    /// Open and register the metapacks of `pack`, replacing any earlier
    /// registration of the same pack.
    pub fn add_pack(&mut self, pack: Arc<dyn PackIndex>) {
        let identity = pack.identity();
        let opened = PackMetapacks::open(pack);
        match self.by_identity.get(&identity) {
            Some(&slot) => self.packs[slot] = opened,
            None => {
                self.by_identity.insert(identity, self.packs.len());
                self.packs.push(opened);
            }
        }
    }

    pub fn for_pack(&self, identity: &ObjectId) -> Option<&PackMetapacks> {
        self.by_identity.get(identity).map(|&slot| &self.packs[slot])
    }

    pub fn packs(&self) -> &[PackMetapacks] {
        &self.packs
    }

    /// Packs that have a usable metapack of `content_type`.
    pub fn count(&self, content_type: ContentType) -> usize {
        self.packs.iter().filter(|p| p.has(content_type)).count()
    }

    /// Commit record for `id` from the first pack that has one.
    pub fn commit(&self, id: &ObjectId) -> Option<CommitRecord> {
        self.packs
            .iter()
            .filter_map(|p| p.commits.as_ref())
            .find_map(|commits| commits.lookup(id))
    }

    /// Precomputed diff of `commit` against `parent` from the first pack
    /// that has one.
    pub fn tree_diff(&self, commit: &ObjectId, parent: &ObjectId) -> Option<TreeDiffIter<'_>> {
        self.packs
            .iter()
            .filter_map(|p| p.trees.as_ref())
            .find_map(|trees| trees.lookup(commit, parent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{GitObject, TreeEntry, MODE_BLOB};
    use crate::pack::PackWriter;
    use crate::store::ObjectStore;
    use std::path::Path;
    use tempfile::TempDir;

    const IDENT: &str = "C O Mitter <committer@example.com>";

    /// Delegates to a real pack but reports a different identity.
    struct Impostor {
        inner: Arc<crate::pack::Pack>,
        identity: ObjectId,
    }

    impl PackIndex for Impostor {
        fn identity(&self) -> ObjectId {
            self.identity
        }
        fn pack_path(&self) -> &Path {
            self.inner.pack_path()
        }
        fn object_count(&self) -> u32 {
            self.inner.object_count()
        }
        fn id_of_ordinal(&self, ordinal: u32) -> Option<ObjectId> {
            self.inner.id_of_ordinal(ordinal)
        }
        fn ordinal_of(&self, id: &ObjectId) -> Option<u32> {
            self.inner.ordinal_of(id)
        }
    }

    fn commit_chain(tag: &str) -> Vec<GitObject> {
        let one = GitObject::blob(format!("{tag} one\n"));
        let two = GitObject::blob(format!("{tag} two\n"));
        let t1 = GitObject::tree(&[TreeEntry::new(MODE_BLOB, "file", one.id)]);
        let t2 = GitObject::tree(&[TreeEntry::new(MODE_BLOB, "file", two.id)]);
        let c1 = GitObject::commit(t1.id, &[], IDENT, 10, &format!("{tag} 1\n"));
        let c2 = GitObject::commit(t2.id, &[c1.id], IDENT, 20, &format!("{tag} 2\n"));
        vec![one, two, t1, t2, c1, c2]
    }

    fn write_with_metapacks(objects_dir: &Path, objects: &[GitObject]) {
        let mut writer = PackWriter::new();
        for obj in objects {
            writer.add(obj.clone());
        }
        let idx = writer.write(&objects_dir.join("pack")).unwrap();
        let pack = crate::pack::Pack::open(&idx).unwrap();
        for content_type in ContentType::ALL {
            content_type.write(&pack, &pack).unwrap();
        }
    }

    #[test]
    fn test_lookups_span_packs() {
        let temp = TempDir::new().unwrap();
        let first = commit_chain("first");
        let second = commit_chain("second");
        write_with_metapacks(temp.path(), &first);
        write_with_metapacks(temp.path(), &second);

        let repo = Repository::open(temp.path()).unwrap();
        let ctx = MetapackContext::open(&repo);
        assert_eq!(ctx.packs().len(), 2);
        assert_eq!(ctx.count(ContentType::Commits), 2);
        assert_eq!(ctx.count(ContentType::Trees), 2);

        for chain in [&first, &second] {
            let (c1, c2) = (&chain[4], &chain[5]);
            let record = ctx.commit(&c2.id).unwrap();
            assert_eq!(record.parent1, Some(c1.id));
            assert_eq!(record.timestamp, 20);

            let diff: Vec<_> = ctx.tree_diff(&c2.id, &c1.id).unwrap().collect();
            assert_eq!(diff.len(), 1);
            assert_eq!(diff[0].path, "file");
            assert_eq!(diff[0].old_id, Some(chain[0].id));
            assert_eq!(diff[0].new_id, Some(chain[1].id));
        }

        let missing = GitObject::blob(&b"nowhere"[..]).id;
        assert!(ctx.commit(&missing).is_none());
        assert!(ctx.tree_diff(&missing, &first[4].id).is_none());
    }

    #[test]
    fn test_pack_without_metapacks_is_skipped() {
        let temp = TempDir::new().unwrap();
        let chain = commit_chain("bare");
        let mut writer = PackWriter::new();
        for obj in &chain {
            writer.add(obj.clone());
        }
        writer.write(&temp.path().join("pack")).unwrap();

        let repo = Repository::open(temp.path()).unwrap();
        let ctx = MetapackContext::open(&repo);
        assert_eq!(ctx.packs().len(), 1);
        assert_eq!(ctx.count(ContentType::Commits), 0);
        assert!(ctx.commit(&chain[5].id).is_none());
        // the objects are still readable the slow way
        assert_eq!(repo.read_commit(&chain[5].id).unwrap().timestamp, 20);
    }

    #[test]
    fn test_identity_mismatch_disables_metapacks() {
        let temp = TempDir::new().unwrap();
        let chain = commit_chain("impostor");
        write_with_metapacks(temp.path(), &chain);
        let repo = Repository::open(temp.path()).unwrap();
        let real = repo.packs()[0].clone();

        let impostor = Impostor {
            inner: real.clone(),
            identity: GitObject::blob(&b"someone else"[..]).id,
        };
        let mut ctx = MetapackContext::new();
        ctx.add_pack(Arc::new(impostor));
        assert_eq!(ctx.count(ContentType::Commits), 0);
        assert_eq!(ctx.count(ContentType::Trees), 0);
        assert!(ctx.commit(&chain[5].id).is_none());

        ctx.add_pack(real.clone());
        assert_eq!(ctx.packs().len(), 2);
        assert!(ctx.commit(&chain[5].id).is_some());
        assert!(ctx.for_pack(&real.identity()).unwrap().has(ContentType::Trees));
    }

    #[test]
    fn test_re_adding_a_pack_replaces_it() {
        let temp = TempDir::new().unwrap();
        let chain = commit_chain("again");
        write_with_metapacks(temp.path(), &chain);
        let repo = Repository::open(temp.path()).unwrap();
        let pack = repo.packs()[0].clone();

        let mut ctx = MetapackContext::new();
        ctx.add_pack(pack.clone());
        ctx.add_pack(pack);
        assert_eq!(ctx.packs().len(), 1);
    }
}
