use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::object::{loose_object_path, read_loose_object, ObjectId, ObjectKind};
use crate::pack::Pack;
use crate::store::ObjectStore;

/// An objects directory: its packs plus any loose objects
pub struct Repository {
    objects_dir: PathBuf,
    packs: Vec<Arc<Pack>>,
}

impl Repository {
    /// Open every readable pack under `<objects_dir>/pack`.
    ///
    /// Packs that fail to open are skipped with a warning, the way git
    /// ignores a damaged pack rather than refusing to run.
    pub fn open<P: AsRef<Path>>(objects_dir: P) -> Result<Self> {
        let objects_dir = objects_dir.as_ref().to_path_buf();
        let mut packs = Vec::new();

        for idx_path in Self::pack_indexes(&objects_dir)? {
            match Pack::open(&idx_path) {
                Ok(pack) => packs.push(Arc::new(pack)),
                Err(e) => tracing::warn!("skipping pack {:?}: {}", idx_path, e),
            }
        }

        tracing::debug!("opened {} pack(s) in {:?}", packs.len(), objects_dir);
        Ok(Repository { objects_dir, packs })
    }

    /// All `.idx` files under `<objects_dir>/pack`, sorted by name.
    pub fn pack_indexes(objects_dir: &Path) -> Result<Vec<PathBuf>> {
        let pack_dir = objects_dir.join("pack");
        if !pack_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in std::fs::read_dir(&pack_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "idx") {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    pub fn pack_dir(&self) -> PathBuf {
        self.objects_dir.join("pack")
    }

    pub fn packs(&self) -> &[Arc<Pack>] {
        &self.packs
    }

    /// The opened pack whose index lives at `idx_path`.
    pub fn pack_for_index(&self, idx_path: &Path) -> Option<&Arc<Pack>> {
        let wanted = std::fs::canonicalize(idx_path).ok()?;
        self.packs.iter().find(|pack| {
            std::fs::canonicalize(pack.idx_path()).is_ok_and(|p| p == wanted)
        })
    }

    fn pack_containing(&self, id: &ObjectId) -> Option<&Arc<Pack>> {
        self.packs.iter().find(|pack| pack.contains(id))
    }
}

/// Fsync a staged file, mark it read-only (0444 on unix, as git leaves pack
/// files) and rename it to `dest`.
pub(crate) fn publish_read_only(staging: NamedTempFile, dest: &Path) -> Result<()> {
    let file = staging.as_file();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o444))?;
    }
    file.sync_all()?;
    staging.persist(dest).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Replace a published (read-only) file in place, for corruption tests.
#[cfg(test)]
pub(crate) fn replace_published(path: &Path, bytes: &[u8]) {
    let _ = std::fs::remove_file(path);
    std::fs::write(path, bytes).unwrap();
}

impl ObjectStore for Repository {
    fn object_kind(&self, id: &ObjectId) -> Result<ObjectKind> {
        match self.pack_containing(id) {
            Some(pack) => pack.object_kind(id),
            None => self.read_object(id).map(|(kind, _)| kind),
        }
    }

    fn read_object(&self, id: &ObjectId) -> Result<(ObjectKind, Vec<u8>)> {
        if let Some(pack) = self.pack_containing(id) {
            return pack.read_object(id);
        }

        let path = loose_object_path(&self.objects_dir, id);
        if !path.is_file() {
            return Err(Error::ObjectNotFound(*id));
        }
        let obj = read_loose_object(&path)?;
        if obj.id != *id {
            return Err(Error::corrupt_object(*id, format!("loose file hashes to {}", obj.id)));
        }
        Ok((obj.kind, obj.data))
    }
}

/// A pack from outside the objects directory, read ahead of a repository
pub struct PackOverlay<'a> {
    pack: &'a Pack,
    base: &'a Repository,
}

impl<'a> PackOverlay<'a> {
    pub fn new(pack: &'a Pack, base: &'a Repository) -> Self {
        PackOverlay { pack, base }
    }
}

impl ObjectStore for PackOverlay<'_> {
    fn object_kind(&self, id: &ObjectId) -> Result<ObjectKind> {
        if self.pack.contains(id) {
            return self.pack.object_kind(id);
        }
        self.base.object_kind(id)
    }

    fn read_object(&self, id: &ObjectId) -> Result<(ObjectKind, Vec<u8>)> {
        if self.pack.contains(id) {
            return self.pack.read_object(id);
        }
        self.base.read_object(id)
    }
}
