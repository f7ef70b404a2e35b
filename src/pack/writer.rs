//! Build `.pack` + `.idx` pairs from whole (undeltified) objects

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};
use tempfile::NamedTempFile;

use super::type_code;
use crate::codec::{put_u32, put_u64};
use crate::error::Result;
use crate::object::{GitObject, ObjectId};
use crate::repo::publish_read_only;

const PACK_VERSION: u32 = 2;
const IDX_VERSION: u32 = 2;

/// Accumulates objects and writes them out as a version 2 pack
#[derive(Default)]
pub struct PackWriter {
    objects: Vec<GitObject>,
    seen: HashSet<ObjectId>,
}

impl PackWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an object; duplicates are ignored.
    pub fn add(&mut self, obj: GitObject) -> &mut Self {
        if self.seen.insert(obj.id) {
            self.objects.push(obj);
        }
        self
    }

    /// Write `pack-<checksum>.pack` and `.idx` into `pack_dir`; returns the idx path.
    pub fn write(&self, pack_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(pack_dir)?;

        let mut pack = Vec::new();
        pack.extend_from_slice(b"PACK");
        put_u32(&mut pack, PACK_VERSION)?;
        put_u32(&mut pack, self.objects.len() as u32)?;

        // (id, crc32, offset) per object
        let mut entries = Vec::with_capacity(self.objects.len());
        for obj in &self.objects {
            let offset = pack.len() as u64;
            let entry = encode_entry(obj)?;
            entries.push((obj.id, crc32fast::hash(&entry), offset));
            pack.extend_from_slice(&entry);
        }

        let checksum = sha1_of(&pack);
        pack.extend_from_slice(checksum.as_bytes());

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let idx = encode_idx(&entries, &checksum)?;

        let base = pack_dir.join(format!("pack-{}", checksum));
        let pack_path = base.with_extension("pack");
        let idx_path = base.with_extension("idx");
        publish(pack_dir, &pack, &pack_path)?;
        publish(pack_dir, &idx, &idx_path)?;

        tracing::debug!(
            "wrote pack {:?} with {} objects",
            pack_path,
            self.objects.len()
        );
        Ok(idx_path)
    }
}

/// Entry header (type + inflated size) followed by the zlib stream.
fn encode_entry(obj: &GitObject) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut size = obj.data.len();
    let mut byte = (type_code(obj.kind) << 4) | (size & 0x0f) as u8;
    size >>= 4;
    while size != 0 {
        out.push(byte | 0x80);
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    out.push(byte);

    let mut encoder = ZlibEncoder::new(out, Compression::default());
    encoder.write_all(&obj.data)?;
    Ok(encoder.finish()?)
}

pub(crate) fn encode_idx(entries: &[(ObjectId, u32, u64)], pack_checksum: &ObjectId) -> Result<Vec<u8>> {
    let mut idx = vec![0xff, b't', b'O', b'c'];
    put_u32(&mut idx, IDX_VERSION)?;

    let mut fanout = [0u32; 256];
    for (id, _, _) in entries {
        fanout[id.as_bytes()[0] as usize] += 1;
    }
    let mut running = 0;
    for slot in fanout.iter_mut() {
        running += *slot;
        *slot = running;
    }
    for value in fanout {
        put_u32(&mut idx, value)?;
    }

    for (id, _, _) in entries {
        idx.extend_from_slice(id.as_bytes());
    }
    for (_, crc, _) in entries {
        put_u32(&mut idx, *crc)?;
    }

    let mut large = Vec::new();
    for (_, _, offset) in entries {
        if *offset < 0x8000_0000 {
            put_u32(&mut idx, *offset as u32)?;
        } else {
            put_u32(&mut idx, 0x8000_0000 | large.len() as u32)?;
            large.push(*offset);
        }
    }
    for offset in large {
        put_u64(&mut idx, offset)?;
    }

    idx.extend_from_slice(pack_checksum.as_bytes());
    let own = sha1_of(&idx);
    idx.extend_from_slice(own.as_bytes());
    Ok(idx)
}

fn sha1_of(bytes: &[u8]) -> ObjectId {
    let digest = Sha1::digest(bytes);
    ObjectId::from_slice(&digest).unwrap_or_default()
}

fn publish(dir: &Path, bytes: &[u8], dest: &Path) -> Result<()> {
    let mut tmp = NamedTempFile::with_prefix_in("tmp_pack_", dir)?;
    tmp.write_all(bytes)?;
    publish_read_only(tmp, dest)
}
