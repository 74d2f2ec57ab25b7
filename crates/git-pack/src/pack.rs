//! Reading objects from a stored pack and its index.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::bufread::ZlibDecoder;
use git_hash::{HashAlgorithm, ObjectId};
use memmap2::Mmap;

use crate::delta::apply_delta;
use crate::entry::EntryHeader;
use crate::index::PackIndex;
use crate::{parse_pack_header, EntryKind, PackError, PackedObject, MAX_DELTA_CHAIN_DEPTH};

/// A memory-mapped `.pack` with its `.idx`.
pub struct PackFile {
    data: Mmap,
    index: PackIndex,
    path: PathBuf,
    algo: HashAlgorithm,
}

impl PackFile {
    /// Open `pack-<sha>.pack` together with the `.idx` next to it.
    pub fn open(path: impl AsRef<Path>, algo: HashAlgorithm) -> Result<Self, PackError> {
        let path = path.as_ref().to_path_buf();
        let index = PackIndex::open(&path.with_extension("idx"), algo)?;
        let file = File::open(&path)?;
        // SAFETY: packs are immutable once their index has been renamed
        // into place.
        let data = unsafe { Mmap::map(&file)? };

        let count = parse_pack_header(&data)?;
        if count as usize != index.len() {
            return Err(PackError::InvalidIndex(format!(
                "pack holds {count} objects, index lists {}",
                index.len()
            )));
        }
        Ok(Self {
            data,
            index,
            path,
            algo,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.index.lookup(oid).is_some()
    }

    pub fn read(&self, oid: &ObjectId) -> Result<Option<PackedObject>, PackError> {
        match self.index.lookup(oid) {
            Some(offset) => self.read_at(offset).map(Some),
            None => Ok(None),
        }
    }

    /// Read the object whose entry starts at `offset`, walking its delta
    /// chain down to the base and applying the deltas on the way back up.
    pub fn read_at(&self, offset: u64) -> Result<PackedObject, PackError> {
        let mut deltas: Vec<Vec<u8>> = Vec::new();
        let mut at = offset;
        loop {
            if deltas.len() >= MAX_DELTA_CHAIN_DEPTH {
                return Err(PackError::DeltaChainTooDeep(MAX_DELTA_CHAIN_DEPTH, offset));
            }
            let entry = self.data.get(at as usize..).ok_or_else(|| PackError::CorruptEntry {
                offset: at,
                reason: "offset beyond end of pack".into(),
            })?;
            let header = EntryHeader::parse(entry, at, self.algo)?;
            let payload = inflate(&entry[header.header_len..], header.size, at)?;
            match header.kind {
                EntryKind::Base(kind) => {
                    let mut data = payload;
                    for delta in deltas.iter().rev() {
                        data = apply_delta(&data, delta)?;
                    }
                    return Ok(PackedObject { kind, data });
                }
                EntryKind::OfsDelta { base_offset } => {
                    deltas.push(payload);
                    at = base_offset;
                }
                EntryKind::RefDelta { base } => {
                    deltas.push(payload);
                    at = self.index.lookup(&base).ok_or(PackError::UnresolvedDelta(base))?;
                }
            }
        }
    }

    /// Ids of every object in this pack.
    pub fn object_ids(&self) -> Result<Vec<ObjectId>, PackError> {
        self.index.entries().map(|e| e.map(|e| e.oid)).collect()
    }
}

fn inflate(compressed: &[u8], size: u64, offset: u64) -> Result<Vec<u8>, PackError> {
    let mut out = Vec::with_capacity(size.min(1 << 24) as usize);
    ZlibDecoder::new(compressed)
        .take(size + 1)
        .read_to_end(&mut out)
        .map_err(|e| PackError::CorruptEntry {
            offset,
            reason: format!("zlib: {e}"),
        })?;
    if out.len() as u64 != size {
        return Err(PackError::CorruptEntry {
            offset,
            reason: format!("inflated to {} bytes, header says {size}", out.len()),
        });
    }
    Ok(out)
}
