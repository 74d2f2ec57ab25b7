//! Pack index, version 2.
//!
//! ```text
//! magic \377tOc | version 2
//! fan-out: 256 big-endian cumulative counts by first id byte
//! ids:     N sorted object ids
//! crc32:   N entry checksums
//! offsets: N 31-bit offsets, high bit set = index into the 64-bit table
//! 64-bit offsets
//! pack checksum | index checksum
//! ```

use std::cmp::Ordering;
use std::fs::File;
use std::path::Path;

use git_hash::{HashAlgorithm, Hasher, ObjectId};
use memmap2::Mmap;

use crate::{PackError, IDX_SIGNATURE, IDX_VERSION};

const FANOUT_LEN: usize = 256 * 4;

/// One indexed object: where it starts in the pack and the CRC32 of its
/// raw entry bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub oid: ObjectId,
    pub offset: u64,
    pub crc32: u32,
}

/// Serialize an index for a pack with the given trailer checksum.
pub fn write_index(entries: &[IndexEntry], pack_checksum: &ObjectId) -> Result<Vec<u8>, PackError> {
    let algo = pack_checksum.algorithm();
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| a.oid.cmp(&b.oid));
    sorted.dedup_by(|a, b| a.oid == b.oid);

    let mut out = Vec::with_capacity(8 + FANOUT_LEN + sorted.len() * (algo.digest_len() + 8));
    out.extend_from_slice(&IDX_SIGNATURE);
    out.extend_from_slice(&IDX_VERSION.to_be_bytes());

    let mut fanout = [0u32; 256];
    for entry in &sorted {
        fanout[entry.oid.first_byte() as usize] += 1;
    }
    let mut running = 0u32;
    for count in fanout {
        running += count;
        out.extend_from_slice(&running.to_be_bytes());
    }
    for entry in &sorted {
        out.extend_from_slice(entry.oid.as_bytes());
    }
    for entry in &sorted {
        out.extend_from_slice(&entry.crc32.to_be_bytes());
    }
    let mut large = Vec::new();
    for entry in &sorted {
        if entry.offset < 0x8000_0000 {
            out.extend_from_slice(&(entry.offset as u32).to_be_bytes());
        } else {
            out.extend_from_slice(&(0x8000_0000 | large.len() as u32).to_be_bytes());
            large.push(entry.offset);
        }
    }
    for offset in large {
        out.extend_from_slice(&offset.to_be_bytes());
    }
    out.extend_from_slice(pack_checksum.as_bytes());
    let own = Hasher::digest(algo, &out)?;
    out.extend_from_slice(own.as_bytes());
    Ok(out)
}

/// A memory-mapped `.idx` file.
pub struct PackIndex {
    data: Mmap,
    algo: HashAlgorithm,
    count: usize,
}

impl PackIndex {
    pub fn open(path: &Path, algo: HashAlgorithm) -> Result<Self, PackError> {
        let file = File::open(path)?;
        // SAFETY: index files are written once under a temporary name and
        // renamed into place; nothing modifies them afterwards.
        let data = unsafe { Mmap::map(&file)? };
        Self::from_mmap(data, algo)
    }

    fn from_mmap(data: Mmap, algo: HashAlgorithm) -> Result<Self, PackError> {
        let hash_len = algo.digest_len();
        if data.len() < 8 + FANOUT_LEN + 2 * hash_len {
            return Err(PackError::InvalidIndex("file too small".into()));
        }
        if data[..4] != IDX_SIGNATURE {
            return Err(PackError::InvalidIndex("bad signature".into()));
        }
        let version = be32(&data, 4);
        if version != IDX_VERSION {
            return Err(PackError::InvalidIndex(format!("unsupported version {version}")));
        }
        let count = be32(&data, 8 + 255 * 4) as usize;
        let min_len = 8 + FANOUT_LEN + count * (hash_len + 8) + 2 * hash_len;
        if data.len() < min_len {
            return Err(PackError::InvalidIndex(format!(
                "{} objects need at least {min_len} bytes, file has {}",
                count,
                data.len()
            )));
        }
        Ok(Self { data, algo, count })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Offset of `oid` in the pack, if indexed.
    pub fn lookup(&self, oid: &ObjectId) -> Option<u64> {
        let first = oid.first_byte() as usize;
        let mut lo = if first == 0 { 0 } else { self.fanout(first - 1) };
        let mut hi = self.fanout(first);
        let needle = oid.as_bytes();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.raw_oid(mid).cmp(needle) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Some(self.offset(mid)),
            }
        }
        None
    }

    pub fn oid_at(&self, position: usize) -> Result<ObjectId, PackError> {
        Ok(ObjectId::from_bytes(self.raw_oid(position), self.algo)?)
    }

    /// All entries in id order.
    pub fn entries(&self) -> impl Iterator<Item = Result<IndexEntry, PackError>> + '_ {
        (0..self.count).map(move |i| {
            Ok(IndexEntry {
                oid: self.oid_at(i)?,
                offset: self.offset(i),
                crc32: be32(&self.data, self.crc_table() + i * 4),
            })
        })
    }

    pub fn pack_checksum(&self) -> Result<ObjectId, PackError> {
        let hash_len = self.algo.digest_len();
        let start = self.data.len() - 2 * hash_len;
        Ok(ObjectId::from_bytes(&self.data[start..start + hash_len], self.algo)?)
    }

    fn fanout(&self, byte: usize) -> usize {
        be32(&self.data, 8 + byte * 4) as usize
    }

    fn raw_oid(&self, position: usize) -> &[u8] {
        let len = self.algo.digest_len();
        let start = 8 + FANOUT_LEN + position * len;
        &self.data[start..start + len]
    }

    fn crc_table(&self) -> usize {
        8 + FANOUT_LEN + self.count * self.algo.digest_len()
    }

    fn offset(&self, position: usize) -> u64 {
        let small_table = self.crc_table() + self.count * 4;
        let value = be32(&self.data, small_table + position * 4);
        if value & 0x8000_0000 == 0 {
            return u64::from(value);
        }
        let large = small_table + self.count * 4 + (value & 0x7fff_ffff) as usize * 8;
        match self.data.get(large..large + 8) {
            Some(bytes) => u64::from_be_bytes(bytes.try_into().unwrap_or([0xff; 8])),
            None => u64::MAX,
        }
    }
}

fn be32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(first: u8, rest: u8) -> ObjectId {
        let mut bytes = [rest; 20];
        bytes[0] = first;
        ObjectId::from_bytes(&bytes, HashAlgorithm::Sha1).unwrap()
    }

    fn open(entries: &[IndexEntry]) -> (tempfile::TempDir, PackIndex) {
        let checksum = oid(0xaa, 0xbb);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pack-test.idx");
        std::fs::write(&path, write_index(entries, &checksum).unwrap()).unwrap();
        let index = PackIndex::open(&path, HashAlgorithm::Sha1).unwrap();
        assert_eq!(index.pack_checksum().unwrap(), checksum);
        (dir, index)
    }

    #[test]
    fn lookup_hits_and_misses() {
        let entries = [
            IndexEntry { oid: oid(0x10, 1), offset: 12, crc32: 1 },
            IndexEntry { oid: oid(0x10, 2), offset: 40, crc32: 2 },
            IndexEntry { oid: oid(0xff, 3), offset: 99, crc32: 3 },
            IndexEntry { oid: oid(0x00, 4), offset: 70, crc32: 4 },
        ];
        let (_dir, index) = open(&entries);
        assert_eq!(index.len(), 4);
        for entry in &entries {
            assert_eq!(index.lookup(&entry.oid), Some(entry.offset));
        }
        assert_eq!(index.lookup(&oid(0x10, 3)), None);
        assert_eq!(index.lookup(&oid(0x80, 0)), None);

        let listed: Vec<_> = index.entries().map(Result::unwrap).collect();
        assert_eq!(listed[0].oid, oid(0x00, 4));
        assert_eq!(listed[3].crc32, 3);
    }

    #[test]
    fn large_offsets_use_second_table() {
        let entries = [
            IndexEntry { oid: oid(1, 1), offset: 5 << 32, crc32: 0 },
            IndexEntry { oid: oid(2, 2), offset: 12, crc32: 0 },
        ];
        let (_dir, index) = open(&entries);
        assert_eq!(index.lookup(&oid(1, 1)), Some(5 << 32));
        assert_eq!(index.lookup(&oid(2, 2)), Some(12));
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.idx");
        std::fs::write(&path, b"\xfftOc\0\0\0\x02").unwrap();
        assert!(matches!(
            PackIndex::open(&path, HashAlgorithm::Sha1),
            Err(PackError::InvalidIndex(_))
        ));
    }
}
