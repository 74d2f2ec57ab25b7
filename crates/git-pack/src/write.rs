//! Producing pack streams.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use git_hash::{HashAlgorithm, Hasher, ObjectId};
use git_object::ObjectType;

use crate::delta::compute_delta;
use crate::entry::EntryHeader;
use crate::index::IndexEntry;
use crate::{encode_pack_header, EntryKind, PackError, PACK_HEADER_SIZE};

/// Streams a pack into any writer, hashing as it goes.
///
/// The object count goes into the header up front, so callers must know
/// it before the first entry; [`finish`](Self::finish) refuses a pack
/// whose entry count disagrees.
pub struct PackWriter<W: Write> {
    out: W,
    hasher: Hasher,
    algo: HashAlgorithm,
    position: u64,
    declared: u32,
    entries: Vec<IndexEntry>,
}

/// Result of [`PackWriter::finish`].
pub struct WrittenPack<W> {
    pub checksum: ObjectId,
    pub entries: Vec<IndexEntry>,
    pub len: u64,
    pub inner: W,
}

impl<W: Write> PackWriter<W> {
    pub fn new(mut out: W, algo: HashAlgorithm, num_objects: u32) -> Result<Self, PackError> {
        let header = encode_pack_header(num_objects);
        out.write_all(&header)?;
        let mut hasher = Hasher::new(algo);
        hasher.update(&header);
        Ok(Self {
            out,
            hasher,
            algo,
            position: PACK_HEADER_SIZE as u64,
            declared: num_objects,
            entries: Vec::with_capacity(num_objects as usize),
        })
    }

    /// Offset the next entry will be written at.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Append a whole object, returning its id.
    pub fn add_object(&mut self, kind: ObjectType, data: &[u8]) -> Result<ObjectId, PackError> {
        let oid = Hasher::hash_object(self.algo, kind.as_str(), data)?;
        self.write_entry(EntryKind::Base(kind), oid, data)?;
        Ok(oid)
    }

    /// Append a delta against the entry written at `base_offset`.
    pub fn add_ofs_delta(&mut self, base_offset: u64, target: ObjectId, delta: &[u8]) -> Result<u64, PackError> {
        self.write_entry(EntryKind::OfsDelta { base_offset }, target, delta)
    }

    /// Append a delta against `base`, which may live outside this pack.
    pub fn add_ref_delta(&mut self, base: ObjectId, target: ObjectId, delta: &[u8]) -> Result<u64, PackError> {
        self.write_entry(EntryKind::RefDelta { base }, target, delta)
    }

    fn write_entry(&mut self, kind: EntryKind, oid: ObjectId, payload: &[u8]) -> Result<u64, PackError> {
        let offset = self.position;
        let header = EntryHeader {
            kind,
            size: payload.len() as u64,
            header_len: 0,
        }
        .encode(offset);
        let compressed = deflate(payload)?;

        let mut crc = crc32fast::Hasher::new();
        crc.update(&header);
        crc.update(&compressed);
        self.emit(&header)?;
        self.emit(&compressed)?;
        self.entries.push(IndexEntry {
            oid,
            offset,
            crc32: crc.finalize(),
        });
        Ok(offset)
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<(), PackError> {
        self.out.write_all(bytes)?;
        self.hasher.update(bytes);
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Write the trailing checksum and hand back the writer.
    pub fn finish(mut self) -> Result<WrittenPack<W>, PackError> {
        if self.entries.len() != self.declared as usize {
            return Err(PackError::InvalidHeader(format!(
                "header declares {} objects but {} were written",
                self.declared,
                self.entries.len()
            )));
        }
        let checksum = self.hasher.finalize()?;
        self.out.write_all(checksum.as_bytes())?;
        self.out.flush()?;
        Ok(WrittenPack {
            checksum,
            entries: self.entries,
            len: self.position + self.algo.digest_len() as u64,
            inner: self.out,
        })
    }
}

pub(crate) fn deflate(data: &[u8]) -> Result<Vec<u8>, PackError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Pack `objects` in the given order.
///
/// With `deltas` enabled, each object is tried as an OFS_DELTA against
/// the previous object of the same kind and stored that way when the
/// delta is less than half the object's size.
pub fn generate_pack<W: Write>(
    out: W,
    algo: HashAlgorithm,
    objects: &[(ObjectType, Vec<u8>)],
    deltas: bool,
) -> Result<WrittenPack<W>, PackError> {
    const MIN_DELTA_CANDIDATE: usize = 64;

    let mut writer = PackWriter::new(out, algo, objects.len() as u32)?;
    let mut previous: [Option<(u64, &[u8])>; 4] = [None; 4];

    for (kind, data) in objects {
        let slot = match kind {
            ObjectType::Commit => 0,
            ObjectType::Tree => 1,
            ObjectType::Blob => 2,
            ObjectType::Tag => 3,
        };
        let offset = writer.position();
        let mut stored_as_delta = false;

        if deltas && data.len() >= MIN_DELTA_CANDIDATE {
            if let Some((base_offset, base)) = previous[slot] {
                let delta = compute_delta(base, data);
                if delta.len() < data.len() / 2 {
                    let oid = Hasher::hash_object(algo, kind.as_str(), data)?;
                    writer.add_ofs_delta(base_offset, oid, &delta)?;
                    stored_as_delta = true;
                }
            }
        }
        if !stored_as_delta {
            writer.add_object(*kind, data)?;
        }
        previous[slot] = Some((offset, data.as_slice()));
    }

    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_pack_header;

    #[test]
    fn empty_pack_is_header_and_trailer() {
        let written = PackWriter::new(Vec::new(), HashAlgorithm::Sha1, 0)
            .unwrap()
            .finish()
            .unwrap();
        assert_eq!(written.inner.len(), 32);
        assert_eq!(written.len, 32);
        assert_eq!(parse_pack_header(&written.inner).unwrap(), 0);
        assert_eq!(
            written.checksum,
            Hasher::digest(HashAlgorithm::Sha1, &written.inner[..12]).unwrap()
        );
    }

    #[test]
    fn miscounted_pack_is_refused() {
        let mut writer = PackWriter::new(Vec::new(), HashAlgorithm::Sha1, 2).unwrap();
        writer.add_object(ObjectType::Blob, b"only one").unwrap();
        assert!(writer.finish().is_err());
    }

    #[test]
    fn similar_blobs_become_deltas() {
        let first: Vec<u8> = (0..2000u32).map(|i| (i.wrapping_mul(i).wrapping_mul(31) % 251) as u8).collect();
        let mut second = first.clone();
        second.extend_from_slice(b"one more line\n");
        let objects = vec![(ObjectType::Blob, first), (ObjectType::Blob, second)];

        let plain = generate_pack(Vec::new(), HashAlgorithm::Sha1, &objects, false).unwrap();
        let delta = generate_pack(Vec::new(), HashAlgorithm::Sha1, &objects, true).unwrap();
        assert!(delta.len < plain.len);

        let ids = |pack: &WrittenPack<Vec<u8>>| pack.entries.iter().map(|e| e.oid).collect::<Vec<_>>();
        assert_eq!(ids(&plain), ids(&delta));
    }
}
