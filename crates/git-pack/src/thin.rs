//! Turning a received thin pack into a self-contained one.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use git_hash::Hasher;
use tracing::debug;

use crate::entry::EntryHeader;
use crate::index::IndexEntry;
use crate::indexer::IndexedPack;
use crate::write::deflate;
use crate::{EntryKind, PackError};

/// Append the bases a thin pack borrowed from the object store as whole
/// objects, then rewrite the object count and the trailer.
///
/// `file` holds exactly the pack described by `pack`; on return `pack`
/// describes the completed file.
pub fn complete_thin_pack(file: &mut File, pack: &mut IndexedPack) -> Result<(), PackError> {
    if pack.external_bases.is_empty() {
        return Ok(());
    }
    let algo = pack.checksum.algorithm();
    let body_end = pack.len - algo.digest_len() as u64;
    file.set_len(body_end)?;
    file.seek(SeekFrom::Start(body_end))?;

    let mut position = body_end;
    for (oid, object) in pack.external_bases.drain(..) {
        let header = EntryHeader {
            kind: EntryKind::Base(object.kind),
            size: object.data.len() as u64,
            header_len: 0,
        }
        .encode(position);
        let compressed = deflate(&object.data)?;
        let mut crc = crc32fast::Hasher::new();
        crc.update(&header);
        crc.update(&compressed);
        file.write_all(&header)?;
        file.write_all(&compressed)?;
        pack.entries.push(IndexEntry {
            oid,
            offset: position,
            crc32: crc.finalize(),
        });
        position += (header.len() + compressed.len()) as u64;
    }

    let count = u32::try_from(pack.entries.len())
        .map_err(|_| PackError::InvalidHeader("too many objects for one pack".into()))?;
    file.seek(SeekFrom::Start(8))?;
    file.write_all(&count.to_be_bytes())?;

    file.seek(SeekFrom::Start(0))?;
    let mut hasher = Hasher::new(algo);
    io::copy(&mut Read::by_ref(file).take(position), &mut hasher)?;
    let checksum = hasher.finalize()?;
    file.seek(SeekFrom::Start(position))?;
    file.write_all(checksum.as_bytes())?;
    file.flush()?;

    debug!(objects = count, %checksum, "completed thin pack");
    pack.checksum = checksum;
    pack.len = position + algo.digest_len() as u64;
    Ok(())
}
