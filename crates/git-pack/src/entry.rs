//! Entry headers: type and inflated size, plus the delta base reference.
//!
//! ```text
//! byte 0:   [c][t t t][s s s s]    c = more size bytes follow
//! byte 1..: [c][s s s s s s s]     little-endian size continuation
//! OFS_DELTA: big-endian base distance, each continuation adds one
//! REF_DELTA: raw base object id
//! ```

use std::io::{self, Read};

use git_hash::{HashAlgorithm, ObjectId};
use git_object::ObjectType;

use crate::{EntryKind, PackError};

/// Decoded header of one pack entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub kind: EntryKind,
    /// Size of the inflated payload (the delta itself for delta entries).
    pub size: u64,
    /// Bytes taken by the header, base reference included.
    pub header_len: usize,
}

impl EntryHeader {
    /// Read a header from a stream positioned at an entry starting at
    /// pack offset `offset`.
    pub fn read(input: &mut impl Read, offset: u64, algo: HashAlgorithm) -> Result<Self, PackError> {
        let corrupt = |reason: &str| PackError::CorruptEntry {
            offset,
            reason: reason.into(),
        };
        let mut consumed = 0usize;
        let mut next = |input: &mut dyn Read| -> Result<u8, PackError> {
            let mut byte = [0u8; 1];
            input.read_exact(&mut byte).map_err(|e| eof_as_truncation(e, offset))?;
            consumed += 1;
            Ok(byte[0])
        };

        let first = next(input)?;
        let type_number = (first >> 4) & 0x07;
        let mut size = u64::from(first & 0x0f);
        let mut shift = 4u32;
        let mut byte = first;
        while byte & 0x80 != 0 {
            byte = next(input)?;
            if shift > 57 {
                return Err(corrupt("size varint overflows"));
            }
            size |= u64::from(byte & 0x7f) << shift;
            shift += 7;
        }

        let kind = match type_number {
            1 => EntryKind::Base(ObjectType::Commit),
            2 => EntryKind::Base(ObjectType::Tree),
            3 => EntryKind::Base(ObjectType::Blob),
            4 => EntryKind::Base(ObjectType::Tag),
            6 => {
                let mut byte = next(input)?;
                let mut distance = u64::from(byte & 0x7f);
                while byte & 0x80 != 0 {
                    byte = next(input)?;
                    distance = distance
                        .checked_add(1)
                        .and_then(|d| d.checked_mul(128))
                        .ok_or_else(|| corrupt("base distance overflows"))?
                        | u64::from(byte & 0x7f);
                }
                if distance == 0 || distance > offset {
                    return Err(corrupt("delta base lies outside the pack"));
                }
                EntryKind::OfsDelta {
                    base_offset: offset - distance,
                }
            }
            7 => {
                let mut raw = vec![0u8; algo.digest_len()];
                for slot in raw.iter_mut() {
                    *slot = next(input)?;
                }
                EntryKind::RefDelta {
                    base: ObjectId::from_bytes(&raw, algo)?,
                }
            }
            other => return Err(corrupt(&format!("unknown entry type {other}"))),
        };

        Ok(Self {
            kind,
            size,
            header_len: consumed,
        })
    }

    /// Decode a header from a byte slice, such as a memory-mapped pack.
    pub fn parse(data: &[u8], offset: u64, algo: HashAlgorithm) -> Result<Self, PackError> {
        let mut cursor = data;
        Self::read(&mut cursor, offset, algo)
    }

    /// Encode this header for an entry written at pack offset `offset`.
    pub fn encode(&self, offset: u64) -> Vec<u8> {
        let mut out = encode_type_and_size(self.kind.type_number(), self.size);
        match self.kind {
            EntryKind::Base(_) => {}
            EntryKind::OfsDelta { base_offset } => {
                out.extend_from_slice(&encode_base_distance(offset - base_offset));
            }
            EntryKind::RefDelta { base } => out.extend_from_slice(base.as_bytes()),
        }
        out
    }
}

fn eof_as_truncation(err: io::Error, offset: u64) -> PackError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        PackError::Truncated(offset)
    } else {
        PackError::Io(err)
    }
}

fn encode_type_and_size(type_number: u8, size: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    let mut rest = size >> 4;
    let mut byte = (type_number << 4) | (size & 0x0f) as u8;
    while rest > 0 {
        out.push(byte | 0x80);
        byte = (rest & 0x7f) as u8;
        rest >>= 7;
    }
    out.push(byte);
    out
}

/// Encode the distance back to an OFS_DELTA base.
pub fn encode_base_distance(distance: u64) -> Vec<u8> {
    let mut out = vec![(distance & 0x7f) as u8];
    let mut rest = distance >> 7;
    while rest > 0 {
        rest -= 1;
        out.push(0x80 | (rest & 0x7f) as u8);
        rest >>= 7;
    }
    out.reverse();
    out
}
