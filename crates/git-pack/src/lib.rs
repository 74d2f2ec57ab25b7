//! Pack files: the binary container git uses on the wire and on disk.
//!
//! A pack is a 12-byte header (`PACK`, version, object count), a sequence
//! of zlib-compressed entries, some of them deltas against another entry,
//! and a trailing digest over everything before it.
//!
//! [`indexer::PackIndexer`] consumes a pack as a stream, verifies it and
//! resolves every delta; [`write::PackWriter`] produces packs;
//! [`pack::PackFile`] reads objects back from a stored, indexed pack.

pub mod delta;
pub mod entry;
pub mod index;
pub mod indexer;
pub mod pack;
mod progress;
pub mod thin;
pub mod write;

pub use progress::TransferProgress;

use git_hash::ObjectId;
use git_object::ObjectType;

/// Errors produced while reading, indexing or writing packs.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("invalid pack header: {0}")]
    InvalidHeader(String),

    #[error("unsupported pack version {0}")]
    UnsupportedVersion(u32),

    #[error("invalid pack index: {0}")]
    InvalidIndex(String),

    #[error("corrupt pack entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("invalid delta: {0}")]
    InvalidDelta(String),

    #[error("delta base {0} is neither in the pack nor in the object store")]
    UnresolvedDelta(ObjectId),

    #[error("delta chain deeper than {0} at offset {1}")]
    DeltaChainTooDeep(usize, u64),

    #[error("pack checksum mismatch: trailer says {expected}, content hashes to {actual}")]
    ChecksumMismatch { expected: ObjectId, actual: ObjectId },

    #[error("pack stream ended after {0} bytes")]
    Truncated(u64),

    #[error("pack transfer cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Object(#[from] git_object::ObjectError),

    #[error(transparent)]
    Hash(#[from] git_hash::HashError),
}

impl PackError {
    /// True for errors that mean the pack data itself is bad, as opposed to
    /// the stream failing or the caller cancelling.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::InvalidHeader(_)
                | Self::UnsupportedVersion(_)
                | Self::CorruptEntry { .. }
                | Self::InvalidDelta(_)
                | Self::UnresolvedDelta(_)
                | Self::DeltaChainTooDeep(..)
                | Self::ChecksumMismatch { .. }
                | Self::Truncated(_)
                | Self::Object(_)
        )
    }
}

/// Kind of a pack entry, including the two delta forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Base(ObjectType),
    /// Delta against the entry starting at this absolute pack offset.
    OfsDelta { base_offset: u64 },
    /// Delta against the object with this id, in the pack or elsewhere.
    RefDelta { base: ObjectId },
}

impl EntryKind {
    /// The 3-bit type number stored in the entry header.
    pub fn type_number(self) -> u8 {
        match self {
            Self::Base(ObjectType::Commit) => 1,
            Self::Base(ObjectType::Tree) => 2,
            Self::Base(ObjectType::Blob) => 3,
            Self::Base(ObjectType::Tag) => 4,
            Self::OfsDelta { .. } => 6,
            Self::RefDelta { .. } => 7,
        }
    }

    pub fn is_delta(self) -> bool {
        !matches!(self, Self::Base(_))
    }
}

/// A fully resolved object read out of a pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedObject {
    pub kind: ObjectType,
    pub data: Vec<u8>,
}

pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;
pub const PACK_HEADER_SIZE: usize = 12;

pub const IDX_SIGNATURE: [u8; 4] = [0xff, b't', b'O', b'c'];
pub const IDX_VERSION: u32 = 2;

/// Upper bound on delta chains followed when reading a stored pack.
pub const MAX_DELTA_CHAIN_DEPTH: usize = 4096;

/// Decode the 12-byte pack header, returning the object count.
pub fn parse_pack_header(header: &[u8]) -> Result<u32, PackError> {
    if header.len() < PACK_HEADER_SIZE {
        return Err(PackError::InvalidHeader("fewer than 12 bytes".into()));
    }
    if &header[..4] != PACK_SIGNATURE {
        return Err(PackError::InvalidHeader("missing PACK signature".into()));
    }
    let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if version != PACK_VERSION && version != 3 {
        return Err(PackError::UnsupportedVersion(version));
    }
    Ok(u32::from_be_bytes([header[8], header[9], header[10], header[11]]))
}

pub fn encode_pack_header(num_objects: u32) -> [u8; PACK_HEADER_SIZE] {
    let mut header = [0u8; PACK_HEADER_SIZE];
    header[..4].copy_from_slice(PACK_SIGNATURE);
    header[4..8].copy_from_slice(&PACK_VERSION.to_be_bytes());
    header[8..].copy_from_slice(&num_objects.to_be_bytes());
    header
}
