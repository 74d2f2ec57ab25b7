//! A simple block-matching delta encoder.
//!
//! The base is cut into fixed-size blocks that are indexed by content;
//! the target is scanned for those blocks and every hit is extended
//! forwards as far as the bytes agree. Misses become literal inserts.
//! It is far less thorough than git's diff-delta but produces valid,
//! usually compact deltas for the similar blobs and trees found in
//! consecutive commits.

use std::collections::HashMap;

use super::{encode_copy, encode_insert, write_varint};

const BLOCK: usize = 16;
/// Largest size a single copy instruction can express.
const MAX_COPY: usize = 0x00ff_ffff;

pub fn compute_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(target.len() / 4 + 16);
    write_varint(base.len() as u64, &mut out);
    write_varint(target.len() as u64, &mut out);

    let mut blocks: HashMap<&[u8], usize> = HashMap::new();
    if base.len() >= BLOCK {
        for start in (0..=base.len() - BLOCK).step_by(BLOCK) {
            blocks.entry(&base[start..start + BLOCK]).or_insert(start);
        }
    }

    let mut literal_start = 0;
    let mut pos = 0;
    while pos + BLOCK <= target.len() {
        let Some(&base_pos) = blocks.get(&target[pos..pos + BLOCK]) else {
            pos += 1;
            continue;
        };
        // Copy offsets are 32-bit on the wire.
        if base_pos > u32::MAX as usize {
            pos += 1;
            continue;
        }
        let mut len = BLOCK;
        while base_pos + len < base.len()
            && pos + len < target.len()
            && base[base_pos + len] == target[pos + len]
        {
            len += 1;
        }

        encode_insert(&target[literal_start..pos], &mut out);
        let mut copied = 0;
        while copied < len {
            let chunk = (len - copied).min(MAX_COPY);
            encode_copy((base_pos + copied) as u32, chunk as u32, &mut out);
            copied += chunk;
        }
        pos += len;
        literal_start = pos;
    }
    encode_insert(&target[literal_start..], &mut out);
    out
}
