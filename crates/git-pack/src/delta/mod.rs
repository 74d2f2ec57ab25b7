//! Delta instruction streams.
//!
//! ```text
//! [base size: varint] [result size: varint] [instruction]*
//! copy:   1 o o o o s s s   offset bytes selected by o, size bytes by s
//! insert: 0 n n n n n n n   followed by n literal bytes (1..=127)
//! ```

pub mod apply;
pub mod compute;

pub use apply::apply_delta;
pub use compute::compute_delta;

/// Largest literal run a single insert instruction can carry.
pub const MAX_INSERT: usize = 0x7f;

/// Read a little-endian base-128 size, returning it with its length.
pub fn read_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().enumerate() {
        let shift = 7 * i as u32;
        if shift > 63 {
            return None;
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

pub fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Append a copy instruction, omitting zero bytes of offset and size.
pub fn encode_copy(offset: u32, size: u32, out: &mut Vec<u8>) {
    let size = if size == 0x10000 { 0 } else { size };
    let mut cmd = 0x80u8;
    let mut args = Vec::with_capacity(7);
    for i in 0..4 {
        let byte = (offset >> (8 * i)) as u8;
        if byte != 0 {
            cmd |= 1 << i;
            args.push(byte);
        }
    }
    for i in 0..3 {
        let byte = (size >> (8 * i)) as u8;
        if byte != 0 {
            cmd |= 0x10 << i;
            args.push(byte);
        }
    }
    out.push(cmd);
    out.extend_from_slice(&args);
}

/// Append one or more insert instructions carrying `data`.
pub fn encode_insert(data: &[u8], out: &mut Vec<u8>) {
    for chunk in data.chunks(MAX_INSERT) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
}
