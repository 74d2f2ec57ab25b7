use super::read_varint;
use crate::PackError;

const PREALLOC_LIMIT: usize = 1 << 24;

fn invalid(reason: impl Into<String>) -> PackError {
    PackError::InvalidDelta(reason.into())
}

/// Rebuild the target object from `base` and a delta instruction stream.
///
/// Every copy is bounds-checked against the base and the result must end
/// up exactly as long as the delta header promises.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, PackError> {
    let (base_size, mut pos) = read_varint(delta).ok_or_else(|| invalid("truncated base size"))?;
    let (result_size, used) =
        read_varint(&delta[pos..]).ok_or_else(|| invalid("truncated result size"))?;
    pos += used;

    if base_size != base.len() as u64 {
        return Err(invalid(format!(
            "base is {} bytes but delta expects {base_size}",
            base.len()
        )));
    }
    let result_size =
        usize::try_from(result_size).map_err(|_| invalid("result size exceeds address space"))?;
    // The declared size is untrusted; grow past this as data arrives.
    let mut out = Vec::with_capacity(result_size.min(PREALLOC_LIMIT));

    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;

        if cmd & 0x80 != 0 {
            let mut fields = [0u32; 2];
            for (bit, field, shift) in [
                (0x01, 0, 0),
                (0x02, 0, 8),
                (0x04, 0, 16),
                (0x08, 0, 24),
                (0x10, 1, 0),
                (0x20, 1, 8),
                (0x40, 1, 16),
            ] {
                if cmd & bit != 0 {
                    let byte = *delta.get(pos).ok_or_else(|| invalid("truncated copy instruction"))?;
                    fields[field] |= u32::from(byte) << shift;
                    pos += 1;
                }
            }
            let offset = fields[0] as usize;
            let size = if fields[1] == 0 { 0x10000 } else { fields[1] as usize };
            let chunk = offset
                .checked_add(size)
                .and_then(|end| base.get(offset..end))
                .ok_or_else(|| invalid(format!("copy {offset}+{size} outside base of {}", base.len())))?;
            out.extend_from_slice(chunk);
        } else if cmd != 0 {
            let len = cmd as usize;
            let literal = delta
                .get(pos..pos + len)
                .ok_or_else(|| invalid("truncated insert instruction"))?;
            out.extend_from_slice(literal);
            pos += len;
        } else {
            return Err(invalid("reserved instruction 0"));
        }

        if out.len() > result_size {
            return Err(invalid("result overruns its declared size"));
        }
    }

    if out.len() != result_size {
        return Err(invalid(format!(
            "result is {} bytes but delta declares {result_size}",
            out.len()
        )));
    }
    Ok(out)
}
