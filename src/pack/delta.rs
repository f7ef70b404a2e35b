//! Git delta application (`OFS_DELTA` / `REF_DELTA` bodies)

use crate::error::{Error, Result};

/// Little-endian base-128 size as used in delta headers.
fn read_size(delta: &[u8], pos: &mut usize) -> Result<usize> {
    let mut size = 0usize;
    let mut shift = 0;
    loop {
        let byte = *delta
            .get(*pos)
            .ok_or_else(|| Error::Delta("truncated size header".into()))?;
        *pos += 1;
        if shift > 63 {
            return Err(Error::Delta("size header overflows".into()));
        }
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(size);
        }
    }
}

/// Rebuild an object from its base and a delta.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut pos = 0;
    let base_size = read_size(delta, &mut pos)?;
    if base_size != base.len() {
        return Err(Error::Delta(format!(
            "base is {} bytes, delta expects {}",
            base.len(),
            base_size
        )));
    }
    let result_size = read_size(delta, &mut pos)?;
    let mut out = Vec::with_capacity(result_size);

    while pos < delta.len() {
        let op = delta[pos];
        pos += 1;

        if op & 0x80 != 0 {
            // Copy from base: bits 0-3 select offset bytes, bits 4-6 size bytes.
            let mut offset = 0usize;
            let mut size = 0usize;
            for i in 0..4 {
                if op & (1 << i) != 0 {
                    let byte = *delta
                        .get(pos)
                        .ok_or_else(|| Error::Delta("truncated copy offset".into()))?;
                    offset |= (byte as usize) << (8 * i);
                    pos += 1;
                }
            }
            for i in 0..3 {
                if op & (0x10 << i) != 0 {
                    let byte = *delta
                        .get(pos)
                        .ok_or_else(|| Error::Delta("truncated copy size".into()))?;
                    size |= (byte as usize) << (8 * i);
                    pos += 1;
                }
            }
            if size == 0 {
                size = 0x10000;
            }
            let chunk = offset
                .checked_add(size)
                .and_then(|end| base.get(offset..end))
                .ok_or_else(|| Error::Delta("copy outside of base".into()))?;
            out.extend_from_slice(chunk);
        } else if op != 0 {
            let len = op as usize;
            let chunk = delta
                .get(pos..pos + len)
                .ok_or_else(|| Error::Delta("truncated insert".into()))?;
            out.extend_from_slice(chunk);
            pos += len;
        } else {
            return Err(Error::Delta("reserved opcode 0".into()));
        }
    }

    if out.len() != result_size {
        return Err(Error::Delta(format!(
            "result is {} bytes, delta promised {}",
            out.len(),
            result_size
        )));
    }
    Ok(out)
}
