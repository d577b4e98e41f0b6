//! Payload masking (RFC 6455 Section 5.3).
//!
//! The transformation is its own inverse, so the same function masks outgoing
//! payloads and unmasks incoming ones.

/// XORs `buf` with `key`, using key byte `i % 4` for payload byte `i`.
#[inline]
pub(crate) fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    let word = u32::from_ne_bytes(key);

    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let value = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ word;
        chunk.copy_from_slice(&value.to_ne_bytes());
    }

    // chunks are 4-aligned relative to the payload start, so the tail restarts at key[0]
    for (byte, k) in chunks.into_remainder().iter_mut().zip(key) {
        *byte ^= k;
    }
}
