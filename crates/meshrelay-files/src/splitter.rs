//! Splits a byte buffer into fixed-size chunks for outbound transfer
//! (spec §4.8).

/// Fixed chunk size: 16 KiB.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Number of chunks a file of `total_size` bytes splits into. A
/// zero-byte file still yields exactly one (empty) chunk.
#[must_use]
pub fn chunk_count(total_size: u64) -> u32 {
    if total_size == 0 {
        return 1;
    }
    total_size.div_ceil(CHUNK_SIZE as u64) as u32
}

/// Split `bytes` into `CHUNK_SIZE` slices in order. Mirrors
/// [`chunk_count`]: an empty input yields one empty slice.
#[must_use]
pub fn split(bytes: &[u8]) -> Vec<&[u8]> {
    if bytes.is_empty() {
        return vec![&bytes[0..0]];
    }
    bytes.chunks(CHUNK_SIZE).collect()
}
