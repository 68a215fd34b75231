//! Splitting any byte length into [`CHUNK_SIZE`] pieces reassembles to
//! the original bytes, and the chunk count always matches
//! [`chunk_count`]'s prediction computed from the length alone (spec
//! §4.8, §8 boundary behaviors).

use meshrelay_files::{chunk_count, split, CHUNK_SIZE};
use proptest::prelude::*;

proptest! {
    #[test]
    fn splitting_reassembles_and_matches_chunk_count(len in 0usize..200_000) {
        let bytes: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
        let chunks = split(&bytes);
        prop_assert_eq!(chunks.len() as u32, chunk_count(len as u64));

        let mut reassembled = Vec::with_capacity(len);
        for chunk in &chunks {
            prop_assert!(chunk.len() <= CHUNK_SIZE);
            reassembled.extend_from_slice(chunk);
        }
        prop_assert_eq!(reassembled, bytes);
    }
}
