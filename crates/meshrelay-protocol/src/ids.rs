//! Time-sortable identifiers and short room codes (spec §3).
//!
//! Message IDs are UUIDv7: a 48-bit big-endian millisecond timestamp
//! followed by 74 bits of randomness (plus version/variant nibbles).
//! Lexicographic order on the canonical string form equals chronological
//! order, which the sync engine (C7) relies on for convergent ordering
//! across peers with no shared clock beyond wall time.

use uuid::Uuid;

/// Generate a fresh UUIDv7 message id from the current wall clock.
#[must_use]
pub fn new_message_id() -> Uuid {
    Uuid::now_v7()
}

/// Current wall-clock time, unix milliseconds, for `timestamp`/`created_at`
/// fields across the data model.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Room code alphabet: unambiguous uppercase letters and digits, spec §3.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Generate a random 6-character room code from [`ROOM_CODE_ALPHABET`].
pub fn new_room_code() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ROOM_CODE_ALPHABET.len());
            ROOM_CODE_ALPHABET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn message_ids_increase_with_wall_clock() {
        let a = new_message_id();
        sleep(Duration::from_millis(2));
        let b = new_message_id();
        assert!(a.to_string() < b.to_string());
        assert!(a < b);
    }

    #[test]
    fn room_code_uses_alphabet_only() {
        let code = new_room_code();
        assert_eq!(code.len(), ROOM_CODE_LEN);
        assert!(
            code.bytes()
                .all(|b| ROOM_CODE_ALPHABET.contains(&b))
        );
    }

    #[test]
    fn room_codes_are_not_constant() {
        let a = new_room_code();
        let b = new_room_code();
        // Astronomically unlikely to collide at 6 chars from a 32-symbol alphabet.
        assert_ne!(a, b);
    }
}
