//! AES-256-GCM authenticated encryption of message payloads (spec §4.1).
//!
//! Wire form: `base64url(iv) ":" base64url(ciphertext_with_tag)`. The
//! absence of `:` in a candidate string is treated as "not encrypted" by
//! [`decrypt`], which returns `None` in that case exactly as it does for a
//! genuine authentication failure — callers fall back to the raw text
//! either way (spec's open question on the `:` heuristic leaves this as
//! the recommended, not mandated, discriminator; we keep it because it is
//! what the distilled behavior describes).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::random::random_12;
use crate::room_key::RoomKey;

const IV_LEN: usize = 12;

/// Encrypt `plaintext` under `key`, returning the wire-form ciphertext.
///
/// `O(n)` over `plaintext.len()`; a fresh random 96-bit IV is drawn for
/// every call, so repeated encryption of identical plaintext yields
/// different wire strings.
pub fn encrypt(plaintext: &str, key: &RoomKey) -> String {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).expect("32-byte key");
    let iv_bytes = random_12().expect("OS CSPRNG");
    let nonce = Nonce::from_slice(&iv_bytes);

    // AES-GCM only fails to encrypt on buffer-too-large conditions that
    // cannot occur for chat-sized payloads.
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .expect("AES-GCM encryption of bounded plaintext cannot fail");

    format!(
        "{}:{}",
        URL_SAFE_NO_PAD.encode(iv_bytes),
        URL_SAFE_NO_PAD.encode(ciphertext)
    )
}

/// Decrypt a wire-form string produced by [`encrypt`] using `key`.
///
/// Returns `None` if the string has no `:` separator, either half fails
/// base64 decoding, the IV is not 12 bytes, or the AEAD tag check fails.
/// No error is surfaced to callers beyond this; they treat `None` as "use
/// the text as-is".
#[must_use]
pub fn decrypt(wire: &str, key: &RoomKey) -> Option<String> {
    let (iv_b64, ct_b64) = wire.split_once(':')?;

    let iv_bytes = URL_SAFE_NO_PAD.decode(iv_b64).ok()?;
    if iv_bytes.len() != IV_LEN {
        return None;
    }
    let ciphertext = URL_SAFE_NO_PAD.decode(ct_b64).ok()?;

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).ok()?;
    let nonce = Nonce::from_slice(&iv_bytes);

    let plaintext_bytes = cipher.decrypt(nonce, ciphertext.as_ref()).ok()?;
    String::from_utf8(plaintext_bytes).ok()
}

/// Heuristic discriminator for "this string is plausibly our wire
/// ciphertext format" — exposed separately from [`decrypt`] for callers
/// that want to skip a decrypt attempt on plaintext entirely.
#[must_use]
pub fn looks_encrypted(candidate: &str) -> bool {
    candidate.contains(':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_ascii() {
        let key = RoomKey::generate().unwrap();
        let wire = encrypt("hello room", &key);
        assert_eq!(decrypt(&wire, &key).as_deref(), Some("hello room"));
    }

    #[test]
    fn round_trip_multibyte() {
        let key = RoomKey::generate().unwrap();
        let wire = encrypt("Hello, 🌍", &key);
        assert_eq!(decrypt(&wire, &key).as_deref(), Some("Hello, 🌍"));
    }

    #[test]
    fn round_trip_empty() {
        let key = RoomKey::generate().unwrap();
        let wire = encrypt("", &key);
        assert_eq!(decrypt(&wire, &key).as_deref(), Some(""));
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let key = RoomKey::generate().unwrap();
        let other = RoomKey::generate().unwrap();
        let wire = encrypt("secret", &key);
        assert_eq!(decrypt(&wire, &other), None);
    }

    #[test]
    fn plaintext_without_colon_is_not_encrypted() {
        let key = RoomKey::generate().unwrap();
        assert!(!looks_encrypted("plain text message"));
        assert_eq!(decrypt("plain text message", &key), None);
    }

    #[test]
    fn distinct_ivs_per_call() {
        let key = RoomKey::generate().unwrap();
        let a = encrypt("same input", &key);
        let b = encrypt("same input", &key);
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_wire_form_is_rejected() {
        let key = RoomKey::generate().unwrap();
        assert_eq!(decrypt("not-base64!!:also-not-base64!!", &key), None);
        assert_eq!(decrypt("::", &key), None);
    }
}
