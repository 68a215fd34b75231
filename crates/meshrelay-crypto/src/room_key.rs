//! Per-room symmetric key: generation, wire encoding, invite URLs.
//!
//! A [`RoomKey`] is 256 bits of random key material shared by every member
//! of a room. It is the sole authorization artifact in this protocol:
//! possession of the key is what lets a peer decrypt (and be trusted to
//! encrypt) room traffic (spec §4.9).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::error::CryptoError;
use crate::random::random_32;

/// 256-bit room symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct RoomKey([u8; 32]);

impl std::fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RoomKey").field(&"<redacted>").finish()
    }
}

impl RoomKey {
    /// Generate a fresh random room key.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self(random_32()?))
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encode as unpadded base64url, the form used in invite fragments,
    /// `room-key-share` payloads, and local key-store persistence.
    #[must_use]
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Decode from unpadded base64url.
    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| CryptoError::InvalidEncoding)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| CryptoError::InvalidKeyLength {
                expected: 32,
                actual: v.len(),
            })?;
        Ok(Self(arr))
    }
}

/// An invite built from a room code and a key, per spec §4.1/§6.2:
/// `?join=<ROOM_CODE>#ek=<base64url_key>`. The fragment never reaches the
/// relay; callers must strip both `join` and the fragment once consumed.
#[derive(Debug, Clone)]
pub struct Invite {
    /// Room code, `join` query parameter.
    pub room_code: String,
    /// Room key, `ek` URL fragment.
    pub key: RoomKey,
}

impl Invite {
    /// Render `https://<host>/?join=<code>#ek=<key>`.
    #[must_use]
    pub fn to_url(&self, host: &str) -> String {
        format!(
            "https://{host}/?join={}#ek={}",
            self.room_code,
            self.key.to_base64()
        )
    }

    /// Parse the `join` query parameter and `ek` fragment out of an invite
    /// URL. Returns `None` if either piece is absent or malformed.
    #[must_use]
    pub fn parse(url: &str) -> Option<Self> {
        let (before_fragment, fragment) = url.split_once('#')?;
        let ek = fragment.strip_prefix("ek=")?;
        let key = RoomKey::from_base64(ek).ok()?;

        let query = before_fragment.split_once('?').map(|(_, q)| q)?;
        let room_code = query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == "join").then(|| v.to_string())
        })?;

        Some(Self { room_code, key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_distinct_keys() {
        let a = RoomKey::generate().unwrap();
        let b = RoomKey::generate().unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn base64_round_trip() {
        let key = RoomKey::generate().unwrap();
        let encoded = key.to_base64();
        assert!(!encoded.contains('='), "must be unpadded");
        let decoded = RoomKey::from_base64(&encoded).unwrap();
        assert_eq!(key, decoded);
    }

    #[test]
    fn invite_round_trip() {
        let key = RoomKey::generate().unwrap();
        let invite = Invite {
            room_code: "AB3D7Q".to_string(),
            key: key.clone(),
        };
        let url = invite.to_url("example.com");
        let parsed = Invite::parse(&url).unwrap();
        assert_eq!(parsed.room_code, "AB3D7Q");
        assert_eq!(parsed.key, key);
    }

    #[test]
    fn invite_parse_rejects_missing_fragment() {
        assert!(Invite::parse("https://example.com/?join=AB3D7Q").is_none());
    }

    #[test]
    fn invite_parse_rejects_missing_join() {
        let key = RoomKey::generate().unwrap();
        let url = format!("https://example.com/?foo=bar#ek={}", key.to_base64());
        assert!(Invite::parse(&url).is_none());
    }
}
