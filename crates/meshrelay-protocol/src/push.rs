//! Web push payload framing (spec §6.4).
//!
//! The relay treats this as an opaque string — it never parses it. The
//! payload wraps the same wire-form [`ControlMessage::Message`] sent
//! over the reliable stream, with `file_metadata` stripped to stay
//! under the ~4 KiB push size ceiling, plus a truncated `body` preview
//! for the notification itself.

use serde::{Deserialize, Serialize};

use crate::message::ControlMessage;

/// Notification body is truncated to this many characters (spec §6.4).
pub const BODY_MAX_CHARS: usize = 200;

/// The opaque string forwarded through `push-notify` and delivered to a
/// peer's service worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    /// Notification title (sender display name).
    pub title: String,
    /// Notification body preview, truncated to [`BODY_MAX_CHARS`] and
    /// encrypted under the room key when one exists.
    pub body: String,
    /// Room the notification originated in.
    pub room_id: String,
    /// True if `body` (and `message.content`) are AEAD ciphertext.
    pub encrypted: bool,
    /// The same wire-form message sent over the reliable stream, with
    /// `file_metadata` stripped.
    pub message: ControlMessage,
}

impl PushPayload {
    /// Build a push payload for `message`, truncating `body` to
    /// [`BODY_MAX_CHARS`] and stripping any attached `file_metadata`
    /// from the embedded message so the payload stays small.
    ///
    /// `body` should already be the wire form (ciphertext if `encrypted`
    /// is true) — this function only truncates, it never encrypts.
    #[must_use]
    pub fn new(title: String, body: &str, room_id: String, encrypted: bool, message: ControlMessage) -> Self {
        let body = truncate_body(body);
        let message = strip_file_metadata(message);
        Self {
            title,
            body,
            room_id,
            encrypted,
            message,
        }
    }
}

/// Truncate to at most [`BODY_MAX_CHARS`] `char`s, respecting UTF-8
/// boundaries (never splitting a multi-byte scalar).
#[must_use]
pub fn truncate_body(body: &str) -> String {
    body.chars().take(BODY_MAX_CHARS).collect()
}

/// Drop `file_metadata` from a `message` variant so the push payload
/// never carries file bytes or their metadata over the ~4 KiB push
/// transport (spec §6.4). Every other variant passes through unchanged.
#[must_use]
pub fn strip_file_metadata(message: ControlMessage) -> ControlMessage {
    match message {
        ControlMessage::Message {
            id,
            channel_id,
            user_id,
            username,
            content,
            timestamp,
            gif_url,
            ..
        } => ControlMessage::Message {
            id,
            channel_id,
            user_id,
            username,
            content,
            timestamp,
            file_metadata: None,
            gif_url,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_message(content: &str, with_file: bool) -> ControlMessage {
        ControlMessage::Message {
            id: Uuid::now_v7(),
            channel_id: Uuid::now_v7(),
            user_id: "u1".into(),
            username: "alice".into(),
            content: content.into(),
            timestamp: 0,
            file_metadata: with_file.then(|| crate::model::FileMetadata {
                name: "f.bin".into(),
                size: 10,
                mime_type: "application/octet-stream".into(),
                chunks: 1,
                transfer_id: Uuid::now_v7(),
            }),
            gif_url: None,
        }
    }

    #[test]
    fn file_metadata_is_stripped() {
        let msg = sample_message("hi", true);
        let payload = PushPayload::new("alice".into(), "hi", "AB12CD".into(), false, msg);
        match payload.message {
            ControlMessage::Message { file_metadata, .. } => assert!(file_metadata.is_none()),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn body_is_truncated_to_200_chars() {
        let long = "x".repeat(500);
        let truncated = truncate_body(&long);
        assert_eq!(truncated.chars().count(), BODY_MAX_CHARS);
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let body: String = std::iter::repeat('🌍').take(300).collect();
        let truncated = truncate_body(&body);
        assert_eq!(truncated.chars().count(), BODY_MAX_CHARS);
        assert!(String::from_utf8(truncated.into_bytes()).is_ok());
    }

    #[test]
    fn encrypted_flag_is_carried_through() {
        let msg = sample_message("iv:ciphertext", false);
        let payload = PushPayload::new("alice".into(), "iv:ciphertext", "AB12CD".into(), true, msg);
        assert!(payload.encrypted);
    }

    #[test]
    fn non_message_variants_pass_through_unchanged() {
        let msg = ControlMessage::PresenceEvent {
            user_id: "u1".into(),
            username: "alice".into(),
            joined: true,
            timestamp: 0,
        };
        let stripped = strip_file_metadata(msg.clone());
        assert_eq!(stripped, msg);
    }
}
