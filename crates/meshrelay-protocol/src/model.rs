//! Wire/storage data model shared by every meshrelay crate (spec §3).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel kind: text or voice (spec §3 Channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Text channel carrying chat messages and file transfers.
    Text,
    /// Voice channel carrying audio/camera/screen tracks.
    Voice,
}

/// A channel inside a room (spec §3 Channel). Unique by `id`; insertion
/// order is preserved by whatever collection holds a room's channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Text or voice.
    pub kind: ChannelKind,
    /// Creation time, unix millis.
    pub created_at: i64,
}

/// A room: an ordered set of channels, replicated peer-to-peer (spec §3
/// Room). `name == "Room <id>"` marks the room as *unnamed*, eligible to
/// be overwritten by a named room on sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// Room id (matches the short room code used for joining).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Creation time, unix millis.
    pub created_at: i64,
}

impl Room {
    /// The default, unnamed display name for a freshly created room.
    #[must_use]
    pub fn default_name(id: &str) -> String {
        format!("Room {id}")
    }

    /// True if this room has never been given a name beyond the default.
    #[must_use]
    pub fn is_unnamed(&self) -> bool {
        self.name == Self::default_name(&self.id)
    }
}

/// Client-supplied metadata describing a file attached to a message (spec
/// §3 FileMetadata, §4.8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Original file name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME type.
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Number of 16 KiB chunks the file was split into.
    pub chunks: u32,
    /// Fresh id correlating `file-metadata` with subsequent chunks.
    pub transfer_id: Uuid,
}

/// A system notice embedded in a message when `system_action` is set
/// (presence transitions, pending key authorization, key-handoff
/// results — spec §4.7, §4.9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SystemAction {
    /// A peer joined the room.
    PeerJoined {
        /// Trimmed, non-empty username.
        username: String,
    },
    /// A peer left the room.
    PeerLeft {
        /// Trimmed, non-empty username.
        username: String,
    },
    /// No room key was available on join.
    MissingKey,
    /// A peer requested the room key and awaits authorization.
    PendingAuthorization {
        /// The id of the peer awaiting authorization.
        target_peer_id: String,
        /// The requester's username, for display.
        requester_username: String,
        /// Set once an authorizer has acted; `None` while still pending.
        resolved_by: Option<String>,
    },
    /// The local peer was authorized and installed a room key.
    Authorized {
        /// Username of the peer that shared the key.
        shared_by_username: String,
    },
}

/// A chat message (spec §3 Message). `content` is plaintext once stored
/// locally; on the wire it is ciphertext whenever a room key is present
/// for the room (invariant 2) — this type carries either representation,
/// with the caller responsible for encrypting/decrypting around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// UUIDv7 message id; total order across peers.
    pub id: Uuid,
    /// Channel this message belongs to.
    pub channel_id: Uuid,
    /// Sending peer's id.
    pub user_id: String,
    /// Sending peer's display name at time of send.
    pub username: String,
    /// Plaintext locally, ciphertext on the wire (see type doc).
    pub content: String,
    /// Unix millis at time of send.
    pub timestamp: i64,
    /// Whether this message has completed sync dedup/merge locally.
    #[serde(default)]
    pub synced: bool,
    /// Present when a file is attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_metadata: Option<FileMetadata>,
    /// Resolved URL for a previously-stored file, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// Id of the file blob in the local durable store, if stored in full.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_file_id: Option<String>,
    /// GIF attachment URL, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gif_url: Option<String>,
    /// Reactions keyed by `(emoji, user_id)` at the call site.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
    /// Set when this message is a system notice rather than user content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_action: Option<SystemAction>,
}

/// A single reaction, keyed by `(message_id, emoji, user_id)` (spec §3
/// Reaction). Add/remove of a given key is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    /// Emoji shortcode or literal glyph.
    pub emoji: String,
    /// Reacting peer's id.
    pub user_id: String,
}

/// Add or remove a reaction (spec §4.2 `reaction` tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    /// Add the reaction if absent; no-op if already present.
    Add,
    /// Remove the reaction if present; no-op if absent.
    Remove,
}

/// Apply `action` for `(emoji, user_id)` to `reactions` in place,
/// idempotently (spec §8 round-trip law: `add` twice equals `add` once;
/// `add` then `remove` restores the original state).
pub fn apply_reaction(
    reactions: &mut Vec<Reaction>,
    action: ReactionAction,
    emoji: &str,
    user_id: &str,
) {
    let position = reactions
        .iter()
        .position(|r| r.emoji == emoji && r.user_id == user_id);
    match (action, position) {
        (ReactionAction::Add, None) => reactions.push(Reaction {
            emoji: emoji.to_string(),
            user_id: user_id.to_string(),
        }),
        (ReactionAction::Add, Some(_)) => {}
        (ReactionAction::Remove, Some(idx)) => {
            reactions.remove(idx);
        }
        (ReactionAction::Remove, None) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_unnamed_detection() {
        let room = Room {
            id: "AB3D7Q".into(),
            name: Room::default_name("AB3D7Q"),
            created_at: 0,
        };
        assert!(room.is_unnamed());

        let named = Room {
            name: "Project Falcon".into(),
            ..room
        };
        assert!(!named.is_unnamed());
    }

    #[test]
    fn reaction_add_is_idempotent() {
        let mut reactions = Vec::new();
        apply_reaction(&mut reactions, ReactionAction::Add, "🔥", "u1");
        apply_reaction(&mut reactions, ReactionAction::Add, "🔥", "u1");
        assert_eq!(reactions.len(), 1);
    }

    #[test]
    fn reaction_add_then_remove_restores_original() {
        let mut reactions = vec![Reaction {
            emoji: "👍".into(),
            user_id: "u2".into(),
        }];
        let original = reactions.clone();
        apply_reaction(&mut reactions, ReactionAction::Add, "🔥", "u1");
        apply_reaction(&mut reactions, ReactionAction::Remove, "🔥", "u1");
        assert_eq!(reactions, original);
    }

    #[test]
    fn reaction_remove_without_add_is_noop() {
        let mut reactions = Vec::new();
        apply_reaction(&mut reactions, ReactionAction::Remove, "🔥", "u1");
        assert!(reactions.is_empty());
    }

    #[test]
    fn message_serializes_without_optional_fields() {
        let msg = Message {
            id: Uuid::now_v7(),
            channel_id: Uuid::now_v7(),
            user_id: "u1".into(),
            username: "alice".into(),
            content: "hello".into(),
            timestamp: 0,
            synced: false,
            file_metadata: None,
            file_url: None,
            stored_file_id: None,
            gif_url: None,
            reactions: Vec::new(),
            system_action: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("file_metadata"));
        assert!(!json.contains("system_action"));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
