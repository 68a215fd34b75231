//! Control-channel message set (spec §4.2).
//!
//! Every variant round-trips through `serde_json` tagged on `type` using
//! the exact kebab-case strings the spec names, so a peer running a
//! different language implementation of this protocol can interoperate
//! purely off the wire JSON.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{FileMetadata, Reaction, ReactionAction};

/// One frame on a peer's reliable data channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Announces the sender's identity on channel open.
    UserInfo {
        /// Sender's peer id.
        user_id: String,
        /// Sender's display name.
        username: String,
    },
    /// A chat message, possibly AEAD-ciphertext in `content`.
    Message {
        /// Message id (UUIDv7).
        id: Uuid,
        /// Target channel.
        channel_id: Uuid,
        /// Sender peer id.
        user_id: String,
        /// Sender display name.
        username: String,
        /// Plaintext or `iv:ciphertext` wire form.
        content: String,
        /// Unix millis.
        timestamp: i64,
        /// Attached file's metadata, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_metadata: Option<FileMetadata>,
        /// GIF attachment URL, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gif_url: Option<String>,
    },
    /// Add or remove a reaction on an existing message.
    Reaction {
        /// Target message id.
        message_id: Uuid,
        /// Reaction content.
        #[serde(flatten)]
        reaction: Reaction,
        /// Add or remove.
        action: ReactionAction,
    },
    /// A new channel was created and should be merged locally.
    ChannelCreated {
        /// New channel id.
        id: Uuid,
        /// Display name.
        name: String,
        /// Text or voice.
        kind: crate::model::ChannelKind,
        /// Unix millis.
        created_at: i64,
    },
    /// Presence transition for a peer (join/leave), carried as a system
    /// notice so every peer renders it consistently.
    PresenceEvent {
        /// The affected peer's id.
        user_id: String,
        /// The affected peer's display name.
        username: String,
        /// True on join, false on leave.
        joined: bool,
        /// Unix millis.
        timestamp: i64,
    },
    /// Opens set-difference reconciliation with the recipient (spec §4.7).
    SyncHello {
        /// The sender's most recent message id across all channels, if
        /// it has any messages at all.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_message_id: Option<Uuid>,
        /// Up to 2000 most-recent message ids the sender already has,
        /// used when `last_message_id` alone can't establish the diff
        /// (spec §4.7: `known_message_ids`, capped at 2000).
        known_message_ids: Vec<Uuid>,
        /// Channel ids the sender already knows about.
        known_channel_ids: Vec<Uuid>,
        /// The sender's local room creation time, unix millis.
        room_created_at: i64,
    },
    /// Names ids the sender wants full messages for. Declared in the
    /// protocol's tag set (spec §4.2) alongside `sync-hello`/
    /// `sync-response`; the reconciliation algorithm in spec §4.7
    /// computes the diff directly from `sync-hello` and replies with
    /// `sync-response` without requiring this round trip, so this
    /// variant exists for forward compatibility with recipients that
    /// prefer to request explicitly rather than have the diff inferred.
    SyncRequest {
        /// Ids the requester wants full messages for.
        missing_ids: Vec<Uuid>,
    },
    /// Reply to `sync-hello`, carrying whatever the recipient judged the
    /// sender to be missing (spec §4.7).
    SyncResponse {
        /// The room name, present only when the sender's room is named
        /// (non-default) and worth merging into an unnamed local room.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<crate::model::Room>,
        /// Channels the recipient doesn't yet know about.
        channels: Vec<crate::model::Channel>,
        /// Messages the recipient is missing, capped at 100.
        messages: Vec<crate::model::Message>,
    },
    /// Requests a page of channel history older than `before`.
    HistoryRequest {
        /// Channel being paginated.
        channel_id: Uuid,
        /// Exclusive upper bound (message id), `None` for the newest page.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<Uuid>,
        /// Page size.
        limit: u32,
    },
    /// Reply to `history-request`.
    HistoryResponse {
        /// Channel being paginated.
        channel_id: Uuid,
        /// The requested page, newest-first.
        messages: Vec<crate::model::Message>,
        /// True if older messages remain.
        has_more: bool,
    },
    /// Voice channel join/leave/mute state.
    VoiceState {
        /// Peer id.
        user_id: String,
        /// Target voice channel, `None` when leaving voice entirely.
        channel_id: Option<Uuid>,
        /// Self-muted.
        muted: bool,
    },
    /// Voice-activity indicator, sent frequently and not persisted.
    SpeakingState {
        /// Peer id.
        user_id: String,
        /// Currently speaking above the local VAD threshold.
        speaking: bool,
    },
    /// Screen-share availability toggle.
    ScreenShareState {
        /// Peer id.
        user_id: String,
        /// True while actively sharing.
        sharing: bool,
    },
    /// Camera availability toggle.
    CameraState {
        /// Peer id.
        user_id: String,
        /// True while the camera track is live.
        enabled: bool,
    },
    /// Subscribes to a peer's screen-share track.
    ScreenWatch {
        /// Id of the peer being watched.
        target_user_id: String,
        /// True to subscribe, false to unsubscribe. Wire field is `watch`
        /// (spec §4.10: `screen-watch{watch:true|false}`).
        #[serde(rename = "watch")]
        watching: bool,
    },
    /// Announces an inbound file transfer; chunk bytes follow as binary
    /// frames tagged by `file-chunk-meta` (spec §4.5, §4.8).
    FileMetadata {
        /// The message this file is attached to.
        message_id: Uuid,
        /// File metadata.
        #[serde(flatten)]
        metadata: FileMetadata,
    },
    /// Precedes one binary chunk frame; the codec holds this in a
    /// single per-stream pending slot until the binary frame arrives
    /// (spec §4.2, §9).
    FileChunkMeta {
        /// Correlates to the `file-metadata` transfer.
        transfer_id: Uuid,
        /// Zero-based chunk index.
        index: u32,
    },
    /// Requests the current room key from any peer that holds one.
    RoomKeyRequest {
        /// Requesting peer id.
        user_id: String,
        /// Requesting peer's display name, for authorization prompts.
        username: String,
    },
    /// Shares the room key with a specific requesting peer.
    RoomKeyShare {
        /// Recipient peer id.
        target_user_id: String,
        /// Base64url-encoded 256-bit room key.
        key: String,
        /// Sharing peer's display name.
        shared_by_username: String,
    },
}

impl ControlMessage {
    /// The wire tag string for this variant, matching spec §4.2's
    /// `type` discriminator (kebab-case).
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::UserInfo { .. } => "user-info",
            Self::Message { .. } => "message",
            Self::Reaction { .. } => "reaction",
            Self::ChannelCreated { .. } => "channel-created",
            Self::PresenceEvent { .. } => "presence-event",
            Self::SyncHello { .. } => "sync-hello",
            Self::SyncRequest { .. } => "sync-request",
            Self::SyncResponse { .. } => "sync-response",
            Self::HistoryRequest { .. } => "history-request",
            Self::HistoryResponse { .. } => "history-response",
            Self::VoiceState { .. } => "voice-state",
            Self::SpeakingState { .. } => "speaking-state",
            Self::ScreenShareState { .. } => "screen-share-state",
            Self::CameraState { .. } => "camera-state",
            Self::ScreenWatch { .. } => "screen-watch",
            Self::FileMetadata { .. } => "file-metadata",
            Self::FileChunkMeta { .. } => "file-chunk-meta",
            Self::RoomKeyRequest { .. } => "room-key-request",
            Self::RoomKeyShare { .. } => "room-key-share",
        }
    }
}
