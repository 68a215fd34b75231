//! Room/Key Lifecycle (C9): key acquisition order, missing-key notice,
//! in-band request/authorize/share handoff, and per-peer request
//! debouncing (spec §4.9).

use dashmap::DashSet;
use meshrelay_crypto::RoomKey;
use meshrelay_protocol::model::SystemAction;
use meshrelay_protocol::{ChannelKind, Message};
use uuid::Uuid;

use crate::peer::PeerId;
use crate::store::Store;

/// Resolve the room key to use on join, top wins (spec §4.9):
/// (a) an explicit key argument, (b) the invite URL fragment, (c) the
/// local key store.
pub async fn acquire_room_key(
    store: &dyn Store,
    room_id: &str,
    explicit: Option<RoomKey>,
    from_invite_fragment: Option<RoomKey>,
) -> Option<RoomKey> {
    if let Some(key) = explicit {
        return Some(key);
    }
    if let Some(key) = from_invite_fragment {
        return Some(key);
    }
    store.get_room_key(room_id).await
}

/// Find the room's primary text channel: the channel the room history
/// has on record, falling back to the first text channel by insertion
/// order (spec §4.9: system notices are posted "in the primary text
/// channel").
pub async fn primary_text_channel(store: &dyn Store) -> Option<Uuid> {
    if let Some(room) = store.get_room().await {
        if let Some(history) = store.get_room_history(&room.id).await {
            if let Some(channel_id) = history.last_channel_id {
                return Some(channel_id);
            }
        }
    }
    store
        .channels()
        .await
        .into_iter()
        .find(|c| c.kind == ChannelKind::Text)
        .map(|c| c.id)
}

fn system_message(channel_id: Uuid, action: SystemAction) -> Message {
    Message {
        id: meshrelay_protocol::new_message_id(),
        channel_id,
        user_id: "system".to_string(),
        username: "system".to_string(),
        content: String::new(),
        timestamp: meshrelay_protocol::now_millis(),
        synced: true,
        file_metadata: None,
        file_url: None,
        stored_file_id: None,
        gif_url: None,
        reactions: Vec::new(),
        system_action: Some(action),
    }
}

/// Post the "no key on join" system notice (spec §4.9), if a primary
/// text channel exists yet. Returns the persisted message's id.
pub async fn post_missing_key_notice(store: &dyn Store) -> Option<Uuid> {
    let channel_id = primary_text_channel(store).await?;
    let message = system_message(channel_id, SystemAction::MissingKey);
    let id = message.id;
    store.put_message(message).await;
    Some(id)
}

/// Post a pending-authorization notice for an inbound `room-key-request`
/// (spec §4.9). Not auto-resolved; [`resolve_pending_authorization`]
/// rewrites it once a user authorizes.
pub async fn post_pending_authorization(
    store: &dyn Store,
    target_peer_id: &str,
    requester_username: &str,
) -> Option<Uuid> {
    let channel_id = primary_text_channel(store).await?;
    let message = system_message(
        channel_id,
        SystemAction::PendingAuthorization {
            target_peer_id: target_peer_id.to_string(),
            requester_username: requester_username.to_string(),
            resolved_by: None,
        },
    );
    let id = message.id;
    store.put_message(message).await;
    Some(id)
}

/// Rewrite a pending-authorization notice as resolved, once a user has
/// authorized the request (spec §4.9 "Authorize").
pub async fn resolve_pending_authorization(store: &dyn Store, message_id: Uuid, authorizer_username: &str) {
    let Some(mut message) = store.get_message(message_id).await else {
        return;
    };
    if let Some(SystemAction::PendingAuthorization {
        target_peer_id,
        requester_username,
        ..
    }) = message.system_action
    {
        message.system_action = Some(SystemAction::PendingAuthorization {
            target_peer_id,
            requester_username,
            resolved_by: Some(authorizer_username.to_string()),
        });
        store.put_message(message).await;
    }
}

/// Install an inbound `room-key-share`: persist the key, re-decrypt
/// every stored message in the primary text channel whose content now
/// decrypts under it, and post the "you were authorized" notice (spec
/// §4.9). Returns the count of messages whose stored content changed.
///
/// Re-running `data_channel_ready` sync against connected peers is the
/// caller's responsibility (spec §4.9 step: "then run the normal
/// `data_channel_ready` sync path"), since it requires the Mesh
/// Manager's peer set, which this module has no access to.
pub async fn install_shared_key(
    store: &dyn Store,
    room_id: &str,
    key: RoomKey,
    shared_by_username: &str,
) -> usize {
    store.put_room_key(room_id, key.clone()).await;

    let mut rewritten = 0;
    if let Some(channel_id) = primary_text_channel(store).await {
        for mut message in store.messages_by_channel(channel_id).await {
            if let Some(plain) = meshrelay_crypto::aead::decrypt(&message.content, &key) {
                message.content = plain;
                store.put_message(message).await;
                rewritten += 1;
            }
        }

        let notice = system_message(
            channel_id,
            SystemAction::Authorized {
                shared_by_username: shared_by_username.to_string(),
            },
        );
        store.put_message(notice).await;
    }

    rewritten
}

/// Per-peer debouncing of outstanding `room-key-request`s: at most one
/// in flight per peer id, reset on key acquisition or peer reconnect
/// (spec §4.9).
#[derive(Default)]
pub struct RequestDebouncer {
    outstanding: DashSet<PeerId>,
}

impl RequestDebouncer {
    /// A fresh debouncer with nothing outstanding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a `room-key-request` should be sent to `peer_id` now;
    /// marks it outstanding as a side effect so a second call returns
    /// `false` until [`Self::reset`].
    pub fn should_request(&self, peer_id: &str) -> bool {
        self.outstanding.insert(peer_id.to_string())
    }

    /// Clear the outstanding flag for `peer_id`, e.g. once the key has
    /// been acquired or the peer reconnects.
    pub fn reset(&self, peer_id: &str) {
        self.outstanding.remove(peer_id);
    }
}
