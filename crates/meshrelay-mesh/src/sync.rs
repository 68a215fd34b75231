//! Sync Engine (C7): anti-entropy reconciliation over UUIDv7-ordered
//! message ids, paginated history pull, and the presence state machine
//! (spec §4.7).

use std::time::Duration;

use dashmap::DashMap;
use meshrelay_crypto::aead;
use meshrelay_crypto::RoomKey;
use meshrelay_protocol::model::SystemAction;
use meshrelay_protocol::{Channel, ChannelKind, Message, Room};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::peer::PeerId;
use crate::store::{RoomHistoryEntry, Store};

/// Cap on `known_message_ids` carried in a `sync-hello` (spec §4.7 step 1).
pub const KNOWN_IDS_CAP: usize = 2000;
/// Cap on messages returned in a single `sync-response` (spec §4.7 step 1).
pub const MISSING_MESSAGES_CAP: usize = 100;
/// Cap on a single `history-request`/`history-response` page (spec §4.7).
pub const HISTORY_PAGE_CAP: u32 = 100;
/// Timeout for an outstanding history request (spec §5).
pub const HISTORY_REQUEST_TIMEOUT: Duration = Duration::from_secs(6);

/// The `sync-hello` payload, built from local state (spec §4.7 step 1).
#[derive(Debug, Clone, PartialEq)]
pub struct SyncHello {
    /// The most recent local message id, if any messages exist at all.
    pub last_message_id: Option<Uuid>,
    /// Up to [`KNOWN_IDS_CAP`] of the most recent local message ids.
    pub known_message_ids: Vec<Uuid>,
    /// All locally known channel ids.
    pub known_channel_ids: Vec<Uuid>,
    /// Local room creation time, unix millis, or 0 if no room yet.
    pub room_created_at: i64,
}

/// Gather local state into the outbound `sync-hello` payload fired when
/// a peer's reliable stream becomes ready (spec §4.7).
pub async fn build_sync_hello(store: &dyn Store) -> SyncHello {
    let channels = store.channels().await;
    let mut all_messages = Vec::new();
    for channel in &channels {
        all_messages.extend(store.messages_by_channel(channel.id).await);
    }
    all_messages.sort_by_key(|m| m.id);

    let last_message_id = all_messages.last().map(|m| m.id);
    let known_message_ids = all_messages
        .iter()
        .rev()
        .take(KNOWN_IDS_CAP)
        .map(|m| m.id)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let known_channel_ids = channels.iter().map(|c| c.id).collect();
    let room_created_at = store.get_room().await.map_or(0, |room| room.created_at);

    SyncHello {
        last_message_id,
        known_message_ids,
        known_channel_ids,
        room_created_at,
    }
}

/// What to send back in response to a peer's `sync-hello`, or `None` if
/// there's nothing to share and the local room has no name worth
/// merging (spec §4.7 step 3).
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResponse {
    /// The local room, included only when it has a non-default name.
    pub room: Option<Room>,
    /// Channels the peer doesn't yet know about.
    pub channels: Vec<Channel>,
    /// Messages the peer is missing, wire-form (encrypted if a key is
    /// present), capped at [`MISSING_MESSAGES_CAP`].
    pub messages: Vec<Message>,
}

/// Compute the response to an inbound `sync-hello` (spec §4.7 steps 1-3).
pub async fn handle_sync_hello(
    store: &dyn Store,
    key: Option<&RoomKey>,
    peer_last_message_id: Option<Uuid>,
    peer_known_message_ids: &[Uuid],
    peer_known_channel_ids: &[Uuid],
) -> Option<SyncResponse> {
    let channels = store.channels().await;
    let mut all_messages = Vec::new();
    for channel in &channels {
        all_messages.extend(store.messages_by_channel(channel.id).await);
    }
    all_messages.sort_by_key(|m| m.id);

    let mut missing: Vec<Message> = match peer_last_message_id {
        Some(last_id) => all_messages.into_iter().filter(|m| m.id > last_id).collect(),
        None => all_messages
            .into_iter()
            .filter(|m| !peer_known_message_ids.contains(&m.id))
            .collect(),
    };
    missing.sort_by_key(|m| m.id);
    if missing.len() > MISSING_MESSAGES_CAP {
        let drop_count = missing.len() - MISSING_MESSAGES_CAP;
        missing.drain(0..drop_count);
    }

    let missing_channels: Vec<Channel> = channels
        .into_iter()
        .filter(|c| !peer_known_channel_ids.contains(&c.id))
        .collect();

    let room = store.get_room().await.filter(|r| !r.is_unnamed());

    if missing.is_empty() && missing_channels.is_empty() && room.is_none() {
        return None;
    }

    let messages = missing
        .into_iter()
        .map(|mut message| {
            if let Some(key) = key {
                message.content = aead::encrypt(&message.content, key);
            }
            message
        })
        .collect();

    Some(SyncResponse {
        room,
        channels: missing_channels,
        messages,
    })
}

/// Counts of what changed after merging a `sync-response`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncMergeResult {
    /// Newly learned channels.
    pub new_channels: usize,
    /// Newly persisted messages (duplicates by id are not counted).
    pub new_messages: usize,
}

/// Merge an inbound `sync-response` into local state (spec §4.7 steps
/// 1-3). Idempotent: applying the same response twice yields the same
/// stored state, since messages/channels are upserted by id.
pub async fn apply_sync_response(
    store: &dyn Store,
    key: Option<&RoomKey>,
    response: SyncResponse,
) -> SyncMergeResult {
    let mut result = SyncMergeResult::default();

    if let Some(remote_room) = response.room {
        let should_adopt = match store.get_room().await {
            Some(local_room) => local_room.is_unnamed(),
            None => true,
        };
        if should_adopt {
            store.put_room(remote_room).await;
        }
    }

    for channel in response.channels {
        result.new_channels += 1;
        store.put_channel(channel).await;
    }

    for mut message in response.messages {
        if store.get_message(message.id).await.is_some() {
            continue;
        }
        if let Some(key) = key {
            if let Some(plain) = aead::decrypt(&message.content, key) {
                message.content = plain;
            }
        }
        message.synced = true;
        result.new_messages += 1;
        store.put_message(message).await;
    }

    if result.new_channels > 0 {
        let room_id = store.get_room().await.map(|r| r.id);
        if let Some(room_id) = room_id {
            let mut history = store.get_room_history(&room_id).await.unwrap_or_default();
            if history.last_channel_id.is_none() {
                let channels = store.channels().await;
                history.last_channel_id = channels
                    .iter()
                    .find(|c| c.kind == ChannelKind::Text)
                    .map(|c| c.id);
            }
            store.put_room_history(&room_id, history).await;
        }
    }

    result
}

/// A page of channel history, returned for a `history-request` (spec
/// §4.7 "History pagination").
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    /// Channel being paginated.
    pub channel_id: Uuid,
    /// The requested page, ascending by id, wire-form.
    pub messages: Vec<Message>,
    /// True if older messages remain beyond this page.
    pub has_more: bool,
}

/// Build the response to an inbound `history-request`: the `limit`
/// messages (capped at [`HISTORY_PAGE_CAP`]) immediately preceding
/// `before` in `channel_id`, ascending by id (spec §8 scenario S3).
pub async fn handle_history_request(
    store: &dyn Store,
    key: Option<&RoomKey>,
    channel_id: Uuid,
    before: Option<Uuid>,
    limit: u32,
) -> HistoryPage {
    let limit = limit.min(HISTORY_PAGE_CAP) as usize;
    let mut ascending = store.messages_by_channel(channel_id).await;
    if let Some(before) = before {
        ascending.retain(|m| m.id < before);
    }

    let has_more = ascending.len() > limit;
    let page_start = ascending.len().saturating_sub(limit);
    let page: Vec<Message> = ascending.split_off(page_start);

    let messages = page
        .into_iter()
        .map(|mut message| {
            if let Some(key) = key {
                message.content = aead::encrypt(&message.content, key);
            }
            message
        })
        .collect();

    HistoryPage {
        channel_id,
        messages,
        has_more,
    }
}

/// Tracks outstanding `history-request`s by request id, resolving each
/// to the count of newly persisted messages, or `0` on a 6 s timeout
/// (spec §5, §7).
#[derive(Default)]
pub struct HistoryRequestTracker {
    pending: DashMap<Uuid, oneshot::Sender<usize>>,
}

impl HistoryRequestTracker {
    /// A fresh tracker with no outstanding requests.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new outstanding request, returning its id and a
    /// receiver that resolves once [`Self::resolve`] is called, or with
    /// `0` once [`HISTORY_REQUEST_TIMEOUT`] elapses.
    pub fn register(self: &std::sync::Arc<Self>) -> (Uuid, oneshot::Receiver<usize>) {
        let request_id = Uuid::now_v7();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        let tracker = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(HISTORY_REQUEST_TIMEOUT).await;
            if let Some((_, tx)) = tracker.pending.remove(&request_id) {
                let _ = tx.send(0);
            }
        });

        (request_id, rx)
    }

    /// Resolve an outstanding request with the count of newly persisted
    /// messages from its `history-response`. A no-op if the request
    /// already timed out or was already resolved.
    pub fn resolve(&self, request_id: Uuid, new_message_count: usize) {
        if let Some((_, tx)) = self.pending.remove(&request_id) {
            let _ = tx.send(new_message_count);
        }
    }
}

/// Presence state machine: one join/left state per peer id, transitions
/// emitted as [`SystemAction`]s; duplicate transitions in the same
/// state are suppressed (spec §4.7 "Presence events").
#[derive(Default)]
pub struct PresenceTracker {
    joined: DashMap<PeerId, bool>,
}

impl PresenceTracker {
    /// A fresh tracker with no peers recorded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a presence transition for `peer_id`. Returns `None` if
    /// `username` is empty after trimming, or if this is a duplicate of
    /// the peer's current state.
    pub fn on_presence_event(&self, peer_id: &str, username: &str, joined: bool) -> Option<SystemAction> {
        let username = username.trim();
        if username.is_empty() {
            return None;
        }

        let previous = self.joined.insert(peer_id.to_string(), joined);
        if previous == Some(joined) {
            return None;
        }

        Some(if joined {
            SystemAction::PeerJoined {
                username: username.to_string(),
            }
        } else {
            SystemAction::PeerLeft {
                username: username.to_string(),
            }
        })
    }
}
