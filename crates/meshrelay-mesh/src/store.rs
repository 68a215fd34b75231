//! Abstract persisted state (spec §6.3): a key/value service with a
//! handful of secondary indexes. The durable store itself is an
//! external collaborator out of this spec's scope; [`Store`] is the
//! seam the sync and key-lifecycle engines are written against, with
//! [`InMemoryStore`] standing in for tests and the demo CLI.

use std::collections::HashMap;

use async_trait::async_trait;
use meshrelay_crypto::RoomKey;
use meshrelay_protocol::{Channel, Message, Room};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Bookkeeping the presentation layer uses to restore "current room /
/// current channel" across restarts. Persisted but never interpreted here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomHistoryEntry {
    /// Channel ids in the order they should be displayed.
    pub order: Vec<Uuid>,
    /// The last channel the user had open, if any.
    pub last_channel_id: Option<Uuid>,
}

/// The abstract persisted-state seam (spec §6.3).
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or overwrite a message, keyed by id.
    async fn put_message(&self, message: Message);
    /// Fetch a message by id.
    async fn get_message(&self, id: Uuid) -> Option<Message>;
    /// All messages for a channel, ascending by id (spec §3 invariant 3).
    async fn messages_by_channel(&self, channel_id: Uuid) -> Vec<Message>;

    /// Insert or overwrite a channel, keyed by id.
    async fn put_channel(&self, channel: Channel);
    /// All known channels, in insertion order.
    async fn channels(&self) -> Vec<Channel>;

    /// Insert or overwrite the room record.
    async fn put_room(&self, room: Room);
    /// Fetch the room record, if any.
    async fn get_room(&self) -> Option<Room>;

    /// Remember a peer's last-known username.
    async fn put_user(&self, user_id: String, username: String);
    /// Fetch a peer's last-known username.
    async fn get_user(&self, user_id: &str) -> Option<String>;

    /// Install or overwrite the room key for `room_id` (spec §3 RoomKey,
    /// §4.9 key lifecycle).
    async fn put_room_key(&self, room_id: &str, key: RoomKey);
    /// Fetch the room key for `room_id`, if authorized.
    async fn get_room_key(&self, room_id: &str) -> Option<RoomKey>;
    /// Remove the room key for `room_id` on leave.
    async fn delete_room_key(&self, room_id: &str);

    /// Persist UI affordance state for a room.
    async fn put_room_history(&self, room_id: &str, entry: RoomHistoryEntry);
    /// Fetch UI affordance state for a room.
    async fn get_room_history(&self, room_id: &str) -> Option<RoomHistoryEntry>;

    /// Store a completed file transfer's bytes under a fresh random id,
    /// indexed by `transfer_id` (spec §6.3 `files` / `by-transfer-id`).
    async fn put_file(&self, file_id: String, transfer_id: Uuid, bytes: Vec<u8>);
    /// Fetch stored file bytes by transfer id.
    async fn get_file_by_transfer_id(&self, transfer_id: Uuid) -> Option<Vec<u8>>;
}

/// An in-memory [`Store`], adequate for tests and the demo CLI.
#[derive(Default)]
pub struct InMemoryStore {
    messages: RwLock<HashMap<Uuid, Message>>,
    channels: RwLock<Vec<Channel>>,
    room: RwLock<Option<Room>>,
    users: RwLock<HashMap<String, String>>,
    room_keys: RwLock<HashMap<String, RoomKey>>,
    room_history: RwLock<HashMap<String, RoomHistoryEntry>>,
    files: RwLock<HashMap<String, (Uuid, Vec<u8>)>>,
}

impl InMemoryStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put_message(&self, message: Message) {
        self.messages.write().await.insert(message.id, message);
    }

    async fn get_message(&self, id: Uuid) -> Option<Message> {
        self.messages.read().await.get(&id).cloned()
    }

    async fn messages_by_channel(&self, channel_id: Uuid) -> Vec<Message> {
        let mut matching: Vec<Message> = self
            .messages
            .read()
            .await
            .values()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect();
        matching.sort_by_key(|m| m.id);
        matching
    }

    async fn put_channel(&self, channel: Channel) {
        let mut channels = self.channels.write().await;
        if let Some(existing) = channels.iter_mut().find(|c| c.id == channel.id) {
            *existing = channel;
        } else {
            channels.push(channel);
        }
    }

    async fn channels(&self) -> Vec<Channel> {
        self.channels.read().await.clone()
    }

    async fn put_room(&self, room: Room) {
        *self.room.write().await = Some(room);
    }

    async fn get_room(&self) -> Option<Room> {
        self.room.read().await.clone()
    }

    async fn put_user(&self, user_id: String, username: String) {
        self.users.write().await.insert(user_id, username);
    }

    async fn get_user(&self, user_id: &str) -> Option<String> {
        self.users.read().await.get(user_id).cloned()
    }

    async fn put_room_key(&self, room_id: &str, key: RoomKey) {
        self.room_keys.write().await.insert(room_id.to_string(), key);
    }

    async fn get_room_key(&self, room_id: &str) -> Option<RoomKey> {
        self.room_keys.read().await.get(room_id).cloned()
    }

    async fn delete_room_key(&self, room_id: &str) {
        self.room_keys.write().await.remove(room_id);
    }

    async fn put_room_history(&self, room_id: &str, entry: RoomHistoryEntry) {
        self.room_history.write().await.insert(room_id.to_string(), entry);
    }

    async fn get_room_history(&self, room_id: &str) -> Option<RoomHistoryEntry> {
        self.room_history.read().await.get(room_id).cloned()
    }

    async fn put_file(&self, file_id: String, transfer_id: Uuid, bytes: Vec<u8>) {
        self.files.write().await.insert(file_id, (transfer_id, bytes));
    }

    async fn get_file_by_transfer_id(&self, transfer_id: Uuid) -> Option<Vec<u8>> {
        self.files
            .read()
            .await
            .values()
            .find(|(id, _)| *id == transfer_id)
            .map(|(_, bytes)| bytes.clone())
    }
}
