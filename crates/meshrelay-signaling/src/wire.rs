//! Relay WebSocket wire protocol (spec §6.1). Every frame is a JSON
//! object tagged on `type`.

use serde::{Deserialize, Serialize};

/// A peer as listed by `peer-list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer id.
    pub id: String,
    /// Peer display name.
    pub username: String,
}

/// An opaque push subscription payload (endpoint + keys), never parsed
/// by the relay itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// VAPID/web-push key material, opaque to the relay.
    pub keys: serde_json::Value,
}

/// Frames sent from client to relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// Join a room under an id/username, sent immediately on connect.
    Join {
        /// Room code.
        room_id: String,
        /// This peer's id.
        user_id: String,
        /// This peer's display name.
        username: String,
    },
    /// SDP offer, relayed opaque to the relay.
    Offer {
        /// Sender peer id.
        from: String,
        /// Recipient peer id.
        to: String,
        /// Room code.
        room_id: String,
        /// Opaque SDP blob.
        data: String,
    },
    /// SDP answer, relayed opaque to the relay.
    Answer {
        /// Sender peer id.
        from: String,
        /// Recipient peer id.
        to: String,
        /// Room code.
        room_id: String,
        /// Opaque SDP blob.
        data: String,
    },
    /// An ICE candidate, relayed opaque to the relay.
    ConnectionCandidate {
        /// Sender peer id.
        from: String,
        /// Recipient peer id.
        to: String,
        /// Room code.
        room_id: String,
        /// Opaque candidate blob.
        data: String,
    },
    /// Subscribe this peer to web push for `room_id`.
    PushSubscribe {
        /// Room code.
        room_id: String,
        /// Push subscription details.
        subscription: PushSubscription,
    },
    /// Forward an opaque notification payload to push subscribers.
    PushNotify {
        /// Room code.
        room_id: String,
        /// Opaque payload, at most ~4 KiB.
        payload: String,
        /// Endpoint of the sender's own subscription, to exclude self.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_endpoint: Option<String>,
    },
    /// Answer a `sync-poll` on behalf of an offline peer.
    SyncPollResponse {
        /// Correlates to the `sync-poll` request.
        poll_id: String,
        /// Messages found for the polling peer.
        messages: Vec<serde_json::Value>,
    },
}

/// Frames sent from relay to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayFrame {
    /// Current room occupants, excluding the recipient itself.
    PeerList {
        /// Peers currently in the room.
        peers: Vec<PeerInfo>,
    },
    /// A peer joined the room.
    PeerJoined {
        /// Joining peer's id.
        user_id: String,
        /// Joining peer's display name.
        username: String,
    },
    /// A peer left the room.
    PeerLeft {
        /// Leaving peer's id.
        user_id: String,
    },
    /// SDP offer relayed from another peer.
    Offer {
        /// Originating peer id.
        from: String,
        /// Opaque SDP blob.
        data: String,
    },
    /// SDP answer relayed from another peer.
    Answer {
        /// Originating peer id.
        from: String,
        /// Opaque SDP blob.
        data: String,
    },
    /// ICE candidate relayed from another peer.
    ConnectionCandidate {
        /// Originating peer id.
        from: String,
        /// Opaque candidate blob.
        data: String,
    },
    /// The relay asks the client to refresh its push subscription.
    PushRenew,
    /// The relay asks an online peer to answer on behalf of an offline one.
    SyncPoll {
        /// Correlates the eventual `sync-poll-response`.
        poll_id: String,
        /// The offline peer's last known message id, if any.
        last_message_id: Option<String>,
        /// Room code.
        room_id: String,
    },
    /// A relay-side error; never changes client state (spec §4.3).
    Error {
        /// Human-readable error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_frame_uses_kebab_case_tag() {
        let frame = ClientFrame::Join {
            room_id: "AB12CD".into(),
            user_id: "u1".into(),
            username: "alice".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "join");
    }

    #[test]
    fn peer_left_round_trips() {
        let frame = RelayFrame::PeerLeft {
            user_id: "u2".into(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: RelayFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn push_renew_has_no_body_fields() {
        let json = serde_json::to_value(RelayFrame::PushRenew).unwrap();
        assert_eq!(json["type"], "push-renew");
    }

    #[test]
    fn malformed_frame_is_rejected() {
        let raw = r#"{"type":"peer-list","peers":"not-an-array"}"#;
        assert!(serde_json::from_str::<RelayFrame>(raw).is_err());
    }
}
