//! The `Peer` entity (spec §3): owned by the Mesh Manager, removed on
//! disconnect. Cross-subsystem references use [`PeerId`], never a
//! pointer or `Arc` cycle (spec §9 redesign flag on cyclic references).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::negotiation::Negotiation;
use crate::router::{ControlRouter, ReliableStream};
use crate::transport::MediaTransport;

/// Stable identifier for a peer, as announced by the relay. Backed by
/// the relay's opaque user id string rather than a fresh type, since
/// peer ids originate outside this process.
pub type PeerId = String;

/// The Mesh Manager's sole owner map of connected peers (spec §5, §9:
/// an arena keyed by stable [`PeerId`] rather than pointers or `Arc`
/// cycles between subsystems).
pub type PeerMap = Arc<dashmap::DashMap<PeerId, Arc<Peer>>>;

/// Per-channel subscriber state for screen-share (spec §4.10).
#[derive(Debug, Default)]
pub struct ScreenShareState {
    /// True while this peer is actively sharing its screen.
    pub is_sharing: AtomicBool,
}

/// A connected (or connecting) remote peer.
pub struct Peer {
    /// Stable peer id.
    pub id: PeerId,
    /// Display name, set from the first `user-info` frame.
    pub username: std::sync::RwLock<Option<String>>,
    /// True only once invariant 5 is satisfied: transport connected,
    /// reliable stream open, and `user-info` received.
    connected: AtomicBool,
    /// Perfect-negotiation state for this peer.
    pub negotiation: tokio::sync::Mutex<Negotiation>,
    /// The peer's media transport.
    pub transport: Arc<dyn MediaTransport>,
    /// The peer's reliable control/data stream, once its data channel
    /// has opened (spec §3 invariant 4: at most one per peer id).
    pub reliable_stream: tokio::sync::Mutex<Option<Arc<dyn ReliableStream>>>,
    /// Per-connection control-channel framing state (spec §4.5, §9: the
    /// pending-chunk-meta slot must be owned by this peer alone).
    pub router: tokio::sync::Mutex<ControlRouter>,
    /// True once the transport has reported `Connected` (invariant 5,
    /// condition 1 of 3).
    transport_connected: AtomicBool,
    /// True once the reliable stream has emitted its first `open`
    /// event (invariant 5, condition 2 of 3).
    stream_open: AtomicBool,
    /// True once a `user-info` frame has been received from this peer
    /// (invariant 5, condition 3 of 3).
    user_info_received: AtomicBool,
    /// Voice channel currently joined, if any.
    pub voice_channel_id: std::sync::RwLock<Option<Uuid>>,
    /// Self-muted flag as last reported by this peer.
    pub muted: AtomicBool,
    /// Voice-activity flag as last reported by this peer.
    pub is_speaking: AtomicBool,
    /// Camera-on flag as last reported by this peer.
    pub is_camera_on: AtomicBool,
    /// Screen-share state for this peer as streamer.
    pub screen_share: ScreenShareState,
    /// True once an inbound video track from this peer has already been
    /// classified as camera (spec §4.10 track classification); the next
    /// inbound video track is classified as screen instead.
    pub remote_camera_recorded: AtomicBool,
    /// Local screen-share sender attached to this peer's transport,
    /// present only while this peer is a subscribed viewer.
    pub screen_sender: tokio::sync::Mutex<Option<crate::transport::TrackSenderId>>,
    /// Local audio sender attached to this peer's transport.
    pub audio_sender: tokio::sync::Mutex<Option<crate::transport::TrackSenderId>>,
    /// Local camera sender attached to this peer's transport.
    pub camera_sender: tokio::sync::Mutex<Option<crate::transport::TrackSenderId>>,
}

impl Peer {
    /// Create a fresh peer record. `local_id` is this process's own
    /// peer id, used to compute negotiation politeness.
    #[must_use]
    pub fn new(local_id: &str, id: PeerId, transport: Arc<dyn MediaTransport>) -> Self {
        let negotiation = Negotiation::new(local_id, id.clone());
        let router = ControlRouter::new(id.clone());
        Self {
            id,
            username: std::sync::RwLock::new(None),
            connected: AtomicBool::new(false),
            negotiation: tokio::sync::Mutex::new(negotiation),
            transport,
            reliable_stream: tokio::sync::Mutex::new(None),
            router: tokio::sync::Mutex::new(router),
            transport_connected: AtomicBool::new(false),
            stream_open: AtomicBool::new(false),
            user_info_received: AtomicBool::new(false),
            voice_channel_id: std::sync::RwLock::new(None),
            muted: AtomicBool::new(false),
            is_speaking: AtomicBool::new(false),
            is_camera_on: AtomicBool::new(false),
            screen_share: ScreenShareState::default(),
            remote_camera_recorded: AtomicBool::new(false),
            screen_sender: tokio::sync::Mutex::new(None),
            audio_sender: tokio::sync::Mutex::new(None),
            camera_sender: tokio::sync::Mutex::new(None),
        }
    }

    /// True once invariant 5's three conditions are all satisfied.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Record that the transport reached the `Connected` state,
    /// re-evaluating invariant 5 (spec §3, §4.6).
    pub fn note_transport_connected(&self) {
        self.transport_connected.store(true, Ordering::SeqCst);
        self.recompute_connected();
    }

    /// Record that the reliable stream emitted its first `open` event.
    pub fn note_stream_open(&self) {
        self.stream_open.store(true, Ordering::SeqCst);
        self.recompute_connected();
    }

    /// Record that `user-info` arrived from the remote side, storing
    /// its reported username.
    pub fn note_user_info(&self, username: String) {
        *self.username.write().unwrap() = Some(username);
        self.user_info_received.store(true, Ordering::SeqCst);
        self.recompute_connected();
    }

    /// Force the peer connected directly, bypassing the three-condition
    /// check. Used by tests that don't wire a full transport/stream.
    pub fn mark_connected(&self, username: String) {
        *self.username.write().unwrap() = Some(username);
        self.connected.store(true, Ordering::SeqCst);
    }

    fn recompute_connected(&self) {
        let ready = self.transport_connected.load(Ordering::SeqCst)
            && self.stream_open.load(Ordering::SeqCst)
            && self.user_info_received.load(Ordering::SeqCst);
        if ready {
            self.connected.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;

    #[test]
    fn fresh_peer_is_not_connected() {
        let peer = Peer::new("local", "remote".into(), Arc::new(FakeTransport::new()));
        assert!(!peer.is_connected());
        assert!(peer.username.read().unwrap().is_none());
    }

    #[test]
    fn mark_connected_sets_username_and_flag() {
        let peer = Peer::new("local", "remote".into(), Arc::new(FakeTransport::new()));
        peer.mark_connected("alice".into());
        assert!(peer.is_connected());
        assert_eq!(peer.username.read().unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn connected_requires_all_three_invariant_5_conditions() {
        let peer = Peer::new("local", "remote".into(), Arc::new(FakeTransport::new()));
        peer.note_transport_connected();
        assert!(!peer.is_connected());
        peer.note_stream_open();
        assert!(!peer.is_connected());
        peer.note_user_info("bob".into());
        assert!(peer.is_connected());
        assert_eq!(peer.username.read().unwrap().as_deref(), Some("bob"));
    }

    #[test]
    fn order_of_conditions_does_not_matter() {
        let peer = Peer::new("local", "remote".into(), Arc::new(FakeTransport::new()));
        peer.note_user_info("bob".into());
        peer.note_stream_open();
        assert!(!peer.is_connected());
        peer.note_transport_connected();
        assert!(peer.is_connected());
    }
}
