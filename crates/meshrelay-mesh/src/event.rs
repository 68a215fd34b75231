//! The mesh's unified event type.
//!
//! The original source models ~25 optional callbacks (`on_peer_joined`,
//! `on_offer`, `on_data_channel_ready`, ...) set via a `setCallbacks`
//! call. That shape doesn't translate: optional-function bookkeeping
//! and partial registration are error-prone and not exhaustive. Instead
//! every signal the mesh reacts to — relay events, transport state
//! changes, decoded control messages, reassembled chunks — is a
//! variant of [`MeshEvent`], consumed by the Mesh Manager in one
//! exhaustive `match` (spec §9).

use uuid::Uuid;

use meshrelay_protocol::{ControlMessage, FileChunk};

use crate::peer::PeerId;
use crate::transport::{IceCandidate, SessionDescription, TransportState};

/// Something the Mesh Manager must react to.
#[derive(Debug)]
pub enum MeshEvent {
    /// The relay reported the current room occupants.
    PeerList(Vec<(PeerId, String)>),
    /// A peer joined the room.
    PeerJoined { peer_id: PeerId, username: String },
    /// A peer left the room.
    PeerLeft { peer_id: PeerId },
    /// An SDP offer arrived from a peer.
    OfferReceived { from: PeerId, sdp: SessionDescription },
    /// An SDP answer arrived from a peer.
    AnswerReceived { from: PeerId, sdp: SessionDescription },
    /// An ICE candidate arrived from a peer.
    CandidateReceived { from: PeerId, candidate: IceCandidate },
    /// The relay asked for a fresh push subscription.
    PushRenewRequested,
    /// The relay asked this peer to answer a sync poll on behalf of an
    /// offline peer.
    SyncPollRequested {
        poll_id: String,
        last_message_id: Option<Uuid>,
        room_id: String,
    },
    /// A peer's transport changed state.
    TransportStateChanged { peer_id: PeerId, state: TransportState },
    /// A peer's reliable stream has been open for ≈300ms with no
    /// interruption (spec §4.5); sync may now begin.
    DataChannelReady { peer_id: PeerId },
    /// A decoded control message arrived from a peer's reliable stream.
    ControlMessageReceived { peer_id: PeerId, message: ControlMessage },
    /// A reassembled file chunk arrived from a peer's reliable stream.
    ChunkReceived { peer_id: PeerId, chunk: FileChunk },
}
