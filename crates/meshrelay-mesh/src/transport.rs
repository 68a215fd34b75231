//! The media-transport abstraction consumed by the negotiation state
//! machine (C4) and media track plane (C10).
//!
//! Orchestration logic never talks to a concrete WebRTC implementation
//! directly; it is written against [`MediaTransport`], which is
//! implemented for the real transport by `WebRtcTransport` (see
//! `webrtc_transport.rs`) and by a fake in tests. This keeps the
//! offer/answer/candidate bookkeeping testable without a live ICE
//! stack.

use async_trait::async_trait;
use thiserror::Error;

/// Mirrors the WebRTC signaling state machine closely enough for
/// perfect-negotiation bookkeeping (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    /// No offer/answer exchange in progress.
    Stable,
    /// A local offer has been set, awaiting a remote answer.
    HaveLocalOffer,
    /// A remote offer has been set, awaiting a local answer.
    HaveRemoteOffer,
    /// The transport has been closed.
    Closed,
}

/// Connection-level transport state (spec §4.4, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Freshly created, no negotiation attempted yet.
    New,
    /// ICE/DTLS handshake in progress.
    Connecting,
    /// Fully connected.
    Connected,
    /// Temporarily disconnected; may recover.
    Disconnected,
    /// Unrecoverable failure.
    Failed,
    /// Explicitly closed.
    Closed,
}

impl TransportState {
    /// True for the states that, per spec §4.4, require the mesh to
    /// tear the peer down.
    #[must_use]
    pub fn requires_teardown(self) -> bool {
        matches!(self, Self::Failed | Self::Closed | Self::Disconnected)
    }
}

/// An opaque SDP offer/answer blob, relayed byte-for-byte through the
/// signaling relay's `data` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription(pub String);

/// An opaque ICE candidate blob, relayed the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate(pub String);

/// Kind of a media track, as classified at the transport boundary
/// (spec §4.10). Audio capture, codecs, and voice-activity detection
/// themselves are supplied by the host media stack and out of this
/// spec's scope; only the attach/detach/classify plumbing lives here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// An audio track (voice).
    Audio,
    /// A video track (camera or screen share; see classification rules
    /// in [`crate::media`]).
    Video,
}

/// A track handle from the host media stack, opaque beyond its kind —
/// capture and encoding are out of scope (spec §1 non-goals).
#[derive(Debug, Clone)]
pub struct MediaTrack {
    /// Audio or video.
    pub kind: TrackKind,
    /// Host-assigned track id, forwarded unchanged to the remote peer.
    pub id: String,
}

/// Opaque handle to a track that has been attached to a transport via
/// [`MediaTransport::add_track`], used to detach or replace it later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackSenderId(pub String);

/// Failures from a [`MediaTransport`] operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// `createOffer`/`createAnswer` failed.
    #[error("failed to create local description: {0}")]
    CreateDescription(String),
    /// `setLocalDescription`/`setRemoteDescription` failed.
    #[error("failed to apply description: {0}")]
    SetDescription(String),
    /// `addIceCandidate` failed.
    #[error("failed to add ICE candidate: {0}")]
    AddCandidate(String),
    /// The transport has already been closed.
    #[error("transport is closed")]
    Closed,
    /// `replaceTrack`/`removeTrack` targeted a sender id the transport
    /// doesn't recognize.
    #[error("no such track sender: {0}")]
    TrackNotFound(String),
}

/// One peer's media-transport connection, abstracted over the
/// concrete WebRTC implementation.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Current signaling state.
    fn signaling_state(&self) -> SignalingState;

    /// Current connection state.
    fn transport_state(&self) -> TransportState;

    /// Create a local offer without applying it.
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    /// Create a local answer without applying it.
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    /// Apply a local description (offer or answer).
    async fn set_local_description(&self, description: SessionDescription) -> Result<(), TransportError>;

    /// Apply a remote description (offer or answer).
    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), TransportError>;

    /// Add a remote ICE candidate. Only valid once a remote description
    /// has been applied; callers are responsible for queueing earlier
    /// candidates (spec §4.4).
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Attach a local track, returning a handle to later detach or
    /// replace it (spec §4.10).
    async fn add_track(&self, track: MediaTrack) -> Result<TrackSenderId, TransportError>;

    /// Detach a previously attached track.
    async fn remove_track(&self, sender_id: TrackSenderId) -> Result<(), TransportError>;

    /// Swap the track on an existing sender in place, without a
    /// renegotiation round trip (spec §4.10 screen-share replace-track).
    async fn replace_track(&self, sender_id: &TrackSenderId, track: MediaTrack) -> Result<(), TransportError>;

    /// Tear down the transport.
    async fn close(&self) -> Result<(), TransportError>;

    /// Narrow back to the concrete implementation. The mesh manager
    /// uses this to detect a real [`crate::webrtc_transport::WebRtcTransport`]
    /// right after construction and wire its data-channel/ICE/negotiation
    /// callbacks (spec §4.4, §4.5); fakes used in tests have no such
    /// wiring to do.
    fn as_any(&self) -> &dyn std::any::Any;
}

#[cfg(test)]
pub(crate) mod fake {
    use super::{
        IceCandidate, MediaTrack, MediaTransport, SessionDescription, SignalingState, TrackSenderId,
        TransportError, TransportState,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// A scriptable [`MediaTransport`] double for negotiation and media
    /// plane tests.
    pub struct FakeTransport {
        pub signaling_state: Mutex<SignalingState>,
        pub transport_state: Mutex<TransportState>,
        pub fail_create: bool,
        pub applied_candidates: Mutex<Vec<IceCandidate>>,
        pub senders: Mutex<Vec<(TrackSenderId, MediaTrack)>>,
        next_sender_id: AtomicU64,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self {
                signaling_state: Mutex::new(SignalingState::Stable),
                transport_state: Mutex::new(TransportState::New),
                fail_create: false,
                applied_candidates: Mutex::new(Vec::new()),
                senders: Mutex::new(Vec::new()),
                next_sender_id: AtomicU64::new(0),
            }
        }

        pub fn set_signaling_state(&self, state: SignalingState) {
            *self.signaling_state.lock().unwrap() = state;
        }
    }

    #[async_trait]
    impl MediaTransport for FakeTransport {
        fn signaling_state(&self) -> SignalingState {
            *self.signaling_state.lock().unwrap()
        }

        fn transport_state(&self) -> TransportState {
            *self.transport_state.lock().unwrap()
        }

        async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
            if self.fail_create {
                return Err(TransportError::CreateDescription("forced failure".into()));
            }
            Ok(SessionDescription("offer-sdp".into()))
        }

        async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
            if self.fail_create {
                return Err(TransportError::CreateDescription("forced failure".into()));
            }
            Ok(SessionDescription("answer-sdp".into()))
        }

        async fn set_local_description(&self, description: SessionDescription) -> Result<(), TransportError> {
            *self.signaling_state.lock().unwrap() = if description.0.starts_with("offer") {
                SignalingState::HaveLocalOffer
            } else {
                SignalingState::Stable
            };
            Ok(())
        }

        async fn set_remote_description(&self, description: SessionDescription) -> Result<(), TransportError> {
            *self.signaling_state.lock().unwrap() = if description.0.starts_with("offer") {
                SignalingState::HaveRemoteOffer
            } else {
                SignalingState::Stable
            };
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
            self.applied_candidates.lock().unwrap().push(candidate);
            Ok(())
        }

        async fn add_track(&self, track: MediaTrack) -> Result<TrackSenderId, TransportError> {
            let id = TrackSenderId(format!("sender-{}", self.next_sender_id.fetch_add(1, Ordering::SeqCst)));
            self.senders.lock().unwrap().push((id.clone(), track));
            Ok(id)
        }

        async fn remove_track(&self, sender_id: TrackSenderId) -> Result<(), TransportError> {
            self.senders.lock().unwrap().retain(|(id, _)| *id != sender_id);
            Ok(())
        }

        async fn replace_track(&self, sender_id: &TrackSenderId, track: MediaTrack) -> Result<(), TransportError> {
            let mut senders = self.senders.lock().unwrap();
            match senders.iter_mut().find(|(id, _)| id == sender_id) {
                Some(entry) => {
                    entry.1 = track;
                    Ok(())
                }
                None => Err(TransportError::TrackNotFound(sender_id.0.clone())),
            }
        }

        async fn close(&self) -> Result<(), TransportError> {
            *self.transport_state.lock().unwrap() = TransportState::Closed;
            Ok(())
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn add_then_remove_track_clears_sender() {
            let transport = FakeTransport::new();
            let id = transport
                .add_track(MediaTrack {
                    kind: super::super::TrackKind::Audio,
                    id: "mic".into(),
                })
                .await
                .unwrap();
            assert_eq!(transport.senders.lock().unwrap().len(), 1);
            transport.remove_track(id).await.unwrap();
            assert!(transport.senders.lock().unwrap().is_empty());
        }

        #[tokio::test]
        async fn replace_track_swaps_in_place_without_new_sender() {
            let transport = FakeTransport::new();
            let id = transport
                .add_track(MediaTrack {
                    kind: super::super::TrackKind::Video,
                    id: "screen-1".into(),
                })
                .await
                .unwrap();
            transport
                .replace_track(
                    &id,
                    MediaTrack {
                        kind: super::super::TrackKind::Video,
                        id: "screen-2".into(),
                    },
                )
                .await
                .unwrap();
            let senders = transport.senders.lock().unwrap();
            assert_eq!(senders.len(), 1);
            assert_eq!(senders[0].1.id, "screen-2");
        }

        #[tokio::test]
        async fn replace_unknown_sender_errors() {
            let transport = FakeTransport::new();
            let result = transport
                .replace_track(
                    &TrackSenderId("ghost".into()),
                    MediaTrack {
                        kind: super::super::TrackKind::Video,
                        id: "x".into(),
                    },
                )
                .await;
            assert!(matches!(result, Err(TransportError::TrackNotFound(_))));
        }
    }
}
