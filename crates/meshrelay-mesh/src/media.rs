//! Media Track Plane (C10): attach/detach of local audio and camera
//! tracks across the full mesh, the screen-share subscription model,
//! and classification of inbound video tracks (spec §4.10).
//!
//! The mesh is full-mesh P2P, so a local audio or camera track is
//! attached to every connected peer's transport individually; there is
//! no SFU fan-out to reuse. Screen-share is the one track kind that is
//! opt-in per viewer (`screen-watch`), so it gets its own subscriber
//! bookkeeping in [`ScreenSharePlane`] rather than the blanket
//! all-peers treatment used for audio/camera.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use tracing::warn;

use crate::peer::{Peer, PeerId, PeerMap};
use crate::transport::{MediaTrack, TrackKind, TrackSenderId, TransportError};

/// What an inbound video track from a peer should be treated as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackRole {
    /// Voice audio.
    Voice,
    /// The peer's camera.
    Camera,
    /// The peer's screen share.
    Screen,
}

/// Classify an inbound track from `peer` (spec §4.10): a video track is
/// the peer's camera if `is_camera_on` was last reported true and no
/// camera track has been recorded yet for this peer; otherwise it is a
/// screen share. Recording happens as a side effect, so the next video
/// track from the same peer is classified against the updated state.
pub fn classify_incoming_track(peer: &Peer, kind: TrackKind) -> TrackRole {
    match kind {
        TrackKind::Audio => TrackRole::Voice,
        TrackKind::Video => {
            let already_has_camera = peer.remote_camera_recorded.load(Ordering::SeqCst);
            if peer.is_camera_on.load(Ordering::SeqCst) && !already_has_camera {
                peer.remote_camera_recorded.store(true, Ordering::SeqCst);
                TrackRole::Camera
            } else {
                TrackRole::Screen
            }
        }
    }
}

/// Reset a peer's camera-classification bookkeeping, e.g. once its
/// camera track has ended (spec §4.10: the next video track after a
/// camera track ends is classified fresh).
pub fn reset_camera_classification(peer: &Peer) {
    peer.remote_camera_recorded.store(false, Ordering::SeqCst);
}

/// Attach a local audio track to every currently connected peer's
/// transport, recording the resulting sender on each [`Peer`] so it can
/// be removed later. Peers this call can't attach to are logged and
/// skipped rather than failing the whole operation (spec §7: transport
/// errors are non-fatal to the mesh as a whole).
pub async fn add_audio_stream(peers: &PeerMap, track_id: &str) {
    let snapshot: Vec<_> = peers.iter().map(|entry| entry.value().clone()).collect();
    for peer in snapshot {
        let track = MediaTrack {
            kind: TrackKind::Audio,
            id: track_id.to_string(),
        };
        match peer.transport.add_track(track).await {
            Ok(sender_id) => {
                *peer.audio_sender.lock().await = Some(sender_id);
            }
            Err(err) => warn!(peer_id = %peer.id, %err, "failed to attach audio track"),
        }
    }
}

/// Detach the local audio track from every peer that has one attached.
pub async fn remove_audio_stream(peers: &PeerMap) {
    let snapshot: Vec<_> = peers.iter().map(|entry| entry.value().clone()).collect();
    for peer in snapshot {
        let sender_id = peer.audio_sender.lock().await.take();
        if let Some(sender_id) = sender_id {
            if let Err(err) = peer.transport.remove_track(sender_id).await {
                warn!(peer_id = %peer.id, %err, "failed to detach audio track");
            }
        }
    }
}

/// Attach a local camera track to every currently connected peer.
pub async fn add_camera_stream(peers: &PeerMap, track_id: &str) {
    let snapshot: Vec<_> = peers.iter().map(|entry| entry.value().clone()).collect();
    for peer in snapshot {
        let track = MediaTrack {
            kind: TrackKind::Video,
            id: track_id.to_string(),
        };
        match peer.transport.add_track(track).await {
            Ok(sender_id) => {
                *peer.camera_sender.lock().await = Some(sender_id);
            }
            Err(err) => warn!(peer_id = %peer.id, %err, "failed to attach camera track"),
        }
    }
}

/// Detach the local camera track from every peer that has one attached.
pub async fn remove_camera_stream(peers: &PeerMap) {
    let snapshot: Vec<_> = peers.iter().map(|entry| entry.value().clone()).collect();
    for peer in snapshot {
        let sender_id = peer.camera_sender.lock().await.take();
        if let Some(sender_id) = sender_id {
            if let Err(err) = peer.transport.remove_track(sender_id).await {
                warn!(peer_id = %peer.id, %err, "failed to detach camera track");
            }
        }
    }
}

/// Local screen-share state: the set of subscribed viewers and the
/// track currently being shared, if any (spec §4.10). Unlike audio and
/// camera, a screen-share track is only attached to peers that have
/// explicitly sent `screen-watch { watching: true }`.
#[derive(Default)]
pub struct ScreenSharePlane {
    subscribers: Mutex<HashSet<PeerId>>,
    current_track: Mutex<Option<MediaTrack>>,
}

impl ScreenSharePlane {
    /// A fresh plane with no subscribers and nothing shared.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True while `peer_id` is subscribed to the local screen share.
    #[must_use]
    pub fn is_subscriber(&self, peer_id: &str) -> bool {
        self.subscribers.lock().unwrap().contains(peer_id)
    }

    /// Handle an inbound `screen-watch` from `peer`: subscribe or
    /// unsubscribe, attaching or detaching the current screen track if
    /// one is already being shared.
    pub async fn on_screen_watch(&self, peer: &Peer, watching: bool) -> Result<(), TransportError> {
        let track = self.current_track.lock().unwrap().clone();
        if watching {
            self.subscribers.lock().unwrap().insert(peer.id.clone());
            if let Some(track) = track {
                let sender_id = peer.transport.add_track(track).await?;
                *peer.screen_sender.lock().await = Some(sender_id);
            }
        } else {
            self.subscribers.lock().unwrap().remove(&peer.id);
            if let Some(sender_id) = peer.screen_sender.lock().await.take() {
                peer.transport.remove_track(sender_id).await?;
            }
        }
        Ok(())
    }

    /// Start or update the local screen share, attaching `track` to
    /// every current subscriber (or replacing it in place for a
    /// subscriber that's already receiving one, avoiding a
    /// renegotiation round trip).
    pub async fn set_local_screen_stream(&self, peers: &PeerMap, track: MediaTrack) {
        *self.current_track.lock().unwrap() = Some(track.clone());
        let subscribers = self.subscribers.lock().unwrap().clone();
        for peer_id in subscribers {
            let Some(entry) = peers.get(&peer_id) else { continue };
            let peer = entry.value().clone();
            drop(entry);
            let existing = peer.screen_sender.lock().await.clone();
            let result = match existing {
                Some(sender_id) => peer.transport.replace_track(&sender_id, track.clone()).await,
                None => match peer.transport.add_track(track.clone()).await {
                    Ok(sender_id) => {
                        *peer.screen_sender.lock().await = Some(sender_id);
                        Ok(())
                    }
                    Err(err) => Err(err),
                },
            };
            if let Err(err) = result {
                warn!(peer_id = %peer.id, %err, "failed to update screen-share track");
            }
        }
    }

    /// Stop the local screen share, detaching it from every subscriber.
    pub async fn stop_local_screen_stream(&self, peers: &PeerMap) {
        *self.current_track.lock().unwrap() = None;
        let subscribers = self.subscribers.lock().unwrap().clone();
        for peer_id in subscribers {
            let Some(entry) = peers.get(&peer_id) else { continue };
            let peer = entry.value().clone();
            drop(entry);
            if let Some(sender_id) = peer.screen_sender.lock().await.take() {
                if let Err(err) = peer.transport.remove_track(sender_id).await {
                    warn!(peer_id = %peer.id, %err, "failed to stop screen-share track");
                }
            }
        }
    }
}

/// Suppress a peer's reported speaking state while self-muted (spec
/// §4.10: a muted peer never shows as speaking, regardless of VAD).
#[must_use]
pub fn effective_speaking_state(peer: &Peer) -> bool {
    !peer.muted.load(Ordering::SeqCst) && peer.is_speaking.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;
    use dashmap::DashMap;
    use std::sync::Arc;

    fn peer_with(id: &str) -> Arc<Peer> {
        Arc::new(Peer::new("local", id.to_string(), Arc::new(FakeTransport::new())))
    }

    #[test]
    fn first_video_track_with_camera_on_classifies_as_camera() {
        let peer = peer_with("remote");
        peer.is_camera_on.store(true, Ordering::SeqCst);
        assert_eq!(classify_incoming_track(&peer, TrackKind::Video), TrackRole::Camera);
    }

    #[test]
    fn second_video_track_after_camera_classifies_as_screen() {
        let peer = peer_with("remote");
        peer.is_camera_on.store(true, Ordering::SeqCst);
        assert_eq!(classify_incoming_track(&peer, TrackKind::Video), TrackRole::Camera);
        assert_eq!(classify_incoming_track(&peer, TrackKind::Video), TrackRole::Screen);
    }

    #[test]
    fn video_track_without_camera_on_classifies_as_screen() {
        let peer = peer_with("remote");
        assert_eq!(classify_incoming_track(&peer, TrackKind::Video), TrackRole::Screen);
    }

    #[test]
    fn audio_track_always_classifies_as_voice() {
        let peer = peer_with("remote");
        assert_eq!(classify_incoming_track(&peer, TrackKind::Audio), TrackRole::Voice);
    }

    #[test]
    fn reset_allows_camera_to_be_classified_again() {
        let peer = peer_with("remote");
        peer.is_camera_on.store(true, Ordering::SeqCst);
        classify_incoming_track(&peer, TrackKind::Video);
        reset_camera_classification(&peer);
        assert_eq!(classify_incoming_track(&peer, TrackKind::Video), TrackRole::Camera);
    }

    #[tokio::test]
    async fn add_audio_stream_attaches_to_every_peer() {
        let peers: PeerMap = Arc::new(DashMap::new());
        peers.insert("a".into(), peer_with("a"));
        peers.insert("b".into(), peer_with("b"));
        add_audio_stream(&peers, "mic-1").await;
        for entry in peers.iter() {
            assert!(entry.value().audio_sender.lock().await.is_some());
        }
    }

    #[tokio::test]
    async fn remove_audio_stream_clears_every_peer() {
        let peers: PeerMap = Arc::new(DashMap::new());
        peers.insert("a".into(), peer_with("a"));
        add_audio_stream(&peers, "mic-1").await;
        remove_audio_stream(&peers).await;
        let entry = peers.get("a").unwrap();
        assert!(entry.value().audio_sender.lock().await.is_none());
    }

    #[tokio::test]
    async fn screen_watch_false_without_prior_subscription_is_noop() {
        let plane = ScreenSharePlane::new();
        let peer = peer_with("viewer");
        plane.on_screen_watch(&peer, false).await.unwrap();
        assert!(!plane.is_subscriber("viewer"));
    }

    #[tokio::test]
    async fn subscribing_while_sharing_attaches_track_immediately() {
        let peers: PeerMap = Arc::new(DashMap::new());
        let viewer = peer_with("viewer");
        peers.insert("viewer".into(), viewer.clone());
        let plane = ScreenSharePlane::new();
        plane
            .set_local_screen_stream(
                &peers,
                MediaTrack {
                    kind: TrackKind::Video,
                    id: "screen-1".into(),
                },
            )
            .await;
        plane.on_screen_watch(&viewer, true).await.unwrap();
        assert!(viewer.screen_sender.lock().await.is_some());
    }

    #[tokio::test]
    async fn re_sharing_replaces_track_without_new_sender() {
        let peers: PeerMap = Arc::new(DashMap::new());
        let viewer = peer_with("viewer");
        peers.insert("viewer".into(), viewer.clone());
        let plane = ScreenSharePlane::new();
        plane.on_screen_watch(&viewer, true).await.unwrap();
        plane
            .set_local_screen_stream(
                &peers,
                MediaTrack {
                    kind: TrackKind::Video,
                    id: "screen-1".into(),
                },
            )
            .await;
        let first_sender = viewer.screen_sender.lock().await.clone();
        plane
            .set_local_screen_stream(
                &peers,
                MediaTrack {
                    kind: TrackKind::Video,
                    id: "screen-2".into(),
                },
            )
            .await;
        let second_sender = viewer.screen_sender.lock().await.clone();
        assert_eq!(first_sender, second_sender);
    }

    #[tokio::test]
    async fn unsubscribing_detaches_screen_track() {
        let peers: PeerMap = Arc::new(DashMap::new());
        let viewer = peer_with("viewer");
        peers.insert("viewer".into(), viewer.clone());
        let plane = ScreenSharePlane::new();
        plane.on_screen_watch(&viewer, true).await.unwrap();
        plane
            .set_local_screen_stream(
                &peers,
                MediaTrack {
                    kind: TrackKind::Video,
                    id: "screen-1".into(),
                },
            )
            .await;
        plane.on_screen_watch(&viewer, false).await.unwrap();
        assert!(viewer.screen_sender.lock().await.is_none());
        assert!(!plane.is_subscriber("viewer"));
    }

    #[test]
    fn muted_peer_never_reports_speaking() {
        let peer = peer_with("remote");
        peer.muted.store(true, Ordering::SeqCst);
        peer.is_speaking.store(true, Ordering::SeqCst);
        assert!(!effective_speaking_state(&peer));
    }

    #[test]
    fn unmuted_speaking_peer_reports_speaking() {
        let peer = peer_with("remote");
        peer.is_speaking.store(true, Ordering::SeqCst);
        assert!(effective_speaking_state(&peer));
    }
}
