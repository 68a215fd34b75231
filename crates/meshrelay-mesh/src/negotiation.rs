//! Perfect-negotiation collision handling, one state block per peer id
//! (spec §4.4, §8 invariant 5, scenario S2).

use std::collections::VecDeque;

use crate::transport::{IceCandidate, MediaTransport, SessionDescription, SignalingState, TransportError};

/// Per-peer negotiation state. Never shared across peers (spec §9).
pub struct Negotiation {
    local_id: String,
    remote_id: String,
    polite: bool,
    making_offer: bool,
    ignore_offer: bool,
    remote_description_set: bool,
    pending_candidates: VecDeque<IceCandidate>,
}

impl Negotiation {
    /// Create fresh negotiation state for a peer pair. Politeness is
    /// `local_id < remote_id` lexicographically (spec §4.4).
    #[must_use]
    pub fn new(local_id: impl Into<String>, remote_id: impl Into<String>) -> Self {
        let local_id = local_id.into();
        let remote_id = remote_id.into();
        let polite = local_id < remote_id;
        Self {
            local_id,
            remote_id,
            polite,
            making_offer: false,
            ignore_offer: false,
            remote_description_set: false,
            pending_candidates: VecDeque::new(),
        }
    }

    /// True if this side yields to the remote on an offer collision.
    #[must_use]
    pub fn is_polite(&self) -> bool {
        self.polite
    }

    /// True while a locally initiated offer is outstanding.
    #[must_use]
    pub fn is_making_offer(&self) -> bool {
        self.making_offer
    }

    /// True if the most recent inbound offer from this peer was dropped.
    #[must_use]
    pub fn did_ignore_last_offer(&self) -> bool {
        self.ignore_offer
    }

    /// Number of ICE candidates still queued awaiting a remote description.
    #[must_use]
    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Handle a local "negotiation needed" signal. Returns the offer to
    /// send to the relay, or `None` if an offer is already in flight or
    /// the signaling state isn't stable.
    ///
    /// # Errors
    ///
    /// Returns the transport error if creating or applying the local
    /// offer fails; `making_offer` is reset to `false` so a future
    /// negotiation attempt is not permanently blocked.
    pub async fn on_negotiation_needed(
        &mut self,
        transport: &dyn MediaTransport,
    ) -> Result<Option<SessionDescription>, TransportError> {
        if self.making_offer || transport.signaling_state() != SignalingState::Stable {
            return Ok(None);
        }
        self.making_offer = true;

        let offer = match transport.create_offer().await {
            Ok(offer) => offer,
            Err(error) => {
                self.making_offer = false;
                return Err(error);
            }
        };
        if let Err(error) = transport.set_local_description(offer.clone()).await {
            self.making_offer = false;
            return Err(error);
        }
        Ok(Some(offer))
    }

    /// Handle an inbound offer. Returns the answer to send, or `None`
    /// if the offer was dropped due to a collision on the impolite
    /// side (spec §4.4, scenario S2).
    ///
    /// # Errors
    ///
    /// Returns the transport error if applying the remote description
    /// or creating/applying the answer fails.
    pub async fn on_inbound_offer(
        &mut self,
        transport: &dyn MediaTransport,
        offer: SessionDescription,
    ) -> Result<Option<SessionDescription>, TransportError> {
        let collision = self.making_offer || transport.signaling_state() != SignalingState::Stable;
        if !self.polite && collision {
            self.ignore_offer = true;
            tracing::debug!(remote_id = %self.remote_id, "negotiation: dropping colliding offer (impolite side)");
            return Ok(None);
        }

        self.ignore_offer = false;
        transport.set_remote_description(offer).await?;
        self.remote_description_set = true;
        self.drain_pending_candidates(transport).await;

        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;
        self.making_offer = false;
        Ok(Some(answer))
    }

    /// Handle an inbound answer, settling a locally made offer.
    ///
    /// # Errors
    ///
    /// Returns the transport error if applying the remote description fails.
    pub async fn on_inbound_answer(
        &mut self,
        transport: &dyn MediaTransport,
        answer: SessionDescription,
    ) -> Result<(), TransportError> {
        transport.set_remote_description(answer).await?;
        self.remote_description_set = true;
        self.making_offer = false;
        self.drain_pending_candidates(transport).await;
        Ok(())
    }

    /// Handle an inbound ICE candidate: applied immediately if a remote
    /// description is set, otherwise queued (spec §4.4, boundary case).
    pub async fn on_inbound_candidate(&mut self, transport: &dyn MediaTransport, candidate: IceCandidate) {
        if self.remote_description_set {
            if let Err(error) = transport.add_ice_candidate(candidate).await {
                tracing::warn!(remote_id = %self.remote_id, %error, "negotiation: failed to add ICE candidate");
            }
        } else {
            self.pending_candidates.push_back(candidate);
        }
    }

    async fn drain_pending_candidates(&mut self, transport: &dyn MediaTransport) {
        while let Some(candidate) = self.pending_candidates.pop_front() {
            if let Err(error) = transport.add_ice_candidate(candidate).await {
                tracing::warn!(remote_id = %self.remote_id, %error, "negotiation: failed to add queued ICE candidate");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;

    #[tokio::test]
    async fn polite_rule_follows_lexicographic_id_comparison() {
        let negotiation = Negotiation::new("peer-0", "user-1");
        assert!(negotiation.is_polite());
        let negotiation = Negotiation::new("user-1", "peer-0");
        assert!(!negotiation.is_polite());
    }

    #[tokio::test]
    async fn offer_glare_impolite_drops_inbound_offer() {
        // Scenario S2: A = user-1 (impolite toward peer-0), B = peer-0 (polite).
        let mut a = Negotiation::new("user-1", "peer-0");
        let transport_a = FakeTransport::new();
        let offer = a.on_negotiation_needed(&transport_a).await.unwrap();
        assert!(offer.is_some());
        assert!(a.is_making_offer());

        // B's inbound offer from A collides with A's own outstanding offer,
        // but collision is evaluated against A's own state, not B's — here
        // we model A receiving B's offer while A is impolite and making_offer.
        let result = a.on_inbound_offer(&transport_a, SessionDescription("offer-sdp".into())).await.unwrap();
        assert!(result.is_none());
        assert!(a.did_ignore_last_offer());
    }

    #[tokio::test]
    async fn offer_glare_polite_accepts_inbound_offer() {
        let mut b = Negotiation::new("peer-0", "user-1");
        let transport_b = FakeTransport::new();
        // B also calls on_negotiation_needed for its own offer (simultaneous).
        b.on_negotiation_needed(&transport_b).await.unwrap();
        // But B being polite, an inbound offer from A is still accepted,
        // rolling back its own offer attempt.
        let answer = b.on_inbound_offer(&transport_b, SessionDescription("offer-sdp".into())).await.unwrap();
        assert!(answer.is_some());
        assert!(!b.did_ignore_last_offer());
        assert!(!b.is_making_offer());
    }

    #[tokio::test]
    async fn candidate_before_remote_description_is_queued_then_applied() {
        let mut negotiation = Negotiation::new("peer-0", "user-1");
        let transport = FakeTransport::new();

        negotiation
            .on_inbound_candidate(&transport, IceCandidate("cand-1".into()))
            .await;
        assert_eq!(negotiation.pending_candidate_count(), 1);
        assert!(transport.applied_candidates.lock().unwrap().is_empty());

        negotiation
            .on_inbound_offer(&transport, SessionDescription("offer-sdp".into()))
            .await
            .unwrap();

        assert_eq!(negotiation.pending_candidate_count(), 0);
        assert_eq!(transport.applied_candidates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn negotiation_needed_is_suppressed_while_already_making_offer() {
        let mut negotiation = Negotiation::new("peer-0", "user-1");
        let transport = FakeTransport::new();
        let first = negotiation.on_negotiation_needed(&transport).await.unwrap();
        assert!(first.is_some());
        let second = negotiation.on_negotiation_needed(&transport).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn inbound_answer_clears_making_offer_and_drains_candidates() {
        let mut negotiation = Negotiation::new("peer-0", "user-1");
        let transport = FakeTransport::new();
        negotiation.on_negotiation_needed(&transport).await.unwrap();
        negotiation
            .on_inbound_candidate(&transport, IceCandidate("cand-1".into()))
            .await;

        negotiation
            .on_inbound_answer(&transport, SessionDescription("answer-sdp".into()))
            .await
            .unwrap();

        assert!(!negotiation.is_making_offer());
        assert_eq!(negotiation.pending_candidate_count(), 0);
    }
}
