//! Per-peer negotiation state machine
//!
//! ```text
//!        request_negotiation            begin_answer
//! New ─────────────────────▶ NegotiatingLocal    NegotiatingRemote ◀──── New
//!                                   │                  │
//!                                   └──── transport ───┴──▶ Connected
//!
//!                       any state ──close──▶ Closed (absorbing)
//! ```
//!
//! Only one negotiation runs at a time. Requests arriving meanwhile are
//! counted, and an offer arriving meanwhile is held; both are replayed by
//! [`PeerSession::finish_negotiation`].
//!
//! A Responder may offer too, but only after its first exchange and only for
//! local tracks attached after its last description was started. When both
//! sides offer at once the Initiator ignores the incoming offer and the
//! Responder rolls its own back, answers, then offers again.

use super::transport::{ConnectionState, PeerTransport};
use crate::types::{IceCandidate, PeerId, SessionDescription};
use std::collections::HashSet;
use std::sync::Arc;

/// Which side sends the offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    NegotiatingLocal,
    NegotiatingRemote,
    Connected,
    Closed,
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

/// Step of the negotiation currently in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    BuildingOffer,
    AwaitingAnswer,
    BuildingAnswer,
}

/// How to handle an offer from the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferAction {
    /// Nothing in flight; answer it now
    Answer,
    /// Held until the in-flight negotiation finishes
    Hold,
    /// Collided with our own offer and we keep ours
    Ignore,
    /// Collided with our own sent offer; roll it back, then answer
    Yield,
}

/// What to run after a negotiation finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextNegotiation {
    Offer,
    Answer(SessionDescription),
    Idle,
}

pub struct PeerSession {
    peer_id: PeerId,
    role: Role,
    state: SessionState,
    epoch: u64,
    transport: Arc<dyn PeerTransport>,
    display_name: Option<String>,
    negotiation: Option<Negotiation>,
    queued_requests: u32,
    queued_offer: Option<SessionDescription>,
    remote_committed: bool,
    pending_candidates: Vec<IceCandidate>,
    local_described: bool,
    held_local_candidates: Vec<IceCandidate>,
    transport_connected: bool,
    announced_streams: HashSet<String>,
    has_local_tracks: bool,
    tracks_changed: bool,
}

impl PeerSession {
    pub fn new(
        peer_id: PeerId,
        role: Role,
        epoch: u64,
        transport: Arc<dyn PeerTransport>,
        display_name: Option<String>,
    ) -> Self {
        Self {
            peer_id,
            role,
            state: SessionState::New,
            epoch,
            transport,
            display_name,
            negotiation: None,
            queued_requests: 0,
            queued_offer: None,
            remote_committed: false,
            pending_candidates: Vec::new(),
            local_described: false,
            held_local_candidates: Vec::new(),
            transport_connected: false,
            announced_streams: HashSet::new(),
            has_local_tracks: false,
            tracks_changed: false,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn transport(&self) -> Arc<dyn PeerTransport> {
        Arc::clone(&self.transport)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name = Some(name.into());
    }

    pub fn negotiation(&self) -> Option<Negotiation> {
        self.negotiation
    }

    pub fn is_negotiating(&self) -> bool {
        self.negotiation.is_some()
    }

    pub fn queued_requests(&self) -> u32 {
        self.queued_requests
    }

    pub fn remote_committed(&self) -> bool {
        self.remote_committed
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn has_local_tracks(&self) -> bool {
        self.has_local_tracks
    }

    pub fn mark_local_tracks(&mut self) {
        self.has_local_tracks = true;
        self.tracks_changed = true;
    }

    /// An offer or answer is about to be built from the current tracks
    pub fn description_started(&mut self) {
        self.tracks_changed = false;
    }

    /// Whether negotiation-needed may start an offer from this side
    fn may_offer(&self) -> bool {
        self.role == Role::Initiator || self.remote_committed
    }

    /// Negotiation-needed fired
    ///
    /// Returns true when an offer should be built now. A Responder ignores
    /// requests until its first exchange has committed a remote description,
    /// and requests with no local tracks attached since its last description;
    /// a request during an in-flight negotiation is queued.
    pub fn request_negotiation(&mut self) -> bool {
        if self.state.is_closed() || !self.may_offer() {
            return false;
        }
        if self.role == Role::Responder && !self.tracks_changed {
            return false;
        }
        if self.negotiation.is_some() {
            self.queued_requests += 1;
            return false;
        }
        self.negotiation = Some(Negotiation::BuildingOffer);
        self.state = SessionState::NegotiatingLocal;
        true
    }

    /// Offer received from the peer
    ///
    /// Held offers are replaced by newer ones.
    pub fn begin_answer(&mut self, offer: SessionDescription) -> OfferAction {
        if self.state.is_closed() {
            return OfferAction::Ignore;
        }
        match (self.negotiation, self.role) {
            (None, _) => {
                self.negotiation = Some(Negotiation::BuildingAnswer);
                self.state = SessionState::NegotiatingRemote;
                OfferAction::Answer
            }
            (Some(Negotiation::BuildingAnswer), _) => {
                self.queued_offer = Some(offer);
                OfferAction::Hold
            }
            (Some(_), Role::Initiator) => OfferAction::Ignore,
            (Some(Negotiation::BuildingOffer), Role::Responder) => {
                // settled once the offer being built comes back
                self.queued_offer = Some(offer);
                OfferAction::Hold
            }
            (Some(Negotiation::AwaitingAnswer), Role::Responder) => {
                self.queued_offer = Some(offer);
                OfferAction::Yield
            }
        }
    }

    /// True when the offer being built lost a collision with a held remote offer
    pub fn offer_superseded(&self) -> bool {
        self.role == Role::Responder
            && self.negotiation == Some(Negotiation::BuildingOffer)
            && self.queued_offer.is_some()
    }

    /// Abandon our own offer in favour of the held remote one
    ///
    /// The request behind our offer is queued again, so it is retried once
    /// the answer has gone out.
    pub fn yield_offer(&mut self) -> NextNegotiation {
        if self.state.is_closed() {
            return NextNegotiation::Idle;
        }
        self.queued_requests += 1;
        self.finish_negotiation()
    }

    /// A built offer came back; true if it is still wanted
    pub fn offer_built(&mut self) -> bool {
        if self.negotiation == Some(Negotiation::BuildingOffer)
            && !self.state.is_closed()
            && !self.offer_superseded()
        {
            self.negotiation = Some(Negotiation::AwaitingAnswer);
            true
        } else {
            false
        }
    }

    /// A built answer came back; true if it is still wanted
    pub fn answer_built(&self) -> bool {
        self.negotiation == Some(Negotiation::BuildingAnswer) && !self.state.is_closed()
    }

    /// An answer arrived; true if we are waiting for one
    pub fn expects_answer(&self) -> bool {
        self.negotiation == Some(Negotiation::AwaitingAnswer) && !self.state.is_closed()
    }

    /// End the in-flight negotiation and pick the next one, if any
    pub fn finish_negotiation(&mut self) -> NextNegotiation {
        self.negotiation = None;
        if self.state.is_closed() {
            return NextNegotiation::Idle;
        }

        if let Some(offer) = self.queued_offer.take() {
            self.negotiation = Some(Negotiation::BuildingAnswer);
            self.state = SessionState::NegotiatingRemote;
            return NextNegotiation::Answer(offer);
        }

        if self.queued_requests > 0 && self.may_offer() {
            self.queued_requests -= 1;
            self.negotiation = Some(Negotiation::BuildingOffer);
            self.state = SessionState::NegotiatingLocal;
            return NextNegotiation::Offer;
        }

        if self.transport_connected {
            self.state = SessionState::Connected;
        }
        NextNegotiation::Idle
    }

    /// Remote candidate arrived
    ///
    /// Returns it back when it can be applied now; before the remote
    /// description is committed it is buffered instead.
    pub fn accept_candidate(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.state.is_closed() {
            return None;
        }
        if self.remote_committed {
            Some(candidate)
        } else {
            self.pending_candidates.push(candidate);
            None
        }
    }

    /// Remote description applied; returns the buffered candidates in arrival order
    pub fn commit_remote(&mut self) -> Vec<IceCandidate> {
        if self.state.is_closed() {
            return Vec::new();
        }
        self.remote_committed = true;
        std::mem::take(&mut self.pending_candidates)
    }

    /// Local candidate gathered
    ///
    /// Returns it back when it can be sent now. Until our first offer or
    /// answer has been sent it is held, so the peer never sees a candidate
    /// for a session it does not know about yet.
    pub fn hold_local_candidate(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.state.is_closed() {
            return None;
        }
        if self.local_described {
            Some(candidate)
        } else {
            self.held_local_candidates.push(candidate);
            None
        }
    }

    /// Our offer or answer was sent; returns the held local candidates in gathering order
    pub fn local_description_sent(&mut self) -> Vec<IceCandidate> {
        if self.state.is_closed() {
            return Vec::new();
        }
        self.local_described = true;
        std::mem::take(&mut self.held_local_candidates)
    }

    pub fn held_local_candidates(&self) -> usize {
        self.held_local_candidates.len()
    }

    /// Transport state changed; returns true if the session must be torn down
    pub fn observe_transport(&mut self, state: ConnectionState) -> bool {
        if self.state.is_closed() {
            return false;
        }
        if state.is_terminal() {
            return true;
        }
        if state == ConnectionState::Connected {
            self.transport_connected = true;
            if self.negotiation.is_none() {
                self.state = SessionState::Connected;
            }
        }
        false
    }

    /// True the first time a given remote stream is seen
    pub fn register_remote_stream(&mut self, stream_id: &str) -> bool {
        !self.state.is_closed() && self.announced_streams.insert(stream_id.to_string())
    }

    /// Move to `Closed`; true exactly once
    pub fn close(&mut self) -> bool {
        if self.state.is_closed() {
            return false;
        }
        self.state = SessionState::Closed;
        self.negotiation = None;
        self.queued_requests = 0;
        self.queued_offer = None;
        self.pending_candidates.clear();
        self.held_local_candidates.clear();
        true
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("peer_id", &self.peer_id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("epoch", &self.epoch)
            .field("negotiation", &self.negotiation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::LocalStream;
    use crate::Result;
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl PeerTransport for NullTransport {
        async fn add_local_stream(&self, _stream: &LocalStream) -> Result<()> {
            Ok(())
        }
        async fn add_audio_receiver(&self) -> Result<()> {
            Ok(())
        }
        async fn create_offer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription::offer("v=0"))
        }
        async fn create_answer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription::answer("v=0"))
        }
        async fn set_local_description(&self, _description: SessionDescription) -> Result<()> {
            Ok(())
        }
        async fn set_remote_description(&self, _description: SessionDescription) -> Result<()> {
            Ok(())
        }
        async fn rollback_local_offer(&self) -> Result<()> {
            Ok(())
        }
        async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn session(role: Role) -> PeerSession {
        PeerSession::new("conn-b".to_string(), role, 1, Arc::new(NullTransport), None)
    }

    #[test]
    fn test_initiator_offer_cycle() {
        let mut s = session(Role::Initiator);
        assert_eq!(s.state(), SessionState::New);

        assert!(s.request_negotiation());
        assert_eq!(s.state(), SessionState::NegotiatingLocal);
        assert!(s.offer_built());
        assert!(s.expects_answer());

        s.commit_remote();
        assert_eq!(s.finish_negotiation(), NextNegotiation::Idle);
        assert!(!s.is_negotiating());
    }

    #[test]
    fn test_overlapping_requests_are_serialized() {
        let mut s = session(Role::Initiator);
        assert!(s.request_negotiation());
        assert!(!s.request_negotiation());
        assert!(!s.request_negotiation());
        assert_eq!(s.queued_requests(), 2);

        assert!(s.offer_built());
        assert_eq!(s.finish_negotiation(), NextNegotiation::Offer);
        assert_eq!(s.negotiation(), Some(Negotiation::BuildingOffer));
        assert!(s.offer_built());
        assert_eq!(s.finish_negotiation(), NextNegotiation::Offer);
        assert!(s.offer_built());
        assert_eq!(s.finish_negotiation(), NextNegotiation::Idle);
    }

    #[test]
    fn test_responder_waits_for_first_exchange() {
        let mut s = session(Role::Responder);
        assert!(!s.request_negotiation());
        assert_eq!(s.queued_requests(), 0);

        assert_eq!(
            s.begin_answer(SessionDescription::offer("v=0")),
            OfferAction::Answer
        );
        assert_eq!(s.state(), SessionState::NegotiatingRemote);
        assert!(!s.offer_built());
        s.commit_remote();
        s.description_started();
        assert!(s.answer_built());
        assert_eq!(s.finish_negotiation(), NextNegotiation::Idle);
        assert!(!s.request_negotiation());

        // late local tracks
        s.mark_local_tracks();
        assert!(s.request_negotiation());
        assert_eq!(s.state(), SessionState::NegotiatingLocal);
        assert!(s.offer_built());
        assert!(s.expects_answer());
    }

    #[test]
    fn test_responder_request_during_answer_is_replayed() {
        let mut s = session(Role::Responder);
        assert_eq!(
            s.begin_answer(SessionDescription::offer("v=0")),
            OfferAction::Answer
        );
        s.commit_remote();
        s.description_started();
        s.mark_local_tracks();
        assert!(!s.request_negotiation());
        assert_eq!(s.queued_requests(), 1);

        assert!(s.answer_built());
        assert_eq!(s.finish_negotiation(), NextNegotiation::Offer);
        assert_eq!(s.negotiation(), Some(Negotiation::BuildingOffer));
    }

    #[test]
    fn test_offer_during_answer_is_held() {
        let mut s = session(Role::Initiator);
        assert_eq!(
            s.begin_answer(SessionDescription::offer("first")),
            OfferAction::Answer
        );
        assert_eq!(
            s.begin_answer(SessionDescription::offer("second")),
            OfferAction::Hold
        );
        assert_eq!(
            s.begin_answer(SessionDescription::offer("third")),
            OfferAction::Hold
        );

        assert_eq!(
            s.finish_negotiation(),
            NextNegotiation::Answer(SessionDescription::offer("third"))
        );
        assert_eq!(s.state(), SessionState::NegotiatingRemote);
    }

    #[test]
    fn test_initiator_keeps_its_offer_on_collision() {
        let mut s = session(Role::Initiator);
        assert!(s.request_negotiation());
        assert_eq!(
            s.begin_answer(SessionDescription::offer("crossing")),
            OfferAction::Ignore
        );
        assert!(s.offer_built());
        assert_eq!(
            s.begin_answer(SessionDescription::offer("crossing")),
            OfferAction::Ignore
        );
        assert!(s.expects_answer());
        s.commit_remote();
        assert_eq!(s.finish_negotiation(), NextNegotiation::Idle);
    }

    #[test]
    fn test_responder_ignores_request_for_answered_tracks() {
        let mut s = session(Role::Responder);
        s.mark_local_tracks();
        assert_eq!(
            s.begin_answer(SessionDescription::offer("v=0")),
            OfferAction::Answer
        );
        s.commit_remote();
        s.description_started();

        // raised by the attach above, handled after the answer started
        assert!(!s.request_negotiation());
        assert_eq!(s.queued_requests(), 0);
        assert!(s.answer_built());
        assert_eq!(s.finish_negotiation(), NextNegotiation::Idle);
    }

    fn committed_responder() -> PeerSession {
        let mut s = session(Role::Responder);
        s.begin_answer(SessionDescription::offer("first"));
        s.commit_remote();
        s.description_started();
        s.finish_negotiation();
        s.mark_local_tracks();
        s
    }

    #[test]
    fn test_responder_yields_sent_offer_on_collision() {
        let mut s = committed_responder();
        assert!(s.request_negotiation());
        assert!(s.offer_built());

        assert_eq!(
            s.begin_answer(SessionDescription::offer("crossing")),
            OfferAction::Yield
        );
        assert_eq!(
            s.yield_offer(),
            NextNegotiation::Answer(SessionDescription::offer("crossing"))
        );
        assert!(!s.expects_answer());
        assert!(s.answer_built());
        assert_eq!(s.finish_negotiation(), NextNegotiation::Offer);
    }

    #[test]
    fn test_responder_drops_offer_being_built_on_collision() {
        let mut s = committed_responder();
        assert!(s.request_negotiation());
        assert_eq!(
            s.begin_answer(SessionDescription::offer("crossing")),
            OfferAction::Hold
        );
        assert!(s.offer_superseded());
        assert!(!s.offer_built());

        assert_eq!(
            s.yield_offer(),
            NextNegotiation::Answer(SessionDescription::offer("crossing"))
        );
        assert!(!s.offer_superseded());
        assert_eq!(s.queued_requests(), 1);
    }

    #[test]
    fn test_local_candidates_held_until_description_sent() {
        let mut s = session(Role::Initiator);
        assert!(s.hold_local_candidate(IceCandidate::new("l1")).is_none());
        assert!(s.hold_local_candidate(IceCandidate::new("l2")).is_none());
        assert_eq!(s.held_local_candidates(), 2);

        assert_eq!(
            s.local_description_sent(),
            vec![IceCandidate::new("l1"), IceCandidate::new("l2")]
        );
        assert_eq!(
            s.hold_local_candidate(IceCandidate::new("l3")),
            Some(IceCandidate::new("l3"))
        );
        assert!(s.local_description_sent().is_empty());
    }

    #[test]
    fn test_candidates_buffer_until_remote_committed() {
        let mut s = session(Role::Responder);
        assert!(s.accept_candidate(IceCandidate::new("c1")).is_none());
        assert!(s.accept_candidate(IceCandidate::new("c2")).is_none());
        assert_eq!(s.pending_candidates(), 2);

        let flushed = s.commit_remote();
        assert_eq!(flushed, vec![IceCandidate::new("c1"), IceCandidate::new("c2")]);
        assert_eq!(
            s.accept_candidate(IceCandidate::new("c3")),
            Some(IceCandidate::new("c3"))
        );
    }

    #[test]
    fn test_transport_states() {
        let mut s = session(Role::Initiator);
        assert!(s.request_negotiation());
        assert!(!s.observe_transport(ConnectionState::Connected));
        // still negotiating
        assert_eq!(s.state(), SessionState::NegotiatingLocal);
        assert!(s.offer_built());
        s.finish_negotiation();
        assert_eq!(s.state(), SessionState::Connected);

        assert!(s.observe_transport(ConnectionState::Failed));
    }

    #[test]
    fn test_remote_stream_announced_once() {
        let mut s = session(Role::Responder);
        assert!(s.register_remote_stream("stream-1"));
        assert!(!s.register_remote_stream("stream-1"));
        assert!(s.register_remote_stream("stream-2"));
    }

    #[test]
    fn test_close_is_absorbing() {
        let mut s = session(Role::Initiator);
        assert!(s.request_negotiation());
        s.accept_candidate(IceCandidate::new("c1"));

        assert!(s.close());
        assert!(!s.close());
        assert_eq!(s.state(), SessionState::Closed);
        assert!(!s.offer_built());
        assert!(!s.request_negotiation());
        assert_eq!(
            s.begin_answer(SessionDescription::offer("v=0")),
            OfferAction::Ignore
        );
        assert!(s.accept_candidate(IceCandidate::new("c2")).is_none());
        assert!(s.hold_local_candidate(IceCandidate::new("l1")).is_none());
        assert_eq!(s.yield_offer(), NextNegotiation::Idle);
        assert!(s.commit_remote().is_empty());
        assert!(!s.observe_transport(ConnectionState::Closed));
        assert!(!s.register_remote_stream("late"));
        assert_eq!(s.finish_negotiation(), NextNegotiation::Idle);
    }
}
