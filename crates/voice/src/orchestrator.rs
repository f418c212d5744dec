//! Orchestrator: one task owning the channel, the roster, the sessions and the local media
//!
//! # Architecture
//!
//! ```text
//!  presenter ──Command──▶ ┌──────────────────────────────┐ ──PresenterEvent──▶ presenter
//!                         │         Orchestrator         │
//!  relay ─────frames────▶ │  ControlChannel  Roster      │ ──envelopes──────▶ relay
//!                         │  SessionManager  LocalMedia  │
//!  transports ──events──▶ └──────────────────────────────┘
//!                                ▲          │
//!                                └─ Event ◀─┘ spawned work (open relay, acquire media,
//!                                             build offer/answer)
//! ```
//!
//! Everything that mutates state runs on the orchestrator task, one message at
//! a time. Work that has to wait on the network or a device is spawned and
//! reports back as an [`Event`] tagged with the generation, ticket or session
//! epoch it was started for; results whose tag no longer matches are dropped.

use crate::channel::{
    ChannelState, ControlChannel, ControlMessage, LocalIdentity, RelayConnector, RelayFrame,
    RelayLink,
};
use crate::config::ClientConfig;
use crate::media::{LocalMedia, LocalStream, MediaDevice};
use crate::peer::manager::SessionManager;
use crate::peer::session::{NextNegotiation, OfferAction, PeerSession, Role};
use crate::peer::transport::{
    PeerTransport, TaggedTransportEvent, TransportEvent, TransportEventSink, TransportFactory,
};
use crate::presenter::{Command, ConnectionStatus, PresenterEvent};
use crate::roster::Roster;
use crate::types::{generate_connection_id, IceCandidate, PeerId, RosterEntry, SessionDescription};
use crate::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, trace, warn};

/// Which half of the exchange a spawned negotiation built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiationKind {
    Offer,
    Answer,
}

/// Completion of spawned work
#[derive(Debug)]
enum Event {
    ChannelOpened {
        generation: u64,
        result: Result<RelayLink>,
    },
    MediaAcquired {
        ticket: u64,
        result: Result<LocalStream>,
    },
    Negotiated {
        peer_id: PeerId,
        epoch: u64,
        kind: NegotiationKind,
        result: Result<SessionDescription>,
    },
}

/// Cloneable front door to a running orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl OrchestratorHandle {
    fn submit(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::ChannelClosed("orchestrator has stopped".to_string()))
    }

    pub fn connect(&self, username: impl Into<String>, room_id: impl Into<String>) -> Result<()> {
        self.submit(Command::Connect {
            username: username.into(),
            room_id: room_id.into(),
        })
    }

    pub fn disconnect(&self) -> Result<()> {
        self.submit(Command::Disconnect)
    }

    pub async fn status(&self) -> Result<ConnectionStatus> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::GetStatus { reply })?;
        rx.await
            .map_err(|_| Error::ChannelClosed("orchestrator dropped status request".to_string()))
    }

    pub fn forward_player_state(&self, state: Value) -> Result<()> {
        self.submit(Command::ForwardPlayerState { state })
    }
}

pub struct Orchestrator {
    config: ClientConfig,
    connector: Arc<dyn RelayConnector>,
    factory: Arc<dyn TransportFactory>,
    channel: ControlChannel,
    roster: Roster,
    sessions: SessionManager,
    media: LocalMedia,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<Event>,
    events: mpsc::UnboundedReceiver<Event>,
    transport_tx: mpsc::UnboundedSender<TaggedTransportEvent>,
    transport_events: mpsc::UnboundedReceiver<TaggedTransportEvent>,
    presenter: mpsc::UnboundedSender<PresenterEvent>,
    in_flight: usize,
}

impl Orchestrator {
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn RelayConnector>,
        factory: Arc<dyn TransportFactory>,
        device: Arc<dyn MediaDevice>,
    ) -> (
        Self,
        OrchestratorHandle,
        mpsc::UnboundedReceiver<PresenterEvent>,
    ) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (transport_tx, transport_events) = mpsc::unbounded_channel();
        let (presenter, presenter_rx) = mpsc::unbounded_channel();

        let orchestrator = Self {
            config,
            connector,
            factory,
            channel: ControlChannel::new(),
            roster: Roster::new(),
            sessions: SessionManager::new(),
            media: LocalMedia::new(device),
            commands,
            events_tx,
            events,
            transport_tx,
            transport_events,
            presenter,
            in_flight: 0,
        };

        (
            orchestrator,
            OrchestratorHandle { tx: command_tx },
            presenter_rx,
        )
    }

    /// Event loop; returns once every handle is dropped, after a full teardown
    pub async fn run(mut self) {
        info!("Orchestrator started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.dispatch(command).await,
                    None => break,
                },
                Some(event) = self.events.recv() => self.handle_event(event).await,
                Some(event) = self.transport_events.recv() => self.handle_transport_event(event).await,
                frame = self.channel.next_frame() => self.handle_frame(frame).await,
            }
        }

        self.teardown("orchestrator stopped").await;
        info!("Orchestrator stopped");
    }

    /// Process everything queued, waiting for spawned work until none is left
    pub async fn drain_pending(&mut self) {
        loop {
            let mut progressed = false;

            while let Ok(command) = self.commands.try_recv() {
                self.dispatch(command).await;
                progressed = true;
            }
            while let Some(frame) = self.channel.try_next_frame() {
                self.handle_frame(frame).await;
                progressed = true;
            }
            while let Ok(event) = self.transport_events.try_recv() {
                self.handle_transport_event(event).await;
                progressed = true;
            }
            while let Ok(event) = self.events.try_recv() {
                self.handle_event(event).await;
                progressed = true;
            }

            if progressed {
                continue;
            }
            if self.in_flight == 0 {
                break;
            }
            match self.events.recv().await {
                Some(event) => self.handle_event(event).await,
                None => break,
            }
        }
    }

    pub async fn dispatch(&mut self, command: Command) {
        match command {
            Command::Connect { username, room_id } => self.connect(&username, &room_id),
            Command::Disconnect => self.teardown("disconnect requested").await,
            Command::GetStatus { reply } => {
                let _ = reply.send(self.status());
            }
            Command::ForwardPlayerState { state } => self.forward_player_state(state),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            is_connected: self.channel.is_connected(),
            room_id: self
                .channel
                .identity()
                .map(|id| id.room_id.clone())
                .unwrap_or_default(),
            users: self.roster.display_names(),
        }
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn local_identity(&self) -> Option<&LocalIdentity> {
        self.channel.identity()
    }

    pub fn session_ids(&self) -> Vec<PeerId> {
        self.sessions.peer_ids()
    }

    pub fn session(&self, peer_id: &str) -> Option<&PeerSession> {
        self.sessions.get(peer_id)
    }

    pub fn local_stream(&self) -> Option<&LocalStream> {
        self.media.current()
    }

    fn publish(&self, event: PresenterEvent) {
        if self.presenter.send(event).is_err() {
            trace!("Presenter is gone, dropping notification");
        }
    }

    fn publish_status(&self) {
        self.publish(PresenterEvent::ConnectionStatus(self.status()));
    }

    fn local_peer_id(&self) -> Option<PeerId> {
        self.channel.identity().map(|id| id.peer_id.clone())
    }

    fn room_id(&self) -> String {
        self.channel
            .identity()
            .map(|id| id.room_id.clone())
            .unwrap_or_default()
    }

    fn send(&self, message: ControlMessage) {
        if let Err(e) = self.channel.send(&message) {
            warn!(kind = message.kind(), "Failed to send envelope: {}", e);
        }
    }

    fn connect(&mut self, username: &str, room_id: &str) {
        if self.channel.state() != ChannelState::Disconnected {
            info!("Control channel already connected or connecting");
            return;
        }

        let peer_id = generate_connection_id();
        let generation = match self.channel.begin_connect(username, room_id, peer_id.clone()) {
            Ok(generation) => generation,
            Err(e) => {
                warn!("Cannot connect: {}", e);
                return;
            }
        };
        self.roster.reset(peer_id);
        self.publish_status();

        let connector = Arc::clone(&self.connector);
        let url = self.config.relay_url.clone();
        let events = self.events_tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = connector.open(&url).await;
            let _ = events.send(Event::ChannelOpened { generation, result });
        });
    }

    fn forward_player_state(&self, state: Value) {
        let Some(sender) = self.local_peer_id().filter(|_| self.channel.is_connected()) else {
            debug!("Not connected, dropping local player state");
            return;
        };
        self.send(ControlMessage::PlayerSync {
            sender: Some(sender),
            room_id: self.room_id(),
            command: state,
        });
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::ChannelOpened { generation, result } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.on_channel_opened(generation, result);
            }
            Event::MediaAcquired { ticket, result } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if let Some(stream) = self.media.complete(ticket, result) {
                    self.attach_to_all(&stream).await;
                }
            }
            Event::Negotiated {
                peer_id,
                epoch,
                kind,
                result,
            } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.on_negotiated(peer_id, epoch, kind, result).await;
            }
        }
    }

    fn on_channel_opened(&mut self, generation: u64, result: Result<RelayLink>) {
        match result {
            Ok(link) => {
                if let Err(e) = self.channel.complete_connect(generation, link) {
                    debug!(generation, "Relay link not used: {}", e);
                    return;
                }
                self.publish_status();

                if let Some(pending) = self.media.ensure_started() {
                    let events = self.events_tx.clone();
                    let ticket = pending.ticket;
                    self.in_flight += 1;
                    tokio::spawn(async move {
                        let result = pending.future.await;
                        let _ = events.send(Event::MediaAcquired { ticket, result });
                    });
                }
            }
            Err(e) => {
                if self.channel.fail_connect(generation) {
                    warn!("Failed to reach relay: {}", e);
                    self.roster.clear();
                    self.publish_status();
                } else {
                    debug!(generation, "Superseded relay connection failed: {}", e);
                }
            }
        }
    }

    /// Retroactively add a freshly acquired stream to every session
    async fn attach_to_all(&mut self, stream: &LocalStream) {
        let targets: Vec<(PeerId, Arc<dyn PeerTransport>)> = self
            .sessions
            .iter_mut()
            .filter(|s| !s.has_local_tracks())
            .map(|s| (s.peer_id().to_string(), s.transport()))
            .collect();

        for (peer_id, transport) in targets {
            match transport.add_local_stream(stream).await {
                Ok(()) => {
                    if let Some(session) = self.sessions.get_mut(&peer_id) {
                        session.mark_local_tracks();
                    }
                }
                Err(e) => warn!(peer_id = %peer_id, "Failed to attach local audio: {}", e),
            }
        }
    }

    async fn handle_frame(&mut self, frame: RelayFrame) {
        match frame {
            RelayFrame::Text(text) => {
                if let Some(message) = self.channel.accept_inbound(&text) {
                    self.handle_message(message).await;
                }
            }
            RelayFrame::Closed(reason) => {
                warn!(
                    reason = reason.as_deref().unwrap_or("none"),
                    "Relay connection lost"
                );
                self.teardown("relay connection lost").await;
            }
        }
    }

    async fn handle_message(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::PresenceUpdate { entries, .. } => self.apply_roster(entries).await,
            ControlMessage::PlayerSync { command, .. } => {
                self.publish(PresenterEvent::PlayerCommand { command });
            }
            ControlMessage::SignalOffer {
                sender,
                description,
                ..
            } => self.on_offer(sender, description).await,
            ControlMessage::SignalAnswer {
                sender,
                description,
                ..
            } => self.on_answer(sender, description).await,
            ControlMessage::SignalIce {
                sender, candidate, ..
            } => self.on_remote_candidate(sender, candidate).await,
        }
    }

    async fn apply_roster(&mut self, entries: Vec<RosterEntry>) {
        let live = self.sessions.peer_ids();
        let diff = self.roster.apply_update(entries, live.iter());
        self.publish_status();

        for peer_id in &diff.left {
            info!(peer_id = %peer_id, "Peer left the room");
            self.close_session(peer_id).await;
        }

        // newcomers are offered to; members already present when we arrived offer to us
        let role = if diff.initial {
            Role::Responder
        } else {
            Role::Initiator
        };
        for entry in diff.joined {
            if let Err(e) = self
                .ensure_session(&entry.peer_id, role, Some(entry.display_name))
                .await
            {
                warn!(peer_id = %entry.peer_id, "Failed to create session: {}", e);
            }
        }
    }

    /// Create the session for `peer_id` unless one exists; returns whether it was created
    #[instrument(skip(self, display_name), fields(peer_id = %peer_id, role = ?role))]
    async fn ensure_session(
        &mut self,
        peer_id: &str,
        role: Role,
        display_name: Option<String>,
    ) -> Result<bool> {
        if self.channel.identity().map(|id| id.peer_id.as_str()) == Some(peer_id) {
            debug!("Refusing to open a session with ourselves");
            return Ok(false);
        }

        if let Some(existing) = self.sessions.get_mut(peer_id) {
            if let Some(name) = display_name {
                existing.set_display_name(name);
            }
            return Ok(false);
        }

        let epoch = self.sessions.allocate_epoch();
        let sink = TransportEventSink::new(peer_id.to_string(), epoch, self.transport_tx.clone());
        let transport = self.factory.create(peer_id, sink).await?;
        let mut session = PeerSession::new(
            peer_id.to_string(),
            role,
            epoch,
            Arc::clone(&transport),
            display_name,
        );

        match self.media.attach_to(transport.as_ref()).await {
            Ok(true) => session.mark_local_tracks(),
            Ok(false) => {
                if role == Role::Initiator {
                    // receive-only until local media shows up
                    if let Err(e) = transport.add_audio_receiver().await {
                        warn!("Failed to add audio receiver: {}", e);
                    }
                }
            }
            Err(e) => warn!("Failed to attach local audio: {}", e),
        }

        self.sessions.insert(session)?;
        Ok(true)
    }

    async fn on_offer(&mut self, peer_id: PeerId, offer: SessionDescription) {
        if let Err(e) = self.ensure_session(&peer_id, Role::Responder, None).await {
            warn!(peer_id = %peer_id, "Failed to create session for offer: {}", e);
            return;
        }

        let Some(session) = self.sessions.get_mut(&peer_id) else {
            return;
        };
        match session.begin_answer(offer.clone()) {
            OfferAction::Answer => {
                self.drive_negotiation(&peer_id, NextNegotiation::Answer(offer))
                    .await;
            }
            OfferAction::Hold => {
                debug!(peer_id = %peer_id, "Holding offer until the current negotiation finishes");
            }
            OfferAction::Ignore => {
                info!(peer_id = %peer_id, "Ignoring offer that collided with our own");
            }
            OfferAction::Yield => self.yield_to_remote_offer(&peer_id).await,
        }
    }

    /// Roll back our own offer and answer the peer's held one instead
    async fn yield_to_remote_offer(&mut self, peer_id: &str) {
        let Some(session) = self.sessions.get(peer_id) else {
            return;
        };
        let transport = session.transport();
        info!(peer_id, "Offer collision, rolling back our own offer");
        if let Err(e) = transport.rollback_local_offer().await {
            warn!(peer_id, "Failed to roll back local offer: {}", e);
        }

        let Some(session) = self.sessions.get_mut(peer_id) else {
            return;
        };
        let next = session.yield_offer();
        self.drive_negotiation(peer_id, next).await;
    }

    async fn on_answer(&mut self, peer_id: PeerId, answer: SessionDescription) {
        let session = match self.sessions.require(&peer_id) {
            Ok(session) => session,
            Err(e) => {
                warn!("Dropping answer: {}", e);
                return;
            }
        };
        if !session.expects_answer() {
            warn!(peer_id = %peer_id, "Dropping answer, no offer outstanding");
            return;
        }

        let transport = session.transport();
        let applied = transport.set_remote_description(answer).await;

        let Some(session) = self.sessions.get_mut(&peer_id) else {
            return;
        };
        match applied {
            Ok(()) => {
                let buffered = session.commit_remote();
                let next = session.finish_negotiation();
                self.add_candidates(&peer_id, &transport, buffered).await;
                self.drive_negotiation(&peer_id, next).await;
            }
            Err(e) => {
                warn!(peer_id = %peer_id, "Failed to apply answer: {}", e);
                let next = session.finish_negotiation();
                self.drive_negotiation(&peer_id, next).await;
            }
        }
    }

    async fn on_remote_candidate(&mut self, peer_id: PeerId, candidate: IceCandidate) {
        let session = match self.sessions.require_mut(&peer_id) {
            Ok(session) => session,
            Err(e) => {
                warn!("Dropping ICE candidate: {}", e);
                return;
            }
        };

        match session.accept_candidate(candidate) {
            Some(candidate) => {
                let transport = session.transport();
                self.add_candidates(&peer_id, &transport, vec![candidate])
                    .await;
            }
            None => trace!(peer_id = %peer_id, "Buffered ICE candidate until remote description is set"),
        }
    }

    async fn add_candidates(
        &self,
        peer_id: &str,
        transport: &Arc<dyn PeerTransport>,
        candidates: Vec<IceCandidate>,
    ) {
        for candidate in candidates {
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                warn!(peer_id, "Failed to add ICE candidate: {}", e);
            }
        }
    }

    /// Run negotiation steps for a session until one is left in flight or none remain
    async fn drive_negotiation(&mut self, peer_id: &str, mut next: NextNegotiation) {
        loop {
            match next {
                NextNegotiation::Idle => return,
                NextNegotiation::Offer => {
                    self.spawn_negotiation(peer_id, NegotiationKind::Offer);
                    return;
                }
                NextNegotiation::Answer(offer) => match self.apply_offer(peer_id, offer).await {
                    Some(following) => next = following,
                    None => return,
                },
            }
        }
    }

    /// Set the remote offer and start building the answer
    ///
    /// Returns the next step when the offer could not be applied.
    async fn apply_offer(
        &mut self,
        peer_id: &str,
        offer: SessionDescription,
    ) -> Option<NextNegotiation> {
        let transport = self.sessions.get(peer_id)?.transport();
        let applied = transport.set_remote_description(offer).await;
        let session = self.sessions.get_mut(peer_id)?;

        match applied {
            Ok(()) => {
                let buffered = session.commit_remote();
                self.add_candidates(peer_id, &transport, buffered).await;
                self.spawn_negotiation(peer_id, NegotiationKind::Answer);
                None
            }
            Err(e) => {
                warn!(peer_id, "Failed to apply offer: {}", e);
                Some(session.finish_negotiation())
            }
        }
    }

    fn spawn_negotiation(&mut self, peer_id: &str, kind: NegotiationKind) {
        let Some(session) = self.sessions.get_mut(peer_id) else {
            return;
        };
        session.description_started();
        let transport = session.transport();
        let epoch = session.epoch();
        let peer_id = peer_id.to_string();
        let events = self.events_tx.clone();

        debug!(peer_id = %peer_id, ?kind, "Building local description");
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = async {
                let description = match kind {
                    NegotiationKind::Offer => transport.create_offer().await?,
                    NegotiationKind::Answer => transport.create_answer().await?,
                };
                transport
                    .set_local_description(description.clone())
                    .await?;
                Ok(description)
            }
            .await;

            let _ = events.send(Event::Negotiated {
                peer_id,
                epoch,
                kind,
                result,
            });
        });
    }

    async fn on_negotiated(
        &mut self,
        peer_id: PeerId,
        epoch: u64,
        kind: NegotiationKind,
        result: Result<SessionDescription>,
    ) {
        let Some(sender) = self.local_peer_id() else {
            debug!(peer_id = %peer_id, "Disconnected, dropping negotiation result");
            return;
        };
        let room_id = self.room_id();
        let Some(session) = self.sessions.get_current(&peer_id, epoch) else {
            debug!(peer_id = %peer_id, "Session gone, dropping negotiation result");
            return;
        };

        let next = match (kind, result) {
            (NegotiationKind::Offer, Ok(description)) => {
                if session.offer_superseded() {
                    self.yield_to_remote_offer(&peer_id).await;
                    return;
                }
                if !session.offer_built() {
                    debug!(peer_id = %peer_id, "Dropping stale offer");
                    return;
                }
                let held = session.local_description_sent();
                self.send(ControlMessage::SignalOffer {
                    sender,
                    target: peer_id.clone(),
                    room_id,
                    description,
                });
                info!(peer_id = %peer_id, "Sent offer");
                self.relay_candidates(&peer_id, held);
                return;
            }
            (NegotiationKind::Answer, Ok(description)) => {
                if !session.answer_built() {
                    debug!(peer_id = %peer_id, "Dropping stale answer");
                    return;
                }
                let next = session.finish_negotiation();
                let held = session.local_description_sent();
                self.send(ControlMessage::SignalAnswer {
                    sender,
                    target: peer_id.clone(),
                    room_id,
                    description,
                });
                info!(peer_id = %peer_id, "Sent answer");
                self.relay_candidates(&peer_id, held);
                next
            }
            (kind, Err(e)) => {
                warn!(peer_id = %peer_id, ?kind, "Negotiation failed: {}", e);
                if !session.is_negotiating() {
                    return;
                }
                session.finish_negotiation()
            }
        };

        self.drive_negotiation(&peer_id, next).await;
    }

    async fn handle_transport_event(&mut self, tagged: TaggedTransportEvent) {
        let TaggedTransportEvent {
            peer_id,
            epoch,
            event,
        } = tagged;

        let Some(session) = self.sessions.get_current(&peer_id, epoch) else {
            trace!(peer_id = %peer_id, "Transport event for a closed session");
            return;
        };

        match event {
            TransportEvent::NegotiationNeeded => {
                if session.request_negotiation() {
                    self.drive_negotiation(&peer_id, NextNegotiation::Offer)
                        .await;
                } else {
                    debug!(
                        peer_id = %peer_id,
                        role = ?session.role(),
                        queued = session.queued_requests(),
                        "Negotiation request not started"
                    );
                }
            }
            TransportEvent::LocalCandidate(candidate) => {
                match session.hold_local_candidate(candidate) {
                    Some(candidate) => self.relay_candidates(&peer_id, vec![candidate]),
                    None => trace!(peer_id = %peer_id, "Holding local candidate until our description is sent"),
                }
            }
            TransportEvent::StateChanged(state) => {
                debug!(peer_id = %peer_id, %state, "Transport state");
                if session.observe_transport(state) {
                    info!(peer_id = %peer_id, %state, "Peer connection ended");
                    self.close_session(&peer_id).await;
                }
            }
            TransportEvent::RemoteTrack(stream) => {
                if session.register_remote_stream(&stream.stream_id) {
                    self.publish(PresenterEvent::RemoteStreamAdded { peer_id, stream });
                } else {
                    debug!(peer_id = %peer_id, stream_id = %stream.stream_id, "Remote stream already announced");
                }
            }
        }
    }

    fn relay_candidates(&self, peer_id: &str, candidates: Vec<IceCandidate>) {
        let Some(sender) = self.local_peer_id() else {
            return;
        };
        for candidate in candidates {
            self.send(ControlMessage::SignalIce {
                sender: sender.clone(),
                target: peer_id.to_string(),
                room_id: self.room_id(),
                candidate,
            });
        }
    }

    /// Close and forget one session; a no-op if it is already gone
    async fn close_session(&mut self, peer_id: &str) {
        if let Some(session) = self.sessions.remove(peer_id) {
            self.finalize_session(session).await;
        }
    }

    async fn finalize_session(&self, mut session: PeerSession) {
        if !session.close() {
            return;
        }
        if let Err(e) = session.transport().close().await {
            warn!(peer_id = %session.peer_id(), "Error closing peer connection: {}", e);
        }
        self.publish(PresenterEvent::RemoteStreamClosed {
            peer_id: session.peer_id().to_string(),
        });
    }

    /// Full reset: channel, sessions, media and roster; idempotent
    pub async fn teardown(&mut self, reason: &str) {
        let channel_was_active = self.channel.close();
        let sessions = self.sessions.drain();
        let had_sessions = !sessions.is_empty();
        for session in sessions {
            self.finalize_session(session).await;
        }
        let media_was_held = self.media.stop_all();
        self.roster.clear();

        if channel_was_active || had_sessions || media_was_held {
            info!(reason, "Orchestrator torn down");
            self.publish_status();
        } else {
            debug!(reason, "Teardown with nothing active");
        }
    }
}
