//! Orchestrator Test Harness
//!
//! Drives a real [`Orchestrator`] against in-memory stand-ins:
//! - `MemoryConnector`: relay links backed by channels, one per connect
//! - `FakeDevice`: hands out capture streams or refuses to
//! - `FakeTransportFactory`: transports that record every call
//! - `RunningClient`: an orchestrator spawned on its own `run()` loop
//!
//! Basic usage pattern:
//!
//! 1. Build a `TestClient` and call `connect`
//! 2. Push envelopes into `client.relay()` and call `client.settle()`
//! 3. Inspect what the client sent, its sessions and the presenter events

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use watchparty_voice::channel::{ControlMessage, RelayConnector, RelayFrame, RelayLink};
use watchparty_voice::media::{LocalStream, MediaDevice};
use watchparty_voice::peer::{PeerTransport, TransportEvent, TransportEventSink, TransportFactory};
use watchparty_voice::{
    ClientConfig, Error, IceCandidate, Orchestrator, OrchestratorHandle, PresenterEvent, Result,
    SessionDescription,
};

/// Initialize test logging
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,watchparty_voice=debug")
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Relay
// ============================================================================

/// The relay side of one link
pub struct RelayEnd {
    sent: mpsc::UnboundedReceiver<String>,
    frames: mpsc::UnboundedSender<RelayFrame>,
}

impl RelayEnd {
    /// Deliver a raw text frame to the client
    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.frames.send(RelayFrame::Text(text.into()));
    }

    pub fn push(&self, envelope: Value) {
        self.push_raw(envelope.to_string());
    }

    /// Simulate the relay dropping the connection
    pub fn close(&self, reason: &str) {
        let _ = self.frames.send(RelayFrame::Closed(Some(reason.to_string())));
    }

    /// Every frame the client sent since the last call
    pub fn take_sent(&mut self) -> Vec<String> {
        let mut sent = Vec::new();
        while let Ok(text) = self.sent.try_recv() {
            sent.push(text);
        }
        sent
    }

    /// Decoded envelopes the client sent since the last call; the handshake is skipped
    pub fn take_messages(&mut self) -> Vec<ControlMessage> {
        self.take_sent()
            .iter()
            .filter_map(|text| ControlMessage::decode(text).ok())
            .collect()
    }
}

#[derive(Default)]
pub struct MemoryConnector {
    fail: Mutex<bool>,
    opened: Mutex<Vec<RelayEnd>>,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Take the relay end of the most recent link
    pub fn take_relay(&self) -> Option<RelayEnd> {
        self.opened.lock().unwrap().pop()
    }
}

#[async_trait]
impl RelayConnector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<RelayLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if *self.fail.lock().unwrap() {
            return Err(Error::WebSocketError(format!("cannot reach {}", url)));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.opened.lock().unwrap().push(RelayEnd {
            sent: out_rx,
            frames: in_tx,
        });
        Ok(RelayLink::new(out_tx, in_rx))
    }
}

// ============================================================================
// Capture device
// ============================================================================

#[derive(Default)]
pub struct FakeDevice {
    fail: bool,
    gate: Option<Arc<Notify>>,
    issued: Mutex<Vec<LocalStream>>,
}

impl FakeDevice {
    pub fn working() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// A device whose acquisition completes only once `gate` is notified
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Streams handed out so far
    pub fn issued(&self) -> Vec<LocalStream> {
        self.issued.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevice for FakeDevice {
    async fn acquire(&self) -> Result<LocalStream> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(Error::MediaUnavailable("permission denied".to_string()));
        }
        let mut issued = self.issued.lock().unwrap();
        let stream = LocalStream::new(format!("local-{}", issued.len()), Vec::new());
        issued.push(stream.clone());
        Ok(stream)
    }
}

// ============================================================================
// Transports
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddLocalStream(String),
    AddAudioReceiver,
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    RollbackLocalOffer,
    AddIce(IceCandidate),
    Close,
}

pub struct FakeTransport {
    peer_id: String,
    sink: TransportEventSink,
    calls: Mutex<Vec<Call>>,
    descriptions: AtomicUsize,
    gathers: bool,
}

impl FakeTransport {
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn epoch(&self) -> u64 {
        self.sink.epoch()
    }

    /// Pretend the peer connection noticed something
    pub fn emit(&self, event: TransportEvent) {
        self.sink.emit(event);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::AddIce(candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SetRemote(description) => Some(description),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.calls().contains(&Call::Close)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_sdp(&self, kind: &str) -> String {
        let n = self.descriptions.fetch_add(1, Ordering::SeqCst);
        format!("v=0 {} {} #{}", kind, self.peer_id, n)
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn add_local_stream(&self, stream: &LocalStream) -> Result<()> {
        self.record(Call::AddLocalStream(stream.id().to_string()));
        self.sink.emit(TransportEvent::NegotiationNeeded);
        Ok(())
    }

    async fn add_audio_receiver(&self) -> Result<()> {
        self.record(Call::AddAudioReceiver);
        self.sink.emit(TransportEvent::NegotiationNeeded);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(Call::CreateOffer);
        Ok(SessionDescription::offer(self.next_sdp("offer")))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(Call::CreateAnswer);
        Ok(SessionDescription::answer(self.next_sdp("answer")))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.record(Call::SetLocal(description));
        if self.gathers {
            // a real agent starts gathering as soon as the local description is set
            let n = self.descriptions.load(Ordering::SeqCst);
            self.sink.emit(TransportEvent::LocalCandidate(IceCandidate::new(format!(
                "candidate:{} {} 1 udp 2122260223 10.0.0.1 50000 typ host",
                self.peer_id, n
            ))));
        }
        Ok(())
    }

    async fn rollback_local_offer(&self) -> Result<()> {
        self.record(Call::RollbackLocalOffer);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.record(Call::SetRemote(description));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(Call::AddIce(candidate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(Call::Close);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTransportFactory {
    created: Mutex<Vec<Arc<FakeTransport>>>,
    gathers: bool,
}

impl FakeTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transports that emit a local candidate whenever a local description is set
    pub fn gathering() -> Self {
        Self {
            gathers: true,
            ..Self::default()
        }
    }

    /// Every transport built so far, oldest first
    pub fn created(&self) -> Vec<Arc<FakeTransport>> {
        self.created.lock().unwrap().clone()
    }

    /// Most recent transport built for `peer_id`
    pub fn latest(&self, peer_id: &str) -> Option<Arc<FakeTransport>> {
        self.created()
            .into_iter()
            .rev()
            .find(|transport| transport.peer_id == peer_id)
    }

    pub fn count_for(&self, peer_id: &str) -> usize {
        self.created()
            .iter()
            .filter(|transport| transport.peer_id == peer_id)
            .count()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        peer_id: &str,
        sink: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport = Arc::new(FakeTransport {
            peer_id: peer_id.to_string(),
            sink,
            calls: Mutex::new(Vec::new()),
            descriptions: AtomicUsize::new(0),
            gathers: self.gathers,
        });
        self.created.lock().unwrap().push(Arc::clone(&transport));
        Ok(transport)
    }
}

// ============================================================================
// Client
// ============================================================================

pub const ROOM: &str = "movie-night";

/// An orchestrator wired to in-memory collaborators
pub struct TestClient {
    pub orchestrator: Orchestrator,
    pub handle: OrchestratorHandle,
    pub events: mpsc::UnboundedReceiver<PresenterEvent>,
    pub connector: Arc<MemoryConnector>,
    pub factory: Arc<FakeTransportFactory>,
    pub device: Arc<FakeDevice>,
    relay: Option<RelayEnd>,
}

impl TestClient {
    pub fn new() -> Self {
        Self::with_device(FakeDevice::working())
    }

    pub fn with_device(device: FakeDevice) -> Self {
        init_logging();
        let connector = Arc::new(MemoryConnector::new());
        let factory = Arc::new(FakeTransportFactory::new());
        let device = Arc::new(device);

        let (orchestrator, handle, events) = Orchestrator::new(
            ClientConfig::default(),
            connector.clone(),
            factory.clone(),
            device.clone(),
        );

        Self {
            orchestrator,
            handle,
            events,
            connector,
            factory,
            device,
            relay: None,
        }
    }

    /// Connect as `username` and wait until the link is up
    pub async fn connect(&mut self, username: &str) -> String {
        self.handle.connect(username, ROOM).unwrap();
        self.settle().await;
        self.relay = self.connector.take_relay();
        assert!(self.relay.is_some(), "relay link was not opened");
        self.self_id()
    }

    /// Process everything queued, including spawned work
    pub async fn settle(&mut self) {
        self.orchestrator.drain_pending().await;
    }

    pub fn self_id(&self) -> String {
        self.orchestrator
            .local_identity()
            .map(|id| id.peer_id.clone())
            .unwrap_or_default()
    }

    pub fn relay(&mut self) -> &mut RelayEnd {
        self.relay.as_mut().expect("not connected")
    }

    /// Deliver a roster snapshot and settle
    pub async fn roster(&mut self, members: &[(&str, &str)]) {
        self.relay().push(user_list(members));
        self.settle().await;
    }

    /// Deliver a signaling envelope from `sender` to us and settle
    pub async fn signal(&mut self, kind: &str, sender: &str, payload: Value) {
        let target = self.self_id();
        self.relay().push(json!({
            "Type": kind,
            "Payload": payload,
            "Sender": sender,
            "Target": target,
            "RoomId": ROOM,
        }));
        self.settle().await;
    }

    pub fn transport(&self, peer_id: &str) -> Arc<FakeTransport> {
        self.factory
            .latest(peer_id)
            .unwrap_or_else(|| panic!("no transport for {}", peer_id))
    }

    /// Presenter events published since the last call
    pub fn take_events(&mut self) -> Vec<PresenterEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Offers we sent since the last call, as (target, sdp)
    pub fn sent_offers(&mut self) -> Vec<(String, String)> {
        self.relay()
            .take_messages()
            .into_iter()
            .filter_map(|message| match message {
                ControlMessage::SignalOffer {
                    target,
                    description,
                    ..
                } => Some((target, description.sdp)),
                _ => None,
            })
            .collect()
    }
}

pub fn user_list(members: &[(&str, &str)]) -> Value {
    let users: Vec<Value> = members
        .iter()
        .map(|(id, name)| json!({"connectionId": id, "username": name}))
        .collect();
    json!({
        "Type": "user_list_update",
        "Payload": {"Users": users},
        "RoomId": ROOM,
    })
}

pub fn offer_payload(sdp: &str) -> Value {
    json!({"type": "offer", "sdp": sdp})
}

pub fn answer_payload(sdp: &str) -> Value {
    json!({"type": "answer", "sdp": sdp})
}

pub fn candidate_payload(candidate: &str) -> Value {
    json!({"candidate": candidate, "sdpMid": "0", "sdpMLineIndex": 0})
}

// ============================================================================
// Running client
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

/// An orchestrator spawned on its own `run()` loop, observed only through the relay
pub struct RunningClient {
    pub handle: OrchestratorHandle,
    pub events: mpsc::UnboundedReceiver<PresenterEvent>,
    pub factory: Arc<FakeTransportFactory>,
    connector: Arc<MemoryConnector>,
    relay: Option<RelayEnd>,
    self_id: String,
}

impl RunningClient {
    pub fn start(device: FakeDevice, factory: FakeTransportFactory) -> Self {
        init_logging();
        let connector = Arc::new(MemoryConnector::new());
        let factory = Arc::new(factory);

        let (orchestrator, handle, events) = Orchestrator::new(
            ClientConfig::default(),
            connector.clone(),
            factory.clone(),
            Arc::new(device),
        );
        tokio::spawn(orchestrator.run());

        Self {
            handle,
            events,
            factory,
            connector,
            relay: None,
            self_id: String::new(),
        }
    }

    /// Connect as `username`; returns our connection id once the handshake arrives
    pub async fn connect(&mut self, username: &str) -> String {
        self.handle.connect(username, ROOM).unwrap();

        let mut relay = tokio::time::timeout(WAIT, async {
            loop {
                if let Some(relay) = self.connector.take_relay() {
                    return relay;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("relay link was not opened");

        let handshake = tokio::time::timeout(WAIT, relay.sent.recv())
            .await
            .expect("no handshake")
            .expect("link closed before handshake");
        let handshake: Value = serde_json::from_str(&handshake).unwrap();
        self.self_id = handshake["connectionId"].as_str().unwrap().to_string();
        self.relay = Some(relay);
        self.self_id.clone()
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn relay(&mut self) -> &mut RelayEnd {
        self.relay.as_mut().expect("not connected")
    }

    pub fn roster(&mut self, members: &[(&str, &str)]) {
        self.relay().push(user_list(members));
    }

    pub fn signal(&mut self, kind: &str, sender: &str, payload: Value) {
        let target = self.self_id.clone();
        self.relay().push(json!({
            "Type": kind,
            "Payload": payload,
            "Sender": sender,
            "Target": target,
            "RoomId": ROOM,
        }));
    }

    /// Next envelope the client sends, waiting for it
    pub async fn next_message(&mut self) -> ControlMessage {
        let relay = self.relay();
        let text = tokio::time::timeout(WAIT, relay.sent.recv())
            .await
            .expect("timed out waiting for the client to send")
            .expect("relay link closed");
        ControlMessage::decode(&text).unwrap()
    }

    /// Envelopes sent until `done` returns true for the collected list
    pub async fn collect_until(
        &mut self,
        done: impl Fn(&[ControlMessage]) -> bool,
    ) -> Vec<ControlMessage> {
        let mut messages = Vec::new();
        while !done(&messages) {
            messages.push(self.next_message().await);
        }
        messages
    }

    pub fn transport(&self, peer_id: &str) -> Arc<FakeTransport> {
        self.factory
            .latest(peer_id)
            .unwrap_or_else(|| panic!("no transport for {}", peer_id))
    }

    /// Presenter events published so far
    pub fn take_events(&mut self) -> Vec<PresenterEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
