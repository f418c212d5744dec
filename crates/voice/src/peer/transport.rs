//! Transport seam between the session state machines and a real peer connection
//!
//! The orchestrator never touches webrtc-rs directly. Each session owns an
//! `Arc<dyn PeerTransport>`; whatever the transport observes on its own
//! (negotiation needed, local candidates, connection state, remote tracks) is
//! pushed back through a [`TransportEventSink`] tagged with the session epoch.

use crate::media::LocalStream;
use crate::types::{IceCandidate, PeerId, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Peer connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Disconnected, failed and closed all end the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Remote audio arriving on a session
pub struct RemoteStream {
    pub stream_id: String,
    pub track_id: String,
    /// Encoded RTP payloads, closed when the remote track ends
    pub packets: mpsc::Receiver<Bytes>,
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("stream_id", &self.stream_id)
            .field("track_id", &self.track_id)
            .finish()
    }
}

/// Something a transport noticed by itself
#[derive(Debug)]
pub enum TransportEvent {
    NegotiationNeeded,
    LocalCandidate(IceCandidate),
    StateChanged(ConnectionState),
    RemoteTrack(RemoteStream),
}

/// Event as delivered to the orchestrator
#[derive(Debug)]
pub struct TaggedTransportEvent {
    pub peer_id: PeerId,
    pub epoch: u64,
    pub event: TransportEvent,
}

/// Where a transport reports its events
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    peer_id: PeerId,
    epoch: u64,
    tx: mpsc::UnboundedSender<TaggedTransportEvent>,
}

impl TransportEventSink {
    pub fn new(
        peer_id: PeerId,
        epoch: u64,
        tx: mpsc::UnboundedSender<TaggedTransportEvent>,
    ) -> Self {
        Self { peer_id, epoch, tx }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Report an event; returns false once the orchestrator is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TaggedTransportEvent {
                peer_id: self.peer_id.clone(),
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

/// One peer connection
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send every track of `stream` to the peer
    async fn add_local_stream(&self, stream: &LocalStream) -> Result<()>;

    /// Ask for the peer's audio without sending any
    async fn add_audio_receiver(&self) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Drop our pending offer and return to a stable signaling state
    async fn rollback_local_offer(&self) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Builds transports for new sessions
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, peer_id: &str, sink: TransportEventSink) -> Result<Arc<dyn PeerTransport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Connecting.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert_eq!(ConnectionState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_sink_tags_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = TransportEventSink::new("conn-b".to_string(), 7, tx);
        assert!(sink.emit(TransportEvent::NegotiationNeeded));

        let tagged = rx.try_recv().unwrap();
        assert_eq!(tagged.peer_id, "conn-b");
        assert_eq!(tagged.epoch, 7);
        assert!(matches!(tagged.event, TransportEvent::NegotiationNeeded));

        drop(rx);
        assert!(!sink.emit(TransportEvent::NegotiationNeeded));
    }
}
