//! Control Channel: the single connection to the relay
//!
//! The channel is a one-shot state machine:
//!
//! ```text
//! Disconnected ──begin_connect──▶ Connecting ──complete_connect──▶ Connected
//!      ▲                              │                               │
//!      └──────────── close / fail_connect / transport loss ◀──────────┘
//! ```
//!
//! Opening the socket happens off the event loop. `begin_connect` hands out a
//! generation number and `complete_connect` only accepts the link if that
//! generation is still current, so a `close` issued while the socket was
//! opening wins over the late link.

pub mod envelope;
pub mod websocket;

pub use envelope::{ControlMessage, InitMessage};
pub use websocket::WebSocketConnector;

use crate::types::PeerId;
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, trace, warn};

/// Frame delivered by a relay link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    /// One text message
    Text(String),
    /// The connection ended, with an optional reason
    Closed(Option<String>),
}

/// An open connection to the relay
///
/// Dropping the link closes the underlying connection.
#[derive(Debug)]
pub struct RelayLink {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<RelayFrame>,
}

impl RelayLink {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<RelayFrame>,
    ) -> Self {
        Self { outbound, inbound }
    }

    fn send_text(&self, text: String) -> Result<()> {
        self.outbound
            .send(text)
            .map_err(|_| Error::ChannelClosed("relay writer has stopped".to_string()))
    }
}

/// Opens relay links
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn open(&self, url: &str) -> Result<RelayLink>;
}

/// Connection state of the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Who we are on the current connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub peer_id: PeerId,
    pub display_name: String,
    pub room_id: String,
}

/// Owner of the relay connection
#[derive(Debug)]
pub struct ControlChannel {
    state: ChannelState,
    generation: u64,
    identity: Option<LocalIdentity>,
    link: Option<RelayLink>,
}

impl Default for ControlChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlChannel {
    pub fn new() -> Self {
        Self {
            state: ChannelState::Disconnected,
            generation: 0,
            identity: None,
            link: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    /// Identity of the current (or opening) connection
    pub fn identity(&self) -> Option<&LocalIdentity> {
        self.identity.as_ref()
    }

    /// Start a connection attempt and return its generation
    ///
    /// # Errors
    ///
    /// Returns `AlreadyConnected` unless the channel is `Disconnected`.
    pub fn begin_connect(
        &mut self,
        username: &str,
        room_id: &str,
        peer_id: PeerId,
    ) -> Result<u64> {
        if self.state != ChannelState::Disconnected {
            return Err(Error::AlreadyConnected);
        }

        self.generation += 1;
        self.state = ChannelState::Connecting;
        self.identity = Some(LocalIdentity {
            peer_id,
            display_name: username.to_string(),
            room_id: room_id.to_string(),
        });

        debug!(generation = self.generation, room_id, "Control channel connecting");
        Ok(self.generation)
    }

    /// Install an opened link and send the handshake
    ///
    /// A link for a stale generation is dropped, which closes it.
    pub fn complete_connect(&mut self, generation: u64, link: RelayLink) -> Result<()> {
        if generation != self.generation || self.state != ChannelState::Connecting {
            debug!(generation, current = self.generation, "Discarding stale relay link");
            return Err(Error::ChannelClosed(
                "connection attempt was superseded".to_string(),
            ));
        }

        let identity = self.identity.as_ref().ok_or(Error::NotConnected)?;
        let init = InitMessage {
            username: identity.display_name.clone(),
            room_id: identity.room_id.clone(),
            connection_id: identity.peer_id.clone(),
        };
        link.send_text(init.to_json()?)?;

        info!(peer_id = %identity.peer_id, room_id = %identity.room_id, "Control channel connected");
        self.link = Some(link);
        self.state = ChannelState::Connected;
        Ok(())
    }

    /// Abandon a connection attempt that failed to open
    ///
    /// Returns false when the attempt was already superseded.
    pub fn fail_connect(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != ChannelState::Connecting {
            return false;
        }
        self.state = ChannelState::Disconnected;
        self.identity = None;
        true
    }

    /// Send one envelope to the relay
    pub fn send(&self, message: &ControlMessage) -> Result<()> {
        let link = match (&self.state, &self.link) {
            (ChannelState::Connected, Some(link)) => link,
            _ => return Err(Error::NotConnected),
        };
        let text = message.encode()?;
        trace!(kind = message.kind(), "Sending envelope");
        link.send_text(text)
    }

    /// Validate one inbound text frame
    ///
    /// Returns `None` for anything that must not reach the roster or the
    /// session manager: malformed envelopes, our own echoes and signaling
    /// addressed to another client.
    pub fn accept_inbound(&self, text: &str) -> Option<ControlMessage> {
        let message = match ControlMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping inbound envelope: {}", e);
                return None;
            }
        };

        let local = self.identity.as_ref().map(|id| id.peer_id.as_str());

        if local.is_some() && message.sender() == local {
            trace!(kind = message.kind(), "Ignoring self-sent message");
            return None;
        }

        if let (Some(target), Some(local)) = (message.target(), local) {
            if target != local {
                debug!(kind = message.kind(), addressee = target, "Ignoring message addressed to another client");
                return None;
            }
        }

        Some(message)
    }

    /// Wait for the next frame from the relay
    ///
    /// Never resolves while no link is installed. A link whose reader went
    /// away yields `Closed(None)`.
    pub async fn next_frame(&mut self) -> RelayFrame {
        match self.link.as_mut() {
            Some(link) => link
                .inbound
                .recv()
                .await
                .unwrap_or(RelayFrame::Closed(None)),
            None => std::future::pending().await,
        }
    }

    /// Non-blocking variant of [`next_frame`](Self::next_frame)
    pub fn try_next_frame(&mut self) -> Option<RelayFrame> {
        let link = self.link.as_mut()?;
        match link.inbound.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(RelayFrame::Closed(None)),
        }
    }

    /// Drop the connection and return to `Disconnected`
    ///
    /// Returns whether anything was open or opening.
    pub fn close(&mut self) -> bool {
        let was_active = self.state != ChannelState::Disconnected;
        if was_active {
            // invalidate any in-flight open
            self.generation += 1;
            info!("Control channel closed");
        }
        self.state = ChannelState::Disconnected;
        self.identity = None;
        self.link = None;
        was_active
    }
}
