//! Watch-party voice client
//!
//! Joins a room on a WebSocket relay, keeps track of who else is in it and
//! maintains one WebRTC audio session with every other member. The relay only
//! forwards JSON envelopes; offers, answers and ICE candidates travel through
//! it and the audio itself flows peer to peer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Presenter (CLI / UI)                                    │
//! │  ↓ Command                        ↑ PresenterEvent       │
//! │  Orchestrator (single task)                              │
//! │  ├─ ControlChannel (WebSocket to the relay)              │
//! │  ├─ Roster (membership snapshots → join/leave diffs)     │
//! │  ├─ SessionManager (one PeerSession per remote member)   │
//! │  │   └─ PeerTransport (webrtc-rs RTCPeerConnection)      │
//! │  └─ LocalMedia (microphone → Opus track)                 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use watchparty_voice::ClientConfig;
//!
//! let config = ClientConfig::default().with_relay_url("wss://relay.example.com/stream");
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Running the client
//!
//! ```no_run
//! use std::sync::Arc;
//! use watchparty_voice::channel::WebSocketConnector;
//! use watchparty_voice::media::NoCaptureDevice;
//! use watchparty_voice::peer::WebRtcTransportFactory;
//! use watchparty_voice::{ClientConfig, Orchestrator};
//!
//! # async fn example() -> watchparty_voice::Result<()> {
//! let config = ClientConfig::default();
//! let factory = WebRtcTransportFactory::new(&config);
//! let (orchestrator, handle, mut events) = Orchestrator::new(
//!     config,
//!     Arc::new(WebSocketConnector),
//!     Arc::new(factory),
//!     Arc::new(NoCaptureDevice),
//! );
//! tokio::spawn(orchestrator.run());
//!
//! handle.connect("alice", "movie-night")?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod error;
pub mod media;
pub mod orchestrator;
pub mod peer;
pub mod presenter;
pub mod roster;
pub mod types;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, OrchestratorHandle};
pub use presenter::{Command, ConnectionStatus, PresenterEvent};
pub use types::{IceCandidate, PeerId, RosterEntry, SdpKind, SessionDescription};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version
pub fn version() -> &'static str {
    VERSION
}
