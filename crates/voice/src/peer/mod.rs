//! Peer Session Manager
//!
//! One WebRTC audio session per remote participant. The [`session`] state
//! machine decides what to do next; the [`transport`] trait is the seam to the
//! actual peer connection, implemented over webrtc-rs in [`webrtc`].

pub mod manager;
pub mod session;
pub mod transport;
pub mod webrtc;

pub use manager::{PeerInfo, SessionManager};
pub use session::{OfferAction, PeerSession, Role, SessionState};
pub use transport::{
    ConnectionState, PeerTransport, RemoteStream, TransportEvent, TransportEventSink,
    TransportFactory,
};
pub use webrtc::{WebRtcPeerTransport, WebRtcTransportFactory};
