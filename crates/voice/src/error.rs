//! Error types for the signaling orchestrator

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while signaling, negotiating or capturing audio
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// WebSocket error on the relay connection
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Relay connection closed underneath an operation
    #[error("Control channel closed: {0}")]
    ChannelClosed(String),

    /// Connect requested while a connection is open or opening
    #[error("Already connected")]
    AlreadyConnected,

    /// Send requested with no open connection
    #[error("Not connected")]
    NotConnected,

    /// Inbound envelope that does not match any known message
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// Capture device denied or missing
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error is a peer-related error
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::PeerNotFound(_)
                | Error::PeerConnectionError(_)
                | Error::IceCandidateError(_)
                | Error::SdpError(_)
        )
    }

    /// Check if this error comes from local capture
    pub fn is_media_error(&self) -> bool {
        matches!(self, Error::MediaUnavailable(_) | Error::MediaTrackError(_))
    }

    /// Check if this error concerns the relay connection
    pub fn is_channel_error(&self) -> bool {
        matches!(
            self,
            Error::WebSocketError(_)
                | Error::ChannelClosed(_)
                | Error::AlreadyConnected
                | Error::NotConnected
        )
    }
}
