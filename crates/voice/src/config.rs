//! Configuration types for the voice client

use serde::{Deserialize, Serialize};
use std::path::Path;

const SUPPORTED_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];
const SUPPORTED_FRAME_DURATIONS_MS: [u32; 4] = [10, 20, 40, 60];

/// Main configuration for the signaling orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay server URL (ws:// or wss://)
    pub relay_url: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Local audio capture settings
    pub audio: AudioCaptureConfig,

    /// Bounded packet queue per remote stream (default: 256)
    pub remote_packet_buffer: usize,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Capture and encoding parameters for the local microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioCaptureConfig {
    /// Opus sample rate in Hz (default: 48000)
    pub sample_rate: u32,

    /// Channel count, 1 or 2 (default: 1)
    pub channels: u16,

    /// Opus frame length in milliseconds (default: 20)
    pub frame_duration_ms: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:8080/stream".to_string(),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: Vec::new(),
            audio: AudioCaptureConfig::default(),
            remote_packet_buffer: 256,
        }
    }
}

impl Default for AudioCaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            frame_duration_ms: 20,
        }
    }
}

impl AudioCaptureConfig {
    /// Samples per channel in one encoded frame
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_duration_ms as usize) / 1000
    }
}

impl ClientConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `relay_url` is not a WebSocket URL
    /// - `stun_servers` is empty
    /// - a TURN url does not use the `turn:`/`turns:` scheme
    /// - the audio parameters are not ones Opus accepts
    /// - `remote_packet_buffer` is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "relay_url must start with ws:// or wss://, got {}",
                self.relay_url
            )));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN url must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        if !SUPPORTED_SAMPLE_RATES.contains(&self.audio.sample_rate) {
            return Err(Error::InvalidConfig(format!(
                "audio.sample_rate must be one of {:?}, got {}",
                SUPPORTED_SAMPLE_RATES, self.audio.sample_rate
            )));
        }

        if self.audio.channels == 0 || self.audio.channels > 2 {
            return Err(Error::InvalidConfig(format!(
                "audio.channels must be 1 or 2, got {}",
                self.audio.channels
            )));
        }

        if !SUPPORTED_FRAME_DURATIONS_MS.contains(&self.audio.frame_duration_ms) {
            return Err(Error::InvalidConfig(format!(
                "audio.frame_duration_ms must be one of {:?}, got {}",
                SUPPORTED_FRAME_DURATIONS_MS, self.audio.frame_duration_ms
            )));
        }

        if self.remote_packet_buffer == 0 {
            return Err(Error::InvalidConfig(
                "remote_packet_buffer must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load a configuration from a JSON file and validate it
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the relay URL
    pub fn with_relay_url(mut self, relay_url: impl Into<String>) -> Self {
        self.relay_url = relay_url.into();
        self
    }

    /// Replace the STUN servers
    pub fn with_stun_servers(mut self, stun_servers: Vec<String>) -> Self {
        self.stun_servers = stun_servers;
        self
    }

    /// Add TURN servers to this configuration
    ///
    /// # Example
    ///
    /// ```
    /// use watchparty_voice::config::{ClientConfig, TurnServerConfig};
    ///
    /// let config = ClientConfig::default().with_turn_servers(vec![TurnServerConfig {
    ///     url: "turn:turn.example.com:3478".to_string(),
    ///     username: "user".to_string(),
    ///     credential: "pass".to_string(),
    /// }]);
    /// assert_eq!(config.turn_servers.len(), 1);
    /// ```
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers.extend(turn_servers);
        self
    }
}
