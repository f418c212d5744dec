//! Presenter-facing notifications and commands
//!
//! The presenter (popup, CLI, UI) talks to the orchestrator only through
//! these two types: [`Command`]s go in, [`PresenterEvent`]s come out.

use crate::peer::transport::RemoteStream;
use crate::types::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

/// Connection summary shown to the user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub room_id: String,
    /// Display names of everyone in the room, self included
    pub users: Vec<String>,
}

impl ConnectionStatus {
    pub fn disconnected() -> Self {
        Self::default()
    }
}

#[derive(Debug)]
pub enum PresenterEvent {
    ConnectionStatus(ConnectionStatus),
    /// First time a remote stream shows up on a session
    RemoteStreamAdded { peer_id: PeerId, stream: RemoteStream },
    /// The peer's session is gone
    RemoteStreamClosed { peer_id: PeerId },
    /// `player_sync` payload to apply to the local player
    PlayerCommand { command: Value },
}

#[derive(Debug)]
pub enum Command {
    Connect { username: String, room_id: String },
    Disconnect,
    GetStatus { reply: oneshot::Sender<ConnectionStatus> },
    /// Local player state to broadcast as `player_sync`
    ForwardPlayerState { state: Value },
}
