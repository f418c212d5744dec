//! Session map: one `PeerSession` per remote peer

use super::session::{PeerSession, Role, SessionState};
use crate::types::PeerId;
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, info};

/// Information about a session, for status queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Peer identifier
    pub peer_id: PeerId,

    /// Which side offers
    pub role: Role,

    /// Session state
    pub state: SessionState,

    /// Display name from the roster, if known
    pub display_name: Option<String>,
}

/// Owns every live session
///
/// Not shared: the orchestrator task is the only owner, so no lock is taken.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<PeerId, PeerSession>,
    next_epoch: u64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Epoch for the next session; never reused
    pub fn allocate_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    /// Add a session
    ///
    /// # Errors
    ///
    /// Returns error if a session for the peer already exists.
    pub fn insert(&mut self, session: PeerSession) -> Result<()> {
        let peer_id = session.peer_id().to_string();
        if self.sessions.contains_key(&peer_id) {
            return Err(Error::PeerConnectionError(format!(
                "Session for {} already exists",
                peer_id
            )));
        }

        info!(peer_id = %peer_id, role = ?session.role(), "Adding session");
        self.sessions.insert(peer_id, session);
        Ok(())
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerSession> {
        self.sessions.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &str) -> Option<&mut PeerSession> {
        self.sessions.get_mut(peer_id)
    }

    /// Like [`get`](Self::get), but a missing session is an error
    ///
    /// # Errors
    ///
    /// Returns `PeerNotFound` if there is no session for the peer.
    pub fn require(&self, peer_id: &str) -> Result<&PeerSession> {
        self.sessions
            .get(peer_id)
            .ok_or_else(|| Error::PeerNotFound(peer_id.to_string()))
    }

    pub fn require_mut(&mut self, peer_id: &str) -> Result<&mut PeerSession> {
        self.sessions
            .get_mut(peer_id)
            .ok_or_else(|| Error::PeerNotFound(peer_id.to_string()))
    }

    /// Session for `peer_id` only if it still carries `epoch`
    pub fn get_current(&mut self, peer_id: &str, epoch: u64) -> Option<&mut PeerSession> {
        self.sessions
            .get_mut(peer_id)
            .filter(|session| session.epoch() == epoch)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.sessions.contains_key(peer_id)
    }

    pub fn remove(&mut self, peer_id: &str) -> Option<PeerSession> {
        let removed = self.sessions.remove(peer_id);
        if removed.is_some() {
            debug!(peer_id, "Removed session");
        }
        removed
    }

    /// Remove every session
    pub fn drain(&mut self) -> Vec<PeerSession> {
        let mut drained: Vec<PeerSession> = self.sessions.drain().map(|(_, s)| s).collect();
        drained.sort_by(|a, b| a.peer_id().cmp(b.peer_id()));
        drained
    }

    /// Peer ids in sorted order
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerSession> {
        self.sessions.values_mut()
    }

    pub fn list(&self) -> Vec<PeerInfo> {
        let mut infos: Vec<PeerInfo> = self
            .sessions
            .values()
            .map(|s| PeerInfo {
                peer_id: s.peer_id().to_string(),
                role: s.role(),
                state: s.state(),
                display_name: s.display_name().map(str::to_string),
            })
            .collect();
        infos.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        infos
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
