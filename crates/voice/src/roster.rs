//! Roster Manager: last-known room membership and join/leave diffs

use crate::types::{PeerId, RosterEntry};
use std::collections::HashSet;
use tracing::debug;

/// Outcome of applying one membership snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDiff {
    /// Members that were not in the previous snapshot, self excluded
    pub joined: Vec<RosterEntry>,
    /// Peers that are gone from the new snapshot
    pub left: Vec<PeerId>,
    /// First snapshot since `reset`: everyone in it was here before us
    pub initial: bool,
}

impl RosterDiff {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Roster {
    self_id: Option<PeerId>,
    entries: Vec<RosterEntry>,
    initialized: bool,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the previous snapshot and start tracking for `self_id`
    pub fn reset(&mut self, self_id: impl Into<PeerId>) {
        self.self_id = Some(self_id.into());
        self.entries.clear();
        self.initialized = false;
    }

    /// Replace the stored snapshot and report what changed
    ///
    /// `live_sessions` are the peers we currently hold sessions for; any of
    /// them missing from `entries` is reported as left even if the previous
    /// snapshot never listed it (a responder session opened by an early offer).
    pub fn apply_update<'a, I>(&mut self, entries: Vec<RosterEntry>, live_sessions: I) -> RosterDiff
    where
        I: IntoIterator<Item = &'a PeerId>,
    {
        let self_id = self.self_id.as_deref();
        let previous: HashSet<&str> = self.entries.iter().map(|e| e.peer_id.as_str()).collect();
        let current: HashSet<&str> = entries.iter().map(|e| e.peer_id.as_str()).collect();

        let mut seen = HashSet::new();
        let joined: Vec<RosterEntry> = entries
            .iter()
            .filter(|e| Some(e.peer_id.as_str()) != self_id)
            .filter(|e| !previous.contains(e.peer_id.as_str()))
            .filter(|e| seen.insert(e.peer_id.as_str()))
            .cloned()
            .collect();

        let mut left: Vec<PeerId> = Vec::new();
        let mut mark_left = |peer_id: &PeerId| {
            if Some(peer_id.as_str()) == self_id || current.contains(peer_id.as_str()) {
                return;
            }
            if !left.contains(peer_id) {
                left.push(peer_id.clone());
            }
        };
        self.entries.iter().for_each(|e| mark_left(&e.peer_id));
        live_sessions.into_iter().for_each(|peer_id| mark_left(peer_id));

        let initial = !self.initialized;
        debug!(
            joined = joined.len(),
            left = left.len(),
            initial,
            "Applied roster update"
        );

        self.entries = entries;
        self.initialized = true;

        RosterDiff {
            joined,
            left,
            initial,
        }
    }

    /// Drop the snapshot and the local identity
    pub fn clear(&mut self) {
        self.self_id = None;
        self.entries.clear();
        self.initialized = false;
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    /// Display names in snapshot order, self included
    pub fn display_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.display_name.clone()).collect()
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.entries.iter().any(|e| e.peer_id == peer_id)
    }
}
