//! Connected sessions, keyed by stable id.
//!
//! The table holds one entry per connected player session plus a user-id
//! index so role-ban application is O(targets), not O(sessions). Entries
//! are identified by [`SessionId`], never by live references; the embedding
//! game server allocates the id when the player finishes connecting.

use crate::ban::{ExemptFlags, HwId, PlayerInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Stable identity of one connected session.
pub type SessionId = Uuid;

/// Messages pushed to a session's game-side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMessage {
    /// The session is being disconnected; `message` is shown to the player.
    Kicked { message: String },
    /// The player's current set of active role-ban ids.
    RoleBans { ban_ids: Vec<i32> },
}

/// One connected player session.
#[derive(Debug, Clone)]
pub struct PlayerSession {
    pub session_id: SessionId,
    pub user_id: Uuid,
    pub username: String,
    pub address: Option<IpAddr>,
    pub hardware_id: Option<HwId>,
    /// True if no player record existed before this connection.
    pub is_new_account: bool,
    /// Channel to the game-side connection for this session.
    pub sender: mpsc::Sender<SessionMessage>,
}

impl PlayerSession {
    /// Build the matcher view of this session with the given exemptions.
    pub fn player_info(&self, exempt_flags: ExemptFlags) -> PlayerInfo {
        PlayerInfo {
            user_id: Some(self.user_id),
            address: self.address,
            hardware_id: self.hardware_id.clone(),
            exempt_flags,
            is_new_account: self.is_new_account,
        }
    }

    /// Push a message to the session's client, dropping it if the channel
    /// is full or gone (the session is on its way out anyway).
    pub fn push(&self, message: SessionMessage) {
        if let Err(e) = self.sender.try_send(message) {
            tracing::debug!(session_id = %self.session_id, error = %e, "session message dropped");
        }
    }
}

/// Session table owned by the moderation actor.
#[derive(Default)]
pub struct SessionTable {
    sessions: HashMap<SessionId, PlayerSession>,
    /// user id -> sessions of that user (normally one, but reconnect races
    /// can briefly leave two).
    by_user: HashMap<Uuid, Vec<SessionId>>,
}

impl SessionTable {
    pub fn new() -> SessionTable {
        SessionTable::default()
    }

    pub fn insert(&mut self, session: PlayerSession) {
        self.by_user
            .entry(session.user_id)
            .or_default()
            .push(session.session_id);
        self.sessions.insert(session.session_id, session);
    }

    /// Remove a session. Absence is a no-op, not an error; a kick and a
    /// disconnect can race and removal must happen exactly once.
    pub fn remove(&mut self, session_id: SessionId) -> Option<PlayerSession> {
        let session = self.sessions.remove(&session_id)?;
        if let Some(ids) = self.by_user.get_mut(&session.user_id) {
            ids.retain(|id| *id != session_id);
            if ids.is_empty() {
                self.by_user.remove(&session.user_id);
            }
        }
        Some(session)
    }

    pub fn get(&self, session_id: SessionId) -> Option<&PlayerSession> {
        self.sessions.get(&session_id)
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions belonging to one user id.
    pub fn sessions_of(&self, user_id: Uuid) -> Vec<SessionId> {
        self.by_user.get(&user_id).cloned().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.values()
    }

    /// Snapshot of all session ids. Used before any scan that disconnects
    /// matches, so iteration never aliases mutation.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }
}
