//! Per-session moderation data cache.
//!
//! Each connected session gets a cached copy of its exemption flags and
//! active role bans, loaded asynchronously when the session enters the
//! game. The cache owns its entries: an entry is inserted only when a load
//! completes for a still-connected session, and removed exactly once, on
//! disconnect. The load races the player's disconnect; a result arriving
//! for a session that already left is discarded rather than inserted.

use crate::ban::{BanRecord, ExemptFlags};
use crate::state::session::SessionId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Loaded moderation data for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionData {
    pub exempt_flags: ExemptFlags,
    /// Active role bans targeting this user, set-like by ban id.
    pub role_bans: Vec<BanRecord>,
}

impl SessionData {
    /// Insert a role ban if it is not already present. Returns true if the
    /// set changed.
    pub fn add_role_ban(&mut self, ban: BanRecord) -> bool {
        if self.role_bans.iter().any(|b| b.id == ban.id) {
            return false;
        }
        self.role_bans.push(ban);
        true
    }

    pub fn role_ban_ids(&self) -> Vec<i32> {
        self.role_bans.iter().map(|b| b.id).collect()
    }
}

enum Slot {
    Loading {
        cancel: CancellationToken,
        waiters: Vec<oneshot::Sender<()>>,
    },
    Ready(SessionData),
}

/// Outcome of asking to wait for a session's data load.
pub enum LoadWait {
    /// Data is already loaded.
    Ready,
    /// The session is gone or its load was cancelled.
    Cancelled,
    /// Load still in flight; the receiver resolves on completion and
    /// errors (sender dropped) if the load is cancelled instead.
    Pending(oneshot::Receiver<()>),
}

/// The cache. Owned by the moderation actor; all methods are called from
/// that single task, so no locking.
#[derive(Default)]
pub struct SessionDataCache {
    slots: HashMap<SessionId, Slot>,
}

impl SessionDataCache {
    pub fn new() -> SessionDataCache {
        SessionDataCache::default()
    }

    /// Start tracking a load for a newly connected session. Returns the
    /// token the load task should watch for cancellation.
    pub fn begin_load(&mut self, session_id: SessionId) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.slots.insert(
            session_id,
            Slot::Loading {
                cancel: cancel.clone(),
                waiters: Vec::new(),
            },
        );
        cancel
    }

    /// Complete a load. Returns false (and discards the data) if the
    /// session disconnected while the load was in flight.
    pub fn complete_load(&mut self, session_id: SessionId, data: SessionData) -> bool {
        match self.slots.get_mut(&session_id) {
            Some(slot @ Slot::Loading { .. }) => {
                let Slot::Loading { waiters, .. } =
                    std::mem::replace(slot, Slot::Ready(data))
                else {
                    unreachable!()
                };
                for waiter in waiters {
                    let _ = waiter.send(());
                }
                true
            }
            Some(Slot::Ready(_)) => {
                debug!(session_id = %session_id, "duplicate load completion ignored");
                false
            }
            None => {
                debug!(session_id = %session_id, "load completed after disconnect, discarded");
                false
            }
        }
    }

    /// Remove a session's entry. Cancels an in-flight load; pending waiters
    /// observe cancellation (their sender is dropped). Absence is a no-op.
    pub fn remove(&mut self, session_id: SessionId) {
        if let Some(Slot::Loading { cancel, .. }) = self.slots.remove(&session_id) {
            cancel.cancel();
        }
    }

    /// Register interest in the session's load completing.
    pub fn wait(&mut self, session_id: SessionId) -> LoadWait {
        match self.slots.get_mut(&session_id) {
            Some(Slot::Ready(_)) => LoadWait::Ready,
            Some(Slot::Loading { waiters, .. }) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                LoadWait::Pending(rx)
            }
            None => LoadWait::Cancelled,
        }
    }

    pub fn get(&self, session_id: SessionId) -> Option<&SessionData> {
        match self.slots.get(&session_id) {
            Some(Slot::Ready(data)) => Some(data),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, session_id: SessionId) -> Option<&mut SessionData> {
        match self.slots.get_mut(&session_id) {
            Some(Slot::Ready(data)) => Some(data),
            _ => None,
        }
    }

    /// Exemption flags for matching. Fails open to all exemptions while the
    /// load is outstanding, so a slow load can never cause a false-positive
    /// kick.
    pub fn exempt_flags_or_all(&self, session_id: SessionId) -> ExemptFlags {
        self.get(session_id)
            .map_or(ExemptFlags::ALL, |data| data.exempt_flags)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Maintenance sweep: drop entries whose session is gone and expire
    /// stale role bans in place. Purely in-memory.
    pub fn maintain(&mut self, now: DateTime<Utc>, connected: impl Fn(SessionId) -> bool) {
        let stale: Vec<SessionId> = self
            .slots
            .keys()
            .copied()
            .filter(|id| !connected(*id))
            .collect();
        for session_id in stale {
            debug!(session_id = %session_id, "cache entry for disconnected session swept");
            self.remove(session_id);
        }

        for slot in self.slots.values_mut() {
            if let Slot::Ready(data) = slot {
                data.role_bans.retain(|ban| !ban.is_expired(now));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ban::{BanKind, Severity};
    use chrono::Duration;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn role_ban(id: i32, expires_in: Option<i64>) -> BanRecord {
        let mut ban = BanRecord::new(
            BanKind::Role {
                roles: ["job:captain".to_string()].into_iter().collect(),
            },
            [Uuid::from_u128(1)].into_iter().collect::<HashSet<_>>(),
            Vec::new(),
            Vec::new(),
            expires_in.map(|m| Utc::now() + Duration::minutes(m)),
            "test".into(),
            Severity::Minor,
            None,
        )
        .unwrap();
        ban.id = id;
        ban
    }

    #[test]
    fn load_completion_inserts_entry() {
        let mut cache = SessionDataCache::new();
        let sid = Uuid::from_u128(1);
        cache.begin_load(sid);
        assert!(cache.get(sid).is_none());
        assert!(cache.complete_load(sid, SessionData::default()));
        assert!(cache.get(sid).is_some());
    }

    #[test]
    fn late_completion_after_disconnect_discarded() {
        let mut cache = SessionDataCache::new();
        let sid = Uuid::from_u128(2);
        let token = cache.begin_load(sid);
        cache.remove(sid);
        assert!(token.is_cancelled());
        assert!(!cache.complete_load(sid, SessionData::default()));
        assert!(cache.get(sid).is_none());
    }

    #[test]
    fn waiters_resolve_on_completion_and_cancel_on_removal() {
        let mut cache = SessionDataCache::new();
        let sid = Uuid::from_u128(3);
        cache.begin_load(sid);
        let LoadWait::Pending(rx) = cache.wait(sid) else {
            panic!("expected pending wait");
        };
        cache.complete_load(sid, SessionData::default());
        assert!(rx.blocking_recv().is_ok());

        let sid2 = Uuid::from_u128(4);
        cache.begin_load(sid2);
        let LoadWait::Pending(rx2) = cache.wait(sid2) else {
            panic!("expected pending wait");
        };
        cache.remove(sid2);
        assert!(rx2.blocking_recv().is_err());
    }

    #[test]
    fn fails_open_while_loading() {
        let mut cache = SessionDataCache::new();
        let sid = Uuid::from_u128(5);
        assert_eq!(cache.exempt_flags_or_all(sid), ExemptFlags::ALL);
        cache.begin_load(sid);
        assert_eq!(cache.exempt_flags_or_all(sid), ExemptFlags::ALL);
        cache.complete_load(
            sid,
            SessionData {
                exempt_flags: ExemptFlags::NONE,
                role_bans: Vec::new(),
            },
        );
        assert_eq!(cache.exempt_flags_or_all(sid), ExemptFlags::NONE);
    }

    #[test]
    fn role_ban_insert_is_set_like() {
        let mut data = SessionData::default();
        assert!(data.add_role_ban(role_ban(7, None)));
        assert!(!data.add_role_ban(role_ban(7, None)));
        assert_eq!(data.role_ban_ids(), vec![7]);
    }

    #[test]
    fn maintenance_sweeps_disconnected_and_expired() {
        let mut cache = SessionDataCache::new();
        let alive = Uuid::from_u128(8);
        let gone = Uuid::from_u128(9);
        for sid in [alive, gone] {
            cache.begin_load(sid);
            let mut data = SessionData::default();
            data.add_role_ban(role_ban(1, Some(-5)));
            data.add_role_ban(role_ban(2, Some(60)));
            cache.complete_load(sid, data);
        }

        cache.maintain(Utc::now(), |sid| sid == alive);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(alive).unwrap().role_ban_ids(), vec![2]);
        assert!(cache.get(gone).is_none());
    }
}
