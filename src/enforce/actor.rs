//! The moderation actor: single owner of all per-process moderation state.
//!
//! One isolated tokio task owns the session table, session data cache, and
//! compiled rule cache. All interaction happens via [`Event`] messages;
//! queries carry a reply channel. This serialization is what lets every
//! cache read and write go lock-free.

use crate::ban::BanRecord;
use crate::db::{DbError, ModerationStore};
use crate::metrics;
use crate::notify::{BanNotice, FleetKickNotice, UsernameRuleNotice};
use crate::rules::{RuleCache, RuleHit, UsernameRule};
use crate::state::{LoadWait, PlayerSession, SessionDataCache, SessionId, SessionTable};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// Events processed by the moderation actor.
pub enum Event {
    /// A player session finished connecting.
    SessionConnected(PlayerSession),
    /// A player session disconnected.
    SessionDisconnected(SessionId),
    /// A session's async data load finished (possibly with an error).
    DataLoaded {
        session_id: SessionId,
        result: Result<crate::state::SessionData, DbError>,
    },
    /// Register interest in a session's data load.
    AwaitData {
        session_id: SessionId,
        reply: oneshot::Sender<LoadWait>,
    },
    /// Apply an authoritative ban record (local creation path).
    BanApply(BanRecord),
    /// An admitted ban notification from another server.
    BanNotice(BanNotice),
    /// Apply an authoritative username rule (local creation path).
    RuleApply(UsernameRule),
    /// An admitted username-rule notification from another server.
    RuleNotice(UsernameRuleNotice),
    /// An admitted duplicate-login kick from another server.
    FleetKick(FleetKickNotice),
    /// Check a username against the compiled rules.
    UsernameCheck {
        username: String,
        /// Whitelisted players short-circuit to "not banned".
        whitelisted: bool,
        reply: oneshot::Sender<Option<RuleHit>>,
    },
    /// Periodic cache sweep.
    Maintenance,
}

/// The actor state. Constructed by [`super::start`] and consumed by
/// [`Moderator::run`].
pub struct Moderator {
    pub(crate) store: Arc<dyn ModerationStore>,
    pub(crate) local_server_id: i32,
    pub(crate) appeal_url: Option<String>,
    /// Sender side of our own queue, cloned into load tasks so completions
    /// come back through the same serialization point.
    pub(crate) events_tx: mpsc::Sender<Event>,
    pub(crate) sessions: SessionTable,
    pub(crate) cache: SessionDataCache,
    pub(crate) rules: RuleCache,
}

impl Moderator {
    pub fn new(
        store: Arc<dyn ModerationStore>,
        local_server_id: i32,
        appeal_url: Option<String>,
        events_tx: mpsc::Sender<Event>,
        initial_rules: &[UsernameRule],
    ) -> Moderator {
        let mut rules = RuleCache::new();
        for rule in initial_rules {
            rules.apply(rule);
        }
        info!(rules = rules.len(), "username rule cache primed");

        Moderator {
            store,
            local_server_id,
            appeal_url,
            events_tx,
            sessions: SessionTable::new(),
            cache: SessionDataCache::new(),
            rules,
        }
    }

    /// Run until every handle is dropped.
    pub async fn run(mut self, mut events_rx: mpsc::Receiver<Event>) {
        while let Some(event) = events_rx.recv().await {
            self.handle(event).await;
        }
        debug!("moderation actor stopped");
    }

    async fn handle(&mut self, event: Event) {
        match event {
            Event::SessionConnected(session) => self.on_session_connected(session),
            Event::SessionDisconnected(session_id) => self.on_session_disconnected(session_id),
            Event::DataLoaded { session_id, result } => self.on_data_loaded(session_id, result),
            Event::AwaitData { session_id, reply } => {
                let _ = reply.send(self.cache.wait(session_id));
            }
            Event::BanApply(record) => self.apply_ban(record),
            Event::BanNotice(notice) => self.on_ban_notice(notice).await,
            Event::RuleApply(rule) => self.apply_rule(&rule),
            Event::RuleNotice(notice) => self.on_rule_notice(notice).await,
            Event::FleetKick(notice) => self.on_fleet_kick(notice),
            Event::UsernameCheck {
                username,
                whitelisted,
                reply,
            } => {
                let hit = if whitelisted {
                    None
                } else {
                    self.rules.is_banned(&username)
                };
                let _ = reply.send(hit);
            }
            Event::Maintenance => self.on_maintenance(),
        }
    }

    fn on_session_connected(&mut self, session: PlayerSession) {
        let session_id = session.session_id;
        let user_id = session.user_id;
        let address = session.address;
        let hardware_id = session.hardware_id.clone();
        debug!(session_id = %session_id, user_id = %user_id, "session connected");

        self.sessions.insert(session);
        let cancel = self.cache.begin_load(session_id);
        metrics::set_connected_sessions(self.sessions.len());

        // The load runs off-actor; only its completion event touches the
        // cache, and only on this task.
        let store = self.store.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let load = async {
                let exempt_flags = store.exempt_flags(user_id).await?;
                let role_bans = store
                    .active_role_bans(user_id, address, hardware_id.as_ref())
                    .await?;
                Ok(crate::state::SessionData {
                    exempt_flags,
                    role_bans,
                })
            };
            tokio::select! {
                // Cancellation is a normal terminal state, not an error.
                _ = cancel.cancelled() => {
                    debug!(session_id = %session_id, "session data load cancelled");
                }
                result = load => {
                    let _ = events_tx
                        .send(Event::DataLoaded { session_id, result })
                        .await;
                }
            }
        });
    }

    fn on_session_disconnected(&mut self, session_id: SessionId) {
        // Absent entries are fine: a kick may already have removed them.
        self.sessions.remove(session_id);
        self.cache.remove(session_id);
        metrics::set_connected_sessions(self.sessions.len());
        metrics::set_cached_sessions(self.cache.len());
    }

    fn on_data_loaded(
        &mut self,
        session_id: SessionId,
        result: Result<crate::state::SessionData, DbError>,
    ) {
        match result {
            Ok(data) => {
                let role_ban_ids = data.role_ban_ids();
                if self.cache.complete_load(session_id, data) {
                    metrics::set_cached_sessions(self.cache.len());
                    if let Some(session) = self.sessions.get(session_id) {
                        session.push(crate::state::SessionMessage::RoleBans {
                            ban_ids: role_ban_ids,
                        });
                    }
                }
            }
            Err(e) => {
                // Loading moderation data is a hard prerequisite for play.
                error!(session_id = %session_id, error = %e, "session data load failed, disconnecting");
                self.kick_session(
                    session_id,
                    "Failed to load your moderation data. Please reconnect.".to_string(),
                );
            }
        }
    }

    fn on_maintenance(&mut self) {
        let now = chrono::Utc::now();
        let sessions = &self.sessions;
        self.cache.maintain(now, |id| sessions.contains(id));
        metrics::set_cached_sessions(self.cache.len());
        debug!(
            sessions = self.sessions.len(),
            cached = self.cache.len(),
            "maintenance sweep complete"
        );
    }
}
