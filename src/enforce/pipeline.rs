//! Propagation pipeline: notification -> refetch -> cache update -> kick.
//!
//! Both the local-creation path and the notification path converge on the
//! same apply functions; the difference is only that notifications carry an
//! id and must re-fetch the authoritative record first. A record that has
//! vanished or gone inert between notification and refetch is dropped
//! silently; the authoritative state has simply moved on.

use super::actor::Moderator;
use crate::ban::{BanKind, BanRecord};
use crate::metrics;
use crate::notify::{BAN_CHANNEL, BanNotice, FleetKickNotice, USERNAME_RULE_CHANNEL, UsernameRuleNotice};
use crate::rules::UsernameRule;
use crate::state::{SessionId, SessionMessage};
use tracing::{debug, info, warn};

impl Moderator {
    pub(crate) async fn on_ban_notice(&mut self, notice: BanNotice) {
        // Envelopes are only trusted as "look this up".
        let record = match self.store.ban_by_id(notice.ban_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(ban_id = notice.ban_id, "notified ban no longer exists, dropped");
                return;
            }
            Err(e) => {
                warn!(ban_id = notice.ban_id, error = %e, "ban refetch failed, dropped");
                return;
            }
        };

        if !record.is_active(chrono::Utc::now()) {
            debug!(ban_id = record.id, "notified ban already inert, dropped");
            return;
        }

        metrics::notification_applied(BAN_CHANNEL);
        self.apply_ban(record);
    }

    /// Apply an authoritative ban record to local state.
    pub(crate) fn apply_ban(&mut self, record: BanRecord) {
        match &record.kind {
            BanKind::Server { .. } => self.enforce_server_ban(&record),
            BanKind::Role { .. } => self.apply_role_ban(record),
        }
    }

    /// Scan connected sessions and disconnect everyone the ban matches.
    fn enforce_server_ban(&mut self, record: &BanRecord) {
        // Snapshot first; kicking mutates the table.
        let candidates: Vec<SessionId> = self.sessions.ids();
        let mut kicked = 0usize;
        for session_id in candidates {
            let Some(session) = self.sessions.get(session_id) else {
                continue;
            };
            let player = session.player_info(self.cache.exempt_flags_or_all(session_id));
            if crate::ban::matches(record, &player) {
                let message = record.disconnect_message(self.appeal_url.as_deref());
                self.kick_session(session_id, message);
                kicked += 1;
            }
        }
        if kicked > 0 {
            info!(ban_id = record.id, kicked, "server ban enforced");
        }
    }

    /// Append a role ban to every targeted connected session's cached list
    /// and push the updated id list to those clients. O(targets), not
    /// O(sessions).
    fn apply_role_ban(&mut self, record: BanRecord) {
        for user_id in record.user_ids.iter().copied().collect::<Vec<_>>() {
            for session_id in self.sessions.sessions_of(user_id) {
                let Some(data) = self.cache.get_mut(session_id) else {
                    // Load still in flight; it will pick the ban up from
                    // the store when it lands.
                    continue;
                };
                if !data.add_role_ban(record.clone()) {
                    continue; // set-like by ban id, duplicate delivery
                }
                let ban_ids = data.role_ban_ids();
                if let Some(session) = self.sessions.get(session_id) {
                    debug!(session_id = %session_id, ban_id = record.id, "role ban cached");
                    session.push(SessionMessage::RoleBans { ban_ids });
                    metrics::role_ban_push();
                }
            }
        }
    }

    pub(crate) async fn on_rule_notice(&mut self, notice: UsernameRuleNotice) {
        let rule = match self.store.username_rule_by_id(notice.username_rule_id).await {
            Ok(Some(rule)) => rule,
            Ok(None) => {
                debug!(
                    rule_id = notice.username_rule_id,
                    "notified username rule no longer exists, dropped"
                );
                return;
            }
            Err(e) => {
                warn!(rule_id = notice.username_rule_id, error = %e, "rule refetch failed, dropped");
                return;
            }
        };

        metrics::notification_applied(USERNAME_RULE_CHANNEL);
        self.apply_rule(&rule);
    }

    /// Insert, replace, or (for retired rules) drop a rule from the
    /// compiled cache. Retirement never disconnects anyone retroactively.
    pub(crate) fn apply_rule(&mut self, rule: &UsernameRule) {
        self.rules.apply(rule);
        metrics::set_compiled_rules(self.rules.len());
    }

    /// A player logged in on another server; kick their stale session
    /// here. Self-origin notices never reach this (post filter).
    pub(crate) fn on_fleet_kick(&mut self, notice: FleetKickNotice) {
        for session_id in self.sessions.sessions_of(notice.player_id) {
            info!(
                session_id = %session_id,
                player_id = %notice.player_id,
                origin = notice.server_id,
                "duplicate login on another server, kicking"
            );
            self.kick_session(
                session_id,
                "You have connected to another server in this fleet.".to_string(),
            );
        }
    }

    /// Disconnect one session. Removal happens exactly once; a concurrent
    /// disconnect event for the same id becomes a no-op.
    pub(crate) fn kick_session(&mut self, session_id: SessionId, message: String) {
        let Some(session) = self.sessions.remove(session_id) else {
            return;
        };
        self.cache.remove(session_id);
        session.push(SessionMessage::Kicked { message });
        metrics::session_kicked();
        metrics::set_connected_sessions(self.sessions.len());
        metrics::set_cached_sessions(self.cache.len());
    }
}
