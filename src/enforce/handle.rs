//! Cloneable API surface of the moderation engine.
//!
//! The embedding game server talks to the engine exclusively through a
//! [`ModerationHandle`]: session lifecycle, admin ban/rule commands, and
//! username checks. Creation commands run their local side effects
//! synchronously (store insert, then apply on the actor) and then publish
//! the notification; the self-origin filter keeps the echo from being
//! processed twice.

use super::actor::Event;
use crate::ban::{BanKind, BanRecord, ExemptFlags, HwId, RoleRegistry, Severity};
use crate::db::ModerationStore;
use crate::error::BanError;
use crate::notify::{
    BAN_CHANNEL, BanNotice, FLEET_KICK_CHANNEL, FleetKickNotice, NotifyBus,
    USERNAME_RULE_CHANNEL, UsernameRuleNotice,
};
use crate::rules::{RuleHit, UsernameRule};
use crate::state::{LoadWait, PlayerSession, SessionId};
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// The session's moderation data load was cancelled (disconnect raced the
/// load, or the load failed and the session was dropped).
#[derive(Debug, Error)]
#[error("session data load was cancelled")]
pub struct LoadCancelled;

/// Parameters for a new server ban.
#[derive(Debug, Clone, Default)]
pub struct ServerBanDraft {
    pub user_ids: HashSet<Uuid>,
    pub address_ranges: Vec<IpNet>,
    pub hardware_ids: Vec<HwId>,
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub severity: Severity,
    pub banned_by: Option<Uuid>,
    pub exempt_flags: ExemptFlags,
}

/// Parameters for a new role ban. Role references are resolved against the
/// registry before anything is persisted.
#[derive(Debug, Clone, Default)]
pub struct RoleBanDraft {
    pub roles: Vec<String>,
    pub user_ids: HashSet<Uuid>,
    pub address_ranges: Vec<IpNet>,
    pub hardware_ids: Vec<HwId>,
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub severity: Severity,
    pub banned_by: Option<Uuid>,
}

/// Parameters for a new username rule.
#[derive(Debug, Clone, Default)]
pub struct UsernameRuleDraft {
    pub is_regex: bool,
    pub expression: String,
    pub message: String,
    pub extend_to_ban: bool,
    pub created_by: Option<Uuid>,
}

/// Handle to a running moderation engine.
#[derive(Clone)]
pub struct ModerationHandle {
    events_tx: mpsc::Sender<Event>,
    store: Arc<dyn ModerationStore>,
    bus: Arc<dyn NotifyBus>,
    roles: Arc<RoleRegistry>,
    local_server_id: i32,
}

impl ModerationHandle {
    pub(crate) fn new(
        events_tx: mpsc::Sender<Event>,
        store: Arc<dyn ModerationStore>,
        bus: Arc<dyn NotifyBus>,
        roles: Arc<RoleRegistry>,
        local_server_id: i32,
    ) -> ModerationHandle {
        ModerationHandle {
            events_tx,
            store,
            bus,
            roles,
            local_server_id,
        }
    }

    /// This process's resolved server id.
    pub fn local_server_id(&self) -> i32 {
        self.local_server_id
    }

    // ========== Session lifecycle ==========

    /// Register a session that finished connecting. Starts its async data
    /// load.
    pub async fn session_connected(&self, session: PlayerSession) -> Result<(), BanError> {
        self.send(Event::SessionConnected(session)).await
    }

    /// Remove a session. Safe to call after a kick; removal is exactly
    /// once and absence is a no-op.
    pub async fn session_disconnected(&self, session_id: SessionId) -> Result<(), BanError> {
        self.send(Event::SessionDisconnected(session_id)).await
    }

    /// Wait until the session's moderation data is loaded. Resolves as
    /// [`LoadCancelled`] if the session disconnected (or its load failed)
    /// first, so no caller ever hangs.
    pub async fn wait_data_loaded(&self, session_id: SessionId) -> Result<(), LoadCancelled> {
        let (reply, rx) = oneshot::channel();
        if self
            .events_tx
            .send(Event::AwaitData { session_id, reply })
            .await
            .is_err()
        {
            return Err(LoadCancelled);
        }
        match rx.await.map_err(|_| LoadCancelled)? {
            LoadWait::Ready => Ok(()),
            LoadWait::Cancelled => Err(LoadCancelled),
            LoadWait::Pending(done) => done.await.map_err(|_| LoadCancelled),
        }
    }

    // ========== Admin commands ==========

    /// Create a server ban: persist, apply locally, announce to the fleet.
    pub async fn create_server_ban(&self, draft: ServerBanDraft) -> Result<BanRecord, BanError> {
        let record = BanRecord::new(
            BanKind::Server {
                exempt_flags: draft.exempt_flags,
            },
            draft.user_ids,
            draft.address_ranges,
            draft.hardware_ids,
            draft.expires_at,
            draft.reason,
            draft.severity,
            draft.banned_by,
        )?;
        self.persist_and_announce(record).await
    }

    /// Create a role ban. Unknown or ambiguous role references fail here,
    /// synchronously, before anything is persisted.
    pub async fn create_role_ban(&self, draft: RoleBanDraft) -> Result<BanRecord, BanError> {
        let mut roles = HashSet::new();
        for reference in &draft.roles {
            roles.insert(self.roles.resolve(reference)?);
        }

        let record = BanRecord::new(
            BanKind::Role { roles },
            draft.user_ids,
            draft.address_ranges,
            draft.hardware_ids,
            draft.expires_at,
            draft.reason,
            draft.severity,
            draft.banned_by,
        )?;
        self.persist_and_announce(record).await
    }

    async fn persist_and_announce(&self, mut record: BanRecord) -> Result<BanRecord, BanError> {
        record.id = self.store.add_ban(&record).await?;

        // Local side effects run synchronously with creation; the fleet
        // learns via the notification, and we ignore our own echo.
        self.send(Event::BanApply(record.clone())).await?;
        self.publish_ban_notice(record.id).await?;
        Ok(record)
    }

    /// Pardon a ban. Returns false if the ban was already pardoned or
    /// never existed. The fleet is notified; receivers refetch, see an
    /// inert record, and drop the unit of work.
    pub async fn pardon_ban(&self, ban_id: i32, by: Option<Uuid>) -> Result<bool, BanError> {
        let changed = self.store.add_unban(ban_id, by).await?;
        if changed {
            self.publish_ban_notice(ban_id).await?;
        }
        Ok(changed)
    }

    /// Create a username rule. Regex patterns are validated here,
    /// synchronously.
    pub async fn create_username_rule(
        &self,
        draft: UsernameRuleDraft,
    ) -> Result<UsernameRule, BanError> {
        if draft.is_regex {
            // Compile once for validation; the cache compiles its own copy.
            regex::Regex::new(&draft.expression)?;
        }

        let mut rule = UsernameRule {
            id: 0,
            is_regex: draft.is_regex,
            expression: draft.expression,
            message: draft.message,
            extend_to_ban: draft.extend_to_ban,
            retired: false,
            created_at: Utc::now(),
            created_by: draft.created_by,
            retired_by: None,
            retired_at: None,
        };
        rule.id = self.store.add_username_rule(&rule).await?;

        self.send(Event::RuleApply(rule.clone())).await?;
        self.publish_rule_notice(rule.id).await?;
        Ok(rule)
    }

    /// Retire a username rule everywhere in the fleet.
    pub async fn retire_username_rule(&self, id: i32, by: Option<Uuid>) -> Result<(), BanError> {
        let rule = self
            .store
            .retire_username_rule(id, by)
            .await?
            .ok_or(BanError::NoSuchRule(id))?;

        self.send(Event::RuleApply(rule)).await?;
        self.publish_rule_notice(id).await?;
        Ok(())
    }

    /// Check a username against the compiled rules. `whitelisted` players
    /// short-circuit to "not banned".
    pub async fn is_username_banned(
        &self,
        username: &str,
        whitelisted: bool,
    ) -> Result<Option<RuleHit>, BanError> {
        let (reply, rx) = oneshot::channel();
        self.send(Event::UsernameCheck {
            username: username.to_string(),
            whitelisted,
            reply,
        })
        .await?;
        rx.await.map_err(|_| BanError::EngineClosed)
    }

    /// Announce that a player logged in here, so every other server kicks
    /// any stale session of theirs.
    pub async fn announce_login(&self, player_id: Uuid) -> Result<(), BanError> {
        let payload = serde_json::to_string(&FleetKickNotice {
            player_id,
            server_id: self.local_server_id,
        })
        .expect("fleet kick notice serializes");
        self.bus.publish(FLEET_KICK_CHANNEL, &payload).await?;
        Ok(())
    }

    async fn publish_ban_notice(&self, ban_id: i32) -> Result<(), BanError> {
        let payload = serde_json::to_string(&BanNotice {
            ban_id,
            server_id: Some(self.local_server_id),
        })
        .expect("ban notice serializes");
        self.bus.publish(BAN_CHANNEL, &payload).await?;
        Ok(())
    }

    async fn publish_rule_notice(&self, rule_id: i32) -> Result<(), BanError> {
        let payload = serde_json::to_string(&UsernameRuleNotice {
            username_rule_id: rule_id,
            server_id: Some(self.local_server_id),
        })
        .expect("rule notice serializes");
        self.bus.publish(USERNAME_RULE_CHANNEL, &payload).await?;
        Ok(())
    }

    async fn send(&self, event: Event) -> Result<(), BanError> {
        self.events_tx
            .send(event)
            .await
            .map_err(|_| BanError::EngineClosed)
    }
}
