//! In-memory moderation store.
//!
//! Implements the same contract as the PostgreSQL-backed store, shared by
//! every test server the way a fleet shares one database.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use uuid::Uuid;
use wardend::ban::{self, BanRecord, ExemptFlags, HwId, PlayerInfo, UnbanRecord};
use wardend::db::{DbError, ModerationStore};
use wardend::rules::UsernameRule;

#[derive(Default)]
struct Inner {
    bans: HashMap<i32, BanRecord>,
    next_ban_id: i32,
    rules: HashMap<i32, UsernameRule>,
    next_rule_id: i32,
    exemptions: HashMap<Uuid, ExemptFlags>,
    servers: HashMap<String, i32>,
    /// Artificial delay applied to session data loads, for races.
    load_delay: Option<Duration>,
    /// When set, session data loads fail with this message.
    fail_loads: Option<String>,
}

/// Shared in-memory fleet store.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    /// Make session data loads take at least `delay`, so tests can race
    /// disconnects against in-flight loads deterministically.
    pub fn set_load_delay(&self, delay: Duration) {
        self.inner.lock().load_delay = Some(delay);
    }

    /// Make session data loads fail.
    pub fn fail_loads(&self, message: &str) {
        self.inner.lock().fail_loads = Some(message.to_string());
    }

    /// Seed a ban directly, bypassing the engine. Returns the assigned id.
    pub fn seed_ban(&self, mut ban: BanRecord) -> i32 {
        let mut inner = self.inner.lock();
        inner.next_ban_id += 1;
        let id = inner.next_ban_id;
        ban.id = id;
        inner.bans.insert(id, ban);
        id
    }

    /// Pardon a ban directly, bypassing the engine and its notifications.
    pub fn seed_pardon(&self, ban_id: i32) {
        let mut inner = self.inner.lock();
        if let Some(ban) = inner.bans.get_mut(&ban_id) {
            ban.unban = Some(UnbanRecord {
                unbanned_by: None,
                at: Utc::now(),
            });
        }
    }

    async fn load_gate(&self) -> Result<(), DbError> {
        let (delay, fail) = {
            let inner = self.inner.lock();
            (inner.load_delay, inner.fail_loads.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = fail {
            return Err(DbError::Internal(message));
        }
        Ok(())
    }
}

#[async_trait]
impl ModerationStore for MemStore {
    async fn ban_by_id(&self, id: i32) -> Result<Option<BanRecord>, DbError> {
        Ok(self.inner.lock().bans.get(&id).cloned())
    }

    async fn add_ban(&self, ban: &BanRecord) -> Result<i32, DbError> {
        Ok(self.seed_ban(ban.clone()))
    }

    async fn add_unban(&self, ban_id: i32, by: Option<Uuid>) -> Result<bool, DbError> {
        let mut inner = self.inner.lock();
        match inner.bans.get_mut(&ban_id) {
            Some(ban) if ban.unban.is_none() => {
                ban.unban = Some(UnbanRecord {
                    unbanned_by: by,
                    at: Utc::now(),
                });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn exempt_flags(&self, user_id: Uuid) -> Result<ExemptFlags, DbError> {
        self.load_gate().await?;
        Ok(self
            .inner
            .lock()
            .exemptions
            .get(&user_id)
            .copied()
            .unwrap_or(ExemptFlags::NONE))
    }

    async fn set_exempt_flags(&self, user_id: Uuid, flags: ExemptFlags) -> Result<(), DbError> {
        self.inner.lock().exemptions.insert(user_id, flags);
        Ok(())
    }

    async fn active_role_bans(
        &self,
        user_id: Uuid,
        address: Option<IpAddr>,
        hardware_id: Option<&HwId>,
    ) -> Result<Vec<BanRecord>, DbError> {
        let player = PlayerInfo {
            user_id: Some(user_id),
            address,
            hardware_id: hardware_id.cloned(),
            exempt_flags: ExemptFlags::NONE,
            is_new_account: false,
        };
        let now = Utc::now();
        Ok(self
            .inner
            .lock()
            .bans
            .values()
            .filter(|b| !b.is_server_ban() && b.is_active(now) && ban::matches(b, &player))
            .cloned()
            .collect())
    }

    async fn username_rule_by_id(&self, id: i32) -> Result<Option<UsernameRule>, DbError> {
        Ok(self.inner.lock().rules.get(&id).cloned())
    }

    async fn add_username_rule(&self, rule: &UsernameRule) -> Result<i32, DbError> {
        let mut inner = self.inner.lock();
        inner.next_rule_id += 1;
        let id = inner.next_rule_id;
        let mut rule = rule.clone();
        rule.id = id;
        inner.rules.insert(id, rule);
        Ok(id)
    }

    async fn retire_username_rule(
        &self,
        id: i32,
        by: Option<Uuid>,
    ) -> Result<Option<UsernameRule>, DbError> {
        let mut inner = self.inner.lock();
        match inner.rules.get_mut(&id) {
            Some(rule) if !rule.retired => {
                rule.retired = true;
                rule.retired_by = by;
                rule.retired_at = Some(Utc::now());
                Ok(Some(rule.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn active_username_rules(&self) -> Result<Vec<UsernameRule>, DbError> {
        Ok(self
            .inner
            .lock()
            .rules
            .values()
            .filter(|r| !r.retired)
            .cloned()
            .collect())
    }

    async fn resolve_server_id(&self, name: &str) -> Result<i32, DbError> {
        let mut inner = self.inner.lock();
        let next = inner.servers.len() as i32 + 1;
        Ok(*inner.servers.entry(name.to_string()).or_insert(next))
    }
}
