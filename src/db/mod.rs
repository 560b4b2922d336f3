//! Database module for persistent moderation storage.
//!
//! Provides async PostgreSQL access using SQLx for:
//! - Ban records (server and role) and pardons
//! - Username rules
//! - Ban exemption flags
//! - Server identity rows
//!
//! The rest of the crate depends on the [`ModerationStore`] trait rather
//! than on [`Database`] directly, so tests can substitute an in-memory
//! store while two simulated servers share it like a real fleet database.

mod bans;
mod rules;
mod servers;

pub use bans::BanRepository;
pub use rules::UsernameRuleRepository;
pub use servers::ServerRepository;

use crate::ban::{BanRecord, ExemptFlags, HwId};
use crate::rules::UsernameRule;
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
    #[error("migration error: {0}")]
    Migration(sqlx::migrate::MigrateError),
    #[error("no such ban: {0}")]
    BanNotFound(i32),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::Sqlx(err)
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::Migration(err)
    }
}

/// The collaborator operations the moderation engine requires.
#[async_trait]
pub trait ModerationStore: Send + Sync {
    /// Fetch a ban by id, pardoned or not. This is the authoritative
    /// re-fetch the notification pipeline relies on; envelopes are never
    /// trusted for content.
    async fn ban_by_id(&self, id: i32) -> Result<Option<BanRecord>, DbError>;

    /// Insert a ban, returning its assigned id.
    async fn add_ban(&self, ban: &BanRecord) -> Result<i32, DbError>;

    /// Attach a pardon to a ban. Returns false if the ban does not exist.
    async fn add_unban(&self, ban_id: i32, by: Option<Uuid>) -> Result<bool, DbError>;

    /// Current exemption flags for a user, `NONE` if never set.
    async fn exempt_flags(&self, user_id: Uuid) -> Result<ExemptFlags, DbError>;

    async fn set_exempt_flags(&self, user_id: Uuid, flags: ExemptFlags) -> Result<(), DbError>;

    /// Active (unexpired, unpardoned) role bans matching a player.
    async fn active_role_bans(
        &self,
        user_id: Uuid,
        address: Option<IpAddr>,
        hardware_id: Option<&HwId>,
    ) -> Result<Vec<BanRecord>, DbError>;

    async fn username_rule_by_id(&self, id: i32) -> Result<Option<UsernameRule>, DbError>;

    /// Insert a rule, returning its assigned id.
    async fn add_username_rule(&self, rule: &UsernameRule) -> Result<i32, DbError>;

    /// Retire a rule, returning the updated record, or None if absent.
    async fn retire_username_rule(
        &self,
        id: i32,
        by: Option<Uuid>,
    ) -> Result<Option<UsernameRule>, DbError>;

    /// All unretired rules, for priming the compiled cache at startup.
    async fn active_username_rules(&self) -> Result<Vec<UsernameRule>, DbError>;

    /// Map this process's configured server name to its row id, creating
    /// the row on first run. Called once at startup; the result is cached
    /// for the process lifetime.
    async fn resolve_server_id(&self, name: &str) -> Result<i32, DbError>;
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from
    /// blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connect and run migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Database, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(max_connections, "database connected");

        Ok(Database { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn bans(&self) -> BanRepository<'_> {
        BanRepository::new(&self.pool)
    }

    pub fn rules(&self) -> UsernameRuleRepository<'_> {
        UsernameRuleRepository::new(&self.pool)
    }

    pub fn servers(&self) -> ServerRepository<'_> {
        ServerRepository::new(&self.pool)
    }
}

#[async_trait]
impl ModerationStore for Database {
    async fn ban_by_id(&self, id: i32) -> Result<Option<BanRecord>, DbError> {
        self.bans().get(id).await
    }

    async fn add_ban(&self, ban: &BanRecord) -> Result<i32, DbError> {
        self.bans().add(ban).await
    }

    async fn add_unban(&self, ban_id: i32, by: Option<Uuid>) -> Result<bool, DbError> {
        self.bans().add_unban(ban_id, by).await
    }

    async fn exempt_flags(&self, user_id: Uuid) -> Result<ExemptFlags, DbError> {
        self.bans().exempt_flags(user_id).await
    }

    async fn set_exempt_flags(&self, user_id: Uuid, flags: ExemptFlags) -> Result<(), DbError> {
        self.bans().set_exempt_flags(user_id, flags).await
    }

    async fn active_role_bans(
        &self,
        user_id: Uuid,
        address: Option<IpAddr>,
        hardware_id: Option<&HwId>,
    ) -> Result<Vec<BanRecord>, DbError> {
        self.bans()
            .active_role_bans(user_id, address, hardware_id)
            .await
    }

    async fn username_rule_by_id(&self, id: i32) -> Result<Option<UsernameRule>, DbError> {
        self.rules().get(id).await
    }

    async fn add_username_rule(&self, rule: &UsernameRule) -> Result<i32, DbError> {
        self.rules().add(rule).await
    }

    async fn retire_username_rule(
        &self,
        id: i32,
        by: Option<Uuid>,
    ) -> Result<Option<UsernameRule>, DbError> {
        self.rules().retire(id, by).await
    }

    async fn active_username_rules(&self) -> Result<Vec<UsernameRule>, DbError> {
        self.rules().all_active().await
    }

    async fn resolve_server_id(&self, name: &str) -> Result<i32, DbError> {
        self.servers().resolve(name).await
    }
}
