//! Repository for ban records and exemption flags.

use super::DbError;
use crate::ban::{self, BanKind, BanRecord, ExemptFlags, HwId, PlayerInfo, Severity, UnbanRecord};
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use sqlx::PgPool;
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::warn;
use uuid::Uuid;

/// Row shape shared by all ban queries.
type BanRow = (
    i32,                       // id
    i16,                       // kind
    i32,                       // exempt_flags
    Vec<String>,               // roles
    Vec<Uuid>,                 // user_ids
    Vec<String>,               // address_ranges
    Vec<Vec<u8>>,              // hardware_ids
    DateTime<Utc>,             // created_at
    Option<DateTime<Utc>>,     // expires_at
    String,                    // reason
    i16,                       // severity
    Option<Uuid>,              // banned_by
    Option<Uuid>,              // unbanned_by
    Option<DateTime<Utc>>,     // unbanned_at
);

const BAN_COLUMNS: &str = "id, kind, exempt_flags, roles, user_ids, address_ranges, hardware_ids, \
     created_at, expires_at, reason, severity, banned_by, unbanned_by, unbanned_at";

const KIND_SERVER: i16 = 0;
const KIND_ROLE: i16 = 1;

/// Repository for ban operations.
pub struct BanRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> BanRepository<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Look up a ban by id. Returns pardoned bans as well; callers decide
    /// whether an inert record is interesting.
    pub async fn get(&self, id: i32) -> Result<Option<BanRecord>, DbError> {
        let row = sqlx::query_as::<_, BanRow>(&format!(
            "SELECT {BAN_COLUMNS} FROM ban WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(row_to_ban))
    }

    /// Insert a ban and return its assigned id.
    pub async fn add(&self, ban: &BanRecord) -> Result<i32, DbError> {
        let (kind, exempt_flags, roles) = match &ban.kind {
            BanKind::Server { exempt_flags } => {
                (KIND_SERVER, exempt_flags.bits() as i32, Vec::new())
            }
            BanKind::Role { roles } => (KIND_ROLE, 0, roles.iter().cloned().collect()),
        };

        let (id,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO ban (kind, exempt_flags, roles, user_ids, address_ranges,
                             hardware_ids, created_at, expires_at, reason, severity, banned_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(kind)
        .bind(exempt_flags)
        .bind(&roles)
        .bind(ban.user_ids.iter().copied().collect::<Vec<_>>())
        .bind(
            ban.address_ranges
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>(),
        )
        .bind(
            ban.hardware_ids
                .iter()
                .map(|h| h.0.clone())
                .collect::<Vec<_>>(),
        )
        .bind(ban.created_at)
        .bind(ban.expires_at)
        .bind(&ban.reason)
        .bind(ban.severity as i16)
        .bind(ban.banned_by)
        .fetch_one(self.pool)
        .await?;

        Ok(id)
    }

    /// Attach a pardon. Returns false if no such un-pardoned ban exists.
    pub async fn add_unban(&self, ban_id: i32, by: Option<Uuid>) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE ban SET unbanned_by = $2, unbanned_at = $3 WHERE id = $1 AND unbanned_at IS NULL",
        )
        .bind(ban_id)
        .bind(by)
        .bind(Utc::now())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn exempt_flags(&self, user_id: Uuid) -> Result<ExemptFlags, DbError> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT flags FROM ban_exemption WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(self.pool)
                .await?;

        Ok(row.map_or(ExemptFlags::NONE, |(flags,)| {
            ExemptFlags::from_bits(flags as u32)
        }))
    }

    pub async fn set_exempt_flags(&self, user_id: Uuid, flags: ExemptFlags) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO ban_exemption (user_id, flags) VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET flags = EXCLUDED.flags
            "#,
        )
        .bind(user_id)
        .bind(flags.bits() as i32)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Active role bans matching a player. Candidate rows come from the
    /// database; the authoritative match decision is the in-process
    /// matcher, so SQL stays a coarse pre-filter.
    pub async fn active_role_bans(
        &self,
        user_id: Uuid,
        address: Option<IpAddr>,
        hardware_id: Option<&HwId>,
    ) -> Result<Vec<BanRecord>, DbError> {
        let rows = sqlx::query_as::<_, BanRow>(&format!(
            r#"
            SELECT {BAN_COLUMNS} FROM ban
            WHERE kind = $1
              AND unbanned_at IS NULL
              AND (expires_at IS NULL OR expires_at > now())
              AND (user_ids @> ARRAY[$2]::uuid[]
                   OR cardinality(address_ranges) > 0
                   OR cardinality(hardware_ids) > 0)
            "#
        ))
        .bind(KIND_ROLE)
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        let player = PlayerInfo {
            user_id: Some(user_id),
            address,
            hardware_id: hardware_id.cloned(),
            exempt_flags: ExemptFlags::NONE,
            is_new_account: false,
        };

        Ok(rows
            .into_iter()
            .map(row_to_ban)
            .filter(|record| ban::matches(record, &player))
            .collect())
    }
}

fn row_to_ban(row: BanRow) -> BanRecord {
    let (
        id,
        kind,
        exempt_flags,
        roles,
        user_ids,
        address_ranges,
        hardware_ids,
        created_at,
        expires_at,
        reason,
        severity,
        banned_by,
        unbanned_by,
        unbanned_at,
    ) = row;

    let kind = if kind == KIND_ROLE {
        BanKind::Role {
            roles: roles.into_iter().collect(),
        }
    } else {
        BanKind::Server {
            exempt_flags: ExemptFlags::from_bits(exempt_flags as u32),
        }
    };

    let address_ranges = address_ranges
        .iter()
        .filter_map(|raw| match raw.parse::<IpNet>() {
            Ok(net) => Some(ban::record::normalize_range(net)),
            Err(e) => {
                warn!(ban_id = id, range = %raw, error = %e, "unparseable address range in ban row, skipped");
                None
            }
        })
        .collect();

    BanRecord {
        id,
        kind,
        user_ids: user_ids.into_iter().collect::<HashSet<_>>(),
        address_ranges,
        hardware_ids: hardware_ids.into_iter().map(HwId).collect(),
        created_at,
        expires_at,
        reason,
        severity: Severity::from_i16(severity),
        banned_by,
        unban: unbanned_at.map(|at| UnbanRecord {
            unbanned_by,
            at,
        }),
    }
}
