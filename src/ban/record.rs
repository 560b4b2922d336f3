//! Ban record types.
//!
//! Records are immutable once created; the only later mutation is attaching
//! an [`UnbanRecord`], which makes the ban inert for matching but keeps it
//! in history. The server/role split is enforced at the type level: only
//! [`BanKind::Server`] carries exemption flags, only [`BanKind::Role`]
//! carries a role set.

use crate::ban::roles::RoleId;
use crate::error::BanError;
use chrono::{DateTime, Utc};
use ipnet::{IpNet, Ipv4Net};
use std::collections::HashSet;
use std::net::IpAddr;
use uuid::Uuid;

/// Bitset of ban categories a player can be exempt from.
///
/// A ban carrying one of these flags yields to any player holding the same
/// flag. The values are part of the database encoding and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExemptFlags(pub u32);

impl ExemptFlags {
    /// No exemptions.
    pub const NONE: ExemptFlags = ExemptFlags(0);
    /// Exempt from datacenter-range bans.
    pub const DATACENTER: ExemptFlags = ExemptFlags(1 << 0);
    /// Exempt from all IP-based matching.
    pub const IP: ExemptFlags = ExemptFlags(1 << 1);
    /// Marks a ban as a blacklisted-range ban, and exempts a player from them.
    pub const BLACKLISTED_RANGE: ExemptFlags = ExemptFlags(1 << 2);
    /// All known flags. Used as the fail-open default while a player's
    /// exemption data is still loading.
    pub const ALL: ExemptFlags = ExemptFlags((1 << 0) | (1 << 1) | (1 << 2));

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: ExemptFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: ExemptFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> ExemptFlags {
        ExemptFlags(bits)
    }
}

impl std::ops::BitOr for ExemptFlags {
    type Output = ExemptFlags;

    fn bitor(self, rhs: ExemptFlags) -> ExemptFlags {
        ExemptFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ExemptFlags {
    fn bitor_assign(&mut self, rhs: ExemptFlags) {
        self.0 |= rhs.0;
    }
}

/// Opaque hardware identifier reported by the game client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HwId(pub Vec<u8>);

impl HwId {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for HwId {
    fn from(bytes: Vec<u8>) -> Self {
        HwId(bytes)
    }
}

/// Severity attached to a ban for admin bookkeeping. Not consulted by
/// matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Severity {
    None = 0,
    #[default]
    Minor = 1,
    Medium = 2,
    High = 3,
}

impl Severity {
    pub fn from_i16(v: i16) -> Severity {
        match v {
            0 => Severity::None,
            2 => Severity::Medium,
            3 => Severity::High,
            _ => Severity::Minor,
        }
    }
}

/// What a ban applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanKind {
    /// Bars the player from connecting at all.
    Server { exempt_flags: ExemptFlags },
    /// Bars the player from selecting the listed roles. Role bans never
    /// carry exemption flags.
    Role { roles: HashSet<RoleId> },
}

/// A pardon attached to an existing ban.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnbanRecord {
    pub unbanned_by: Option<Uuid>,
    pub at: DateTime<Utc>,
}

/// A persisted ban.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRecord {
    /// Assigned by the store on insert; 0 until then.
    pub id: i32,
    pub kind: BanKind,
    pub user_ids: HashSet<Uuid>,
    pub address_ranges: Vec<IpNet>,
    pub hardware_ids: Vec<HwId>,
    pub created_at: DateTime<Utc>,
    /// None = permanent.
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub severity: Severity,
    pub banned_by: Option<Uuid>,
    pub unban: Option<UnbanRecord>,
}

impl BanRecord {
    /// Build a new, unpersisted ban.
    ///
    /// Validates that the target predicate is satisfiable (at least one of
    /// user ids, address ranges, hardware ids non-empty; role bans need a
    /// non-empty role set) and canonicalizes IPv4-mapped-IPv6 ranges so all
    /// downstream comparisons work on a single address family.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: BanKind,
        user_ids: HashSet<Uuid>,
        address_ranges: Vec<IpNet>,
        hardware_ids: Vec<HwId>,
        expires_at: Option<DateTime<Utc>>,
        reason: String,
        severity: Severity,
        banned_by: Option<Uuid>,
    ) -> Result<BanRecord, BanError> {
        if user_ids.is_empty() && address_ranges.is_empty() && hardware_ids.iter().all(HwId::is_empty) {
            return Err(BanError::EmptyTargets);
        }
        if let BanKind::Role { roles } = &kind
            && roles.is_empty()
        {
            return Err(BanError::EmptyRoles);
        }

        Ok(BanRecord {
            id: 0,
            kind,
            user_ids,
            address_ranges: address_ranges.into_iter().map(normalize_range).collect(),
            hardware_ids,
            created_at: Utc::now(),
            expires_at,
            reason,
            severity,
            banned_by,
            unban: None,
        })
    }

    /// Exemption flags this ban yields to. Role bans carry none.
    pub fn exempt_flags(&self) -> ExemptFlags {
        match &self.kind {
            BanKind::Server { exempt_flags } => *exempt_flags,
            BanKind::Role { .. } => ExemptFlags::NONE,
        }
    }

    /// Role set for role bans, empty slice semantics for server bans.
    pub fn roles(&self) -> Option<&HashSet<RoleId>> {
        match &self.kind {
            BanKind::Role { roles } => Some(roles),
            BanKind::Server { .. } => None,
        }
    }

    pub fn is_server_ban(&self) -> bool {
        matches!(self.kind, BanKind::Server { .. })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Whether the ban still participates in matching: not pardoned, not
    /// expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.unban.is_none() && !self.is_expired(now)
    }

    /// Human-readable disconnect message shown to a kicked player.
    pub fn disconnect_message(&self, appeal_url: Option<&str>) -> String {
        let mut msg = format!("You have been banned from this server.\nReason: {}", self.reason);
        match self.expires_at {
            None => msg.push_str("\nThis ban is permanent and will not be removed automatically."),
            Some(exp) => {
                msg.push_str(&format!(
                    "\nThis ban expires at {} UTC.",
                    exp.format("%Y-%m-%d %H:%M:%S")
                ));
            }
        }
        if let Some(url) = appeal_url {
            msg.push_str(&format!("\nTo appeal this ban, visit {url}"));
        }
        msg
    }
}

/// Canonicalize an IPv4-mapped-IPv6 range to plain IPv4, shrinking the
/// prefix by 96 to account for the mapped prefix bits.
pub fn normalize_range(range: IpNet) -> IpNet {
    match range {
        IpNet::V6(net) => {
            let Some(v4) = net.addr().to_ipv4_mapped() else {
                return range;
            };
            if net.prefix_len() < 96 {
                return range;
            }
            match Ipv4Net::new(v4, net.prefix_len() - 96) {
                Ok(v4net) => IpNet::V4(v4net),
                Err(_) => range,
            }
        }
        IpNet::V4(_) => range,
    }
}

/// Canonicalize a player address the same way ranges are canonicalized.
pub fn normalize_addr(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(addr, IpAddr::V4),
        IpAddr::V4(_) => addr,
    }
}
